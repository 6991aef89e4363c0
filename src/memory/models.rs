use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::scoring::tone::Tone;

/// Chat flush threshold bounds — a new threshold is drawn uniformly from
/// this range after every flush.
pub const THRESHOLD_MIN: u32 = 15;
pub const THRESHOLD_MAX: u32 = 20;

/// One scored message, append-only once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub ts: DateTime<Utc>,
    pub message: String,
    pub qscore: i64,
    pub tone: Tone,
}

/// Accumulation state for the chat-batching flow: messages buffer up until
/// `count` reaches `threshold`, then the batch is scored as one synthetic
/// message and the state resets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatState {
    pub count: u32,
    pub threshold: u32,
    pub buffer: Vec<String>,
}

impl Default for ChatState {
    fn default() -> Self {
        ChatState {
            count: 0,
            threshold: draw_threshold(),
            buffer: Vec::new(),
        }
    }
}

impl ChatState {
    /// Re-draw the threshold if a stored value fell outside [15,20]
    /// (missing field, corrupt row, or an older config).
    pub fn ensure_threshold(&mut self) {
        if !(THRESHOLD_MIN..=THRESHOLD_MAX).contains(&self.threshold) {
            self.threshold = draw_threshold();
        }
    }

    /// Reset after a flush: empty buffer, zero count, fresh threshold.
    pub fn reset(&mut self) {
        self.count = 0;
        self.buffer.clear();
        self.threshold = draw_threshold();
    }
}

/// Draw a flush threshold uniformly from [15,20].
pub fn draw_threshold() -> u32 {
    rand::thread_rng().gen_range(THRESHOLD_MIN..=THRESHOLD_MAX)
}

/// Everything persisted for one user. Owned by exactly one logical user;
/// created lazily on first interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMemory {
    pub user: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub history: Vec<ScoreRecord>,
    #[serde(default)]
    pub chat_state: ChatState,
}

impl UserMemory {
    pub fn new(user: &str) -> Self {
        UserMemory {
            user: user.to_string(),
            nickname: None,
            history: Vec::new(),
            chat_state: ChatState::default(),
        }
    }

    /// The last `window` scores in chronological order.
    pub fn recent_scores(&self, window: usize) -> Vec<i64> {
        self.history
            .iter()
            .skip(self.history.len().saturating_sub(window))
            .map(|r| r.qscore)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_threshold_in_range() {
        for _ in 0..100 {
            let t = draw_threshold();
            assert!((THRESHOLD_MIN..=THRESHOLD_MAX).contains(&t), "{t}");
        }
    }

    #[test]
    fn test_ensure_threshold_redraws_invalid() {
        let mut state = ChatState { count: 3, threshold: 0, buffer: vec![] };
        state.ensure_threshold();
        assert!((THRESHOLD_MIN..=THRESHOLD_MAX).contains(&state.threshold));
        assert_eq!(state.count, 3);

        let mut high = ChatState { count: 0, threshold: 99, buffer: vec![] };
        high.ensure_threshold();
        assert!((THRESHOLD_MIN..=THRESHOLD_MAX).contains(&high.threshold));
    }

    #[test]
    fn test_ensure_threshold_keeps_valid() {
        let mut state = ChatState { count: 7, threshold: 17, buffer: vec!["a".into()] };
        state.ensure_threshold();
        assert_eq!(state.threshold, 17);
    }

    #[test]
    fn test_reset_clears_and_redraws() {
        let mut state = ChatState {
            count: 16,
            threshold: 16,
            buffer: vec!["x".into(), "y".into()],
        };
        state.reset();
        assert_eq!(state.count, 0);
        assert!(state.buffer.is_empty());
        assert!((THRESHOLD_MIN..=THRESHOLD_MAX).contains(&state.threshold));
    }

    #[test]
    fn test_recent_scores_window() {
        let mut mem = UserMemory::new("u");
        for q in [100, 200, 300, 400] {
            mem.history.push(ScoreRecord {
                ts: Utc::now(),
                message: String::new(),
                qscore: q,
                tone: Tone::Neutral,
            });
        }
        assert_eq!(mem.recent_scores(2), vec![300, 400]);
        assert_eq!(mem.recent_scores(10), vec![100, 200, 300, 400]);
    }

    #[test]
    fn test_memory_serde_shape() {
        let mem = UserMemory::new("ada");
        let json = serde_json::to_value(&mem).unwrap();
        assert!(json.get("user").is_some());
        assert!(json.get("history").is_some());
        assert!(json.get("chat_state").is_some());

        // Older records without chat_state still deserialize
        let legacy = r#"{"user":"ada","history":[]}"#;
        let parsed: UserMemory = serde_json::from_str(legacy).unwrap();
        assert!((THRESHOLD_MIN..=THRESHOLD_MAX).contains(&parsed.chat_state.threshold));
    }

    #[test]
    fn test_record_tone_wire_label() {
        let record = ScoreRecord {
            ts: Utc::now(),
            message: "m".into(),
            qscore: 400,
            tone: Tone::HighEnergy,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"high-energy\""), "{json}");
    }
}
