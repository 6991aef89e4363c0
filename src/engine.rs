use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::lock::KeyedLocks;
use crate::memory::{MemoryStore, ScoreRecord, StoreError, UserMemory};
use crate::ranges::{self, RangeBand};
use crate::reflection;
use crate::scoring;
use crate::scoring::tone::Tone;
use crate::stabilizer;
use crate::trend::{self, Streak, TrendSnapshot};
use crate::{QSCORE_MAX, QSCORE_MIN};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("chat message must be a non-empty string")]
    EmptyChatMessage,
    #[error("answers must contain at least one non-blank entry")]
    EmptyAnswers,
    #[error("history entry {0} outside the Q-Score scale 100..=600")]
    HistoryOutOfRange(i64),
}

/// Tunables for one engine instance. Defaults match the module constants.
#[derive(Debug, Clone)]
pub struct EngineParams {
    pub rolling_window: usize,
    pub slope_window: usize,
    pub smoothing_alpha: f64,
    pub store_timeout: Duration,
}

impl Default for EngineParams {
    fn default() -> Self {
        EngineParams {
            rolling_window: trend::ROLLING_WINDOW,
            slope_window: trend::SLOPE_WINDOW,
            smoothing_alpha: stabilizer::SMOOTHING_ALPHA,
            store_timeout: Duration::from_secs(3),
        }
    }
}

/// Result of the pure scoring entry point.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreOutcome {
    pub qscore: i64,
    pub tone: Tone,
    pub range: &'static RangeBand,
}

/// Full per-user summary: the latest score plus the trend over the stored
/// window and the reflection line. Field names are the wire contract.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub user: String,
    pub nickname: Option<String>,
    pub tone: Tone,
    pub qscore: i64,
    pub range: &'static RangeBand,
    pub main_qscore: Option<i64>,
    pub trend_slope: f64,
    pub volatility: Option<i64>,
    pub streak: Streak,
    pub reflection: String,
}

/// Outcome of one chat ingestion event.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ChatOutcome {
    Queued { count: u32, threshold: u32 },
    Scored { result: Box<Summary> },
}

/// Score a message with no memory involved: synthesize and classify.
/// Pure and deterministic; repeated calls return identical results.
pub fn score(message: &str) -> ScoreOutcome {
    let raw = scoring::synthesize(message);
    ScoreOutcome {
        qscore: raw.qscore,
        tone: raw.tone,
        range: ranges::classify(raw.qscore),
    }
}

/// The stateful scoring engine: pure synthesis plus per-user memory,
/// stabilization, and trend analytics over a `MemoryStore`.
///
/// Same-user operations serialize on a keyed lock so concurrent updates
/// can't lose each other's quantize/EMA step; different users never
/// contend. Store I/O is awaited under a bounded timeout and degrades to
/// "scored but not persisted" on failure.
pub struct Engine<S> {
    store: S,
    locks: KeyedLocks,
    params: EngineParams,
}

impl<S: MemoryStore> Engine<S> {
    pub fn new(store: S, params: EngineParams) -> Self {
        Engine {
            store,
            locks: KeyedLocks::new(),
            params,
        }
    }

    /// Validate a caller-supplied history and compute its trend snapshot.
    pub fn update_trend(&self, history: &[i64]) -> Result<TrendSnapshot, EngineError> {
        for &q in history {
            if !(QSCORE_MIN..=QSCORE_MAX).contains(&q) {
                return Err(EngineError::HistoryOutOfRange(q));
            }
        }
        Ok(trend::snapshot(
            history,
            self.params.rolling_window,
            self.params.slope_window,
        ))
    }

    /// Quantize-then-smooth a raw score against the user's previous
    /// persisted score, with the engine's configured smoothing weight.
    pub fn stabilize(&self, user: &str, raw: i64, previous: Option<i64>) -> i64 {
        let smoothed = stabilizer::stabilize(raw, previous, self.params.smoothing_alpha);
        log::debug!("stabilize user={user} raw={raw} previous={previous:?} smoothed={smoothed}");
        smoothed
    }

    /// Score one message against the user's memory and append the result.
    pub async fn evaluate(&self, user: &str, message: &str, nickname: Option<&str>) -> Summary {
        let _guard = self.locks.acquire(user).await;
        let mut memory = self.load_or_fresh(user).await;
        if let Some(nick) = nickname {
            memory.nickname = Some(nick.to_string());
        }

        let (record, summary) = self.score_into(&mut memory, message);
        self.persist("append history record", self.store.append_record(user, &record))
            .await;
        self.persist(
            "update user state",
            self.store
                .update_chat_state(user, memory.nickname.as_deref(), &memory.chat_state),
        )
        .await;
        summary
    }

    /// Score a form submission: drop blank and near-duplicate answers,
    /// fold the rest into one message, and evaluate it.
    pub async fn answers(
        &self,
        user: &str,
        answers: &[String],
        nickname: Option<&str>,
    ) -> Result<Summary, EngineError> {
        let lines: Vec<String> = answers
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();
        if lines.is_empty() {
            return Err(EngineError::EmptyAnswers);
        }
        let combined = stabilizer::dedup_lines(&lines).join(" | ");
        Ok(self.evaluate(user, &combined, nickname).await)
    }

    /// Feed one chat message into the batching state machine.
    ///
    /// Messages accumulate until the drawn threshold is reached; the flush
    /// dedups the buffer, scores it as one synthetic message, and resets
    /// the state with a fresh threshold.
    pub async fn ingest_chat(
        &self,
        user: &str,
        message: &str,
        nickname: Option<&str>,
    ) -> Result<ChatOutcome, EngineError> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Err(EngineError::EmptyChatMessage);
        }

        let _guard = self.locks.acquire(user).await;
        let mut memory = self.load_or_fresh(user).await;
        if let Some(nick) = nickname {
            memory.nickname = Some(nick.to_string());
        }

        memory.chat_state.ensure_threshold();
        memory.chat_state.buffer.push(trimmed.to_string());
        memory.chat_state.count += 1;

        if memory.chat_state.count < memory.chat_state.threshold {
            let (count, threshold) = (memory.chat_state.count, memory.chat_state.threshold);
            self.persist(
                "update chat state",
                self.store
                    .update_chat_state(user, memory.nickname.as_deref(), &memory.chat_state),
            )
            .await;
            return Ok(ChatOutcome::Queued { count, threshold });
        }

        // Threshold reached: fold the buffer into one synthetic message
        let combined = stabilizer::dedup_lines(&memory.chat_state.buffer).join(" | ");
        memory.chat_state.reset();

        let (record, summary) = self.score_into(&mut memory, &combined);
        self.persist("append history record", self.store.append_record(user, &record))
            .await;
        self.persist(
            "reset chat state",
            self.store
                .update_chat_state(user, memory.nickname.as_deref(), &memory.chat_state),
        )
        .await;

        Ok(ChatOutcome::Scored { result: Box::new(summary) })
    }

    /// Rebuild the current summary from stored history without scoring
    /// anything new. `None` when the user has no history.
    pub async fn trend(&self, user: &str) -> Option<Summary> {
        let memory = self.load_or_fresh(user).await;
        let last = memory.history.last()?;

        let recent = memory.recent_scores(self.params.rolling_window);
        let snap = trend::snapshot(&recent, self.params.rolling_window, self.params.slope_window);
        let range = ranges::classify(last.qscore);
        let reflection = reflection::reflect(last.tone, range, snap.slope);

        Some(Summary {
            user: memory.user.clone(),
            nickname: memory.nickname.clone(),
            tone: last.tone,
            qscore: last.qscore,
            range,
            main_qscore: snap.main_qscore,
            trend_slope: snap.slope,
            volatility: snap.volatility,
            streak: snap.streak,
            reflection,
        })
    }

    /// The user's most recent records, oldest first.
    pub async fn history(&self, user: &str, limit: usize) -> Vec<ScoreRecord> {
        let memory = self.load_or_fresh(user).await;
        let skip = memory.history.len().saturating_sub(limit);
        memory.history.into_iter().skip(skip).collect()
    }

    /// Synthesize, stabilize against the last persisted score, classify the
    /// smoothed value, and append it to the in-memory history.
    fn score_into(&self, memory: &mut UserMemory, message: &str) -> (ScoreRecord, Summary) {
        let raw = scoring::synthesize(message);
        let previous = memory.history.last().map(|r| r.qscore);
        let qscore = stabilizer::stabilize(raw.qscore, previous, self.params.smoothing_alpha);
        // Band comes from the smoothed score, never the raw one
        let range = ranges::classify(qscore);

        let record = ScoreRecord {
            ts: Utc::now(),
            message: message.to_string(),
            qscore,
            tone: raw.tone,
        };
        memory.history.push(record.clone());

        let recent = memory.recent_scores(self.params.rolling_window);
        let snap = trend::snapshot(&recent, self.params.rolling_window, self.params.slope_window);
        let reflection = reflection::reflect(raw.tone, range, snap.slope);

        let summary = Summary {
            user: memory.user.clone(),
            nickname: memory.nickname.clone(),
            tone: raw.tone,
            qscore,
            range,
            main_qscore: snap.main_qscore,
            trend_slope: snap.slope,
            volatility: snap.volatility,
            streak: snap.streak,
            reflection,
        };
        (record, summary)
    }

    async fn load_or_fresh(&self, user: &str) -> UserMemory {
        match tokio::time::timeout(self.params.store_timeout, self.store.load(user)).await {
            Ok(Ok(Some(memory))) => memory,
            Ok(Ok(None)) => UserMemory::new(user),
            Ok(Err(e)) => {
                log::warn!("Failed to load memory for {user}: {e}, scoring against fresh state");
                UserMemory::new(user)
            }
            Err(_) => {
                log::warn!("Memory load for {user} timed out, scoring against fresh state");
                UserMemory::new(user)
            }
        }
    }

    /// Await a store write under the bounded timeout; failures are logged
    /// and swallowed, so scoring never fails on persistence.
    async fn persist<F>(&self, what: &str, fut: F)
    where
        F: Future<Output = Result<(), StoreError>>,
    {
        match tokio::time::timeout(self.params.store_timeout, fut).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Persistence failed ({what}): {e}, result not durable"),
            Err(_) => log::warn!(
                "Persistence timed out after {:?} ({what})",
                self.params.store_timeout
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::models::{THRESHOLD_MAX, THRESHOLD_MIN};
    use crate::memory::{ChatState, InMemoryStore, Result as StoreResult};
    use std::sync::Arc;

    fn engine() -> Engine<InMemoryStore> {
        Engine::new(InMemoryStore::new(), EngineParams::default())
    }

    async fn seed_threshold(engine: &Engine<InMemoryStore>, user: &str, threshold: u32) {
        let state = ChatState { count: 0, threshold, buffer: vec![] };
        engine
            .store
            .update_chat_state(user, None, &state)
            .await
            .unwrap();
    }

    #[test]
    fn test_score_entry_point() {
        let outcome = score("I am so anxious and scared, panic!!");
        assert_eq!(outcome.tone, Tone::Anxious);
        assert_eq!(outcome.range.name, "Storm");
        assert!((QSCORE_MIN..=QSCORE_MAX).contains(&outcome.qscore));
        // Determinism across calls
        let again = score("I am so anxious and scared, panic!!");
        assert_eq!(outcome.qscore, again.qscore);
    }

    #[test]
    fn test_update_trend_validates_history() {
        let e = engine();
        assert!(matches!(
            e.update_trend(&[300, 601]),
            Err(EngineError::HistoryOutOfRange(601))
        ));
        assert!(matches!(
            e.update_trend(&[99]),
            Err(EngineError::HistoryOutOfRange(99))
        ));
        let snap = e.update_trend(&[100, 150, 200, 250]).unwrap();
        assert_eq!(snap.streak.length, 3);
    }

    #[test]
    fn test_stabilize_entry_point() {
        let e = engine();
        assert_eq!(e.stabilize("ada", 550, Some(250)), 340);
        assert_eq!(e.stabilize("ada", 550, None), 550);
    }

    #[tokio::test]
    async fn test_first_evaluate_lands_on_band_midpoint() {
        let e = engine();
        let summary = e.evaluate("ada", "I am so anxious and scared, panic!!", None).await;
        // No previous score: stabilization passes the quantized value through
        assert_eq!(summary.qscore, 150);
        assert_eq!(summary.range.name, "Storm");
        assert_eq!(summary.tone, Tone::Anxious);
        assert_eq!(summary.main_qscore, Some(150));
    }

    #[tokio::test]
    async fn test_evaluate_smooths_against_history() {
        let e = engine();
        e.evaluate("ada", "calm and confident, winning week", None).await;
        let second = e
            .evaluate("ada", "total panic, everything is stressed and scared!!", None)
            .await;
        // First score quantizes positive (350); anxious raw quantizes to
        // 150, smoothed: 350*0.7 + 150*0.3 = 290 -> Ground
        assert_eq!(second.qscore, 290);
        assert_eq!(second.range.name, "Ground");
    }

    #[tokio::test]
    async fn test_evaluate_sets_nickname() {
        let e = engine();
        let summary = e.evaluate("ada", "feeling fine", Some("Ada")).await;
        assert_eq!(summary.nickname.as_deref(), Some("Ada"));
        let stored = e.store.load("ada").await.unwrap().unwrap();
        assert_eq!(stored.nickname.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_answers_rejects_all_blank() {
        let e = engine();
        let result = e
            .answers("ada", &["".to_string(), "   ".to_string()], None)
            .await;
        assert!(matches!(result, Err(EngineError::EmptyAnswers)));
        // Nothing was written
        assert!(e.store.load("ada").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_answers_dedups_before_scoring() {
        let e = engine();
        e.answers(
            "ada",
            &[
                "hi there".to_string(),
                "HI THERE".to_string(),
                "hi   there".to_string(),
            ],
            None,
        )
        .await
        .unwrap();
        let stored = e.store.load("ada").await.unwrap().unwrap();
        assert_eq!(stored.history[0].message, "hi there");
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_message() {
        let e = engine();
        assert!(matches!(
            e.ingest_chat("ada", "   ", None).await,
            Err(EngineError::EmptyChatMessage)
        ));
    }

    #[tokio::test]
    async fn test_chat_batching_queues_then_scores() {
        let e = engine();
        seed_threshold(&e, "ada", 15).await;

        for i in 1..15u32 {
            match e.ingest_chat("ada", &format!("message {i}"), None).await.unwrap() {
                ChatOutcome::Queued { count, threshold } => {
                    assert_eq!(count, i);
                    assert_eq!(threshold, 15);
                }
                ChatOutcome::Scored { .. } => panic!("flushed early at message {i}"),
            }
        }

        match e.ingest_chat("ada", "message 15", None).await.unwrap() {
            ChatOutcome::Scored { result } => {
                assert!((QSCORE_MIN..=QSCORE_MAX).contains(&result.qscore));
            }
            ChatOutcome::Queued { .. } => panic!("15th message should flush"),
        }

        // State reset with a freshly drawn threshold
        let stored = e.store.load("ada").await.unwrap().unwrap();
        assert_eq!(stored.chat_state.count, 0);
        assert!(stored.chat_state.buffer.is_empty());
        assert!((THRESHOLD_MIN..=THRESHOLD_MAX).contains(&stored.chat_state.threshold));
        assert_eq!(stored.history.len(), 1);
    }

    #[tokio::test]
    async fn test_chat_flush_dedups_buffer() {
        let e = engine();
        seed_threshold(&e, "ada", 15).await;

        let variants = ["hi there", "HI THERE", "hi   there"];
        for i in 0..15 {
            e.ingest_chat("ada", variants[i % 3], None).await.unwrap();
        }

        let stored = e.store.load("ada").await.unwrap().unwrap();
        // All fifteen lines normalize identically; one survives
        assert_eq!(stored.history[0].message, "hi there");
    }

    #[tokio::test]
    async fn test_concurrent_same_user_ingests_both_count() {
        let e = Arc::new(engine());
        seed_threshold(&e, "ada", 15).await;

        let (a, b) = tokio::join!(
            e.ingest_chat("ada", "first", None),
            e.ingest_chat("ada", "second", None),
        );
        a.unwrap();
        b.unwrap();

        let stored = e.store.load("ada").await.unwrap().unwrap();
        assert_eq!(stored.chat_state.count, 2, "lost update detected");
        assert_eq!(stored.chat_state.buffer.len(), 2);
    }

    #[tokio::test]
    async fn test_trend_empty_user_is_none() {
        let e = engine();
        assert!(e.trend("nobody").await.is_none());
    }

    #[tokio::test]
    async fn test_trend_rebuilds_from_history() {
        let e = engine();
        e.evaluate("ada", "calm and peaceful", None).await;
        e.evaluate("ada", "still calm, still peaceful", None).await;

        let summary = e.trend("ada").await.unwrap();
        assert_eq!(summary.user, "ada");
        assert!((QSCORE_MIN..=QSCORE_MAX).contains(&summary.qscore));
        assert!(summary.main_qscore.is_some());
        assert!(summary.volatility.is_some());
        // Reading the trend must not grow the history
        assert_eq!(e.history("ada", 10).await.len(), 2);
    }

    #[tokio::test]
    async fn test_chat_outcome_wire_shape() {
        let e = engine();
        seed_threshold(&e, "ada", 15).await;
        let outcome = e.ingest_chat("ada", "hello", None).await.unwrap();
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "queued");
        assert_eq!(json["count"], 1);
        assert_eq!(json["threshold"], 15);
    }

    /// Store that fails every operation, for degradation tests.
    struct FailingStore;

    impl MemoryStore for FailingStore {
        async fn load(&self, _user: &str) -> StoreResult<Option<UserMemory>> {
            Err(StoreError::Corrupt("store offline".into()))
        }
        async fn append_record(&self, _user: &str, _record: &ScoreRecord) -> StoreResult<()> {
            Err(StoreError::Corrupt("store offline".into()))
        }
        async fn update_chat_state(
            &self,
            _user: &str,
            _nickname: Option<&str>,
            _state: &crate::memory::ChatState,
        ) -> StoreResult<()> {
            Err(StoreError::Corrupt("store offline".into()))
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_still_scores() {
        let e = Engine::new(FailingStore, EngineParams::default());
        let summary = e.evaluate("ada", "panic and fear everywhere!!", None).await;
        assert_eq!(summary.tone, Tone::Anxious);
        assert!((QSCORE_MIN..=QSCORE_MAX).contains(&summary.qscore));

        // Chat path degrades the same way
        let outcome = e.ingest_chat("ada", "hello", None).await.unwrap();
        assert!(matches!(outcome, ChatOutcome::Queued { count: 1, .. }));
    }
}
