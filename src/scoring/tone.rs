use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Coarse emotional classification of a message.
///
/// Declaration order doubles as the tie-break order: when two tones score
/// the same weighted total, the earlier one wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tone {
    Anxious,
    Positive,
    HighEnergy,
    #[default]
    Neutral,
}

/// Tones in tie-break order.
pub const TONE_ORDER: [Tone; 4] = [Tone::Anxious, Tone::Positive, Tone::HighEnergy, Tone::Neutral];

impl Tone {
    /// Wire/storage label ("high-energy" keeps the hyphen).
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Anxious => "anxious",
            Tone::Positive => "positive",
            Tone::HighEnergy => "high-energy",
            Tone::Neutral => "neutral",
        }
    }

    /// Q-Score base value for this tone.
    pub fn base(&self) -> i64 {
        match self {
            Tone::Anxious => 150,
            Tone::Neutral => 250,
            Tone::Positive => 350,
            Tone::HighEnergy => 400,
        }
    }

    /// Weighted keyword table for this tone.
    fn keywords(&self) -> &'static [(&'static str, i64)] {
        match self {
            Tone::Anxious => &[
                ("angry", 2), ("mad", 2), ("frustrated", 3), ("lost", 2), ("hate", 2),
                ("sad", 2), ("anxious", 3), ("scared", 3), ("panic", 3), ("fear", 2),
                ("stressed", 3),
            ],
            Tone::Positive => &[
                ("happy", 2), ("grateful", 2), ("confident", 3), ("calm", 3),
                ("peaceful", 3), ("good", 1), ("winning", 2), ("profit", 2),
                ("composed", 2), ("focused", 1),
            ],
            Tone::HighEnergy => &[
                ("excited", 3), ("pumped", 3), ("ready", 2), ("motivated", 2),
                ("amped", 3), ("hyped", 3), ("wired", 2),
            ],
            Tone::Neutral => &[
                ("nervous", 1), ("unsure", 1), ("maybe", 1), ("confused", 2),
                ("ok", 1), ("fine", 1),
            ],
        }
    }
}

impl std::fmt::Display for Tone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anxious" => Ok(Tone::Anxious),
            "positive" => Ok(Tone::Positive),
            "high-energy" => Ok(Tone::HighEnergy),
            "neutral" => Ok(Tone::Neutral),
            other => Err(format!("unknown tone label: {other}")),
        }
    }
}

static WORD_RE: OnceLock<Regex> = OnceLock::new();

fn word_re() -> &'static Regex {
    // Maximal alphabetic runs — "okay" never matches the keyword "ok".
    WORD_RE.get_or_init(|| Regex::new(r"[a-z]+").expect("word regex"))
}

/// Classify a message into a tone via weighted keyword matching.
///
/// Matching is case-insensitive and word-boundary only. Exclamation marks
/// lean anxious; heavy capitalization leans high-energy. All-zero totals
/// fall back to neutral.
pub fn classify(message: &str) -> Tone {
    let lowered = message.to_lowercase();

    let mut counts: HashMap<&str, i64> = HashMap::new();
    for m in word_re().find_iter(&lowered) {
        *counts.entry(m.as_str()).or_insert(0) += 1;
    }

    let mut totals = [0i64; 4];
    for (i, tone) in TONE_ORDER.iter().enumerate() {
        for &(keyword, weight) in tone.keywords() {
            if let Some(&n) = counts.get(keyword) {
                totals[i] += weight * n;
            }
        }
    }

    let exclaims = message.chars().filter(|&c| c == '!').count() as i64;
    let caps = message
        .chars()
        .filter(|c| c.is_alphabetic() && c.is_uppercase())
        .count() as i64;
    totals[0] += (exclaims as f64 * 0.5).floor() as i64;
    totals[2] += ((caps - 8).max(0) as f64 * 0.2).floor() as i64;

    if totals.iter().all(|&t| t == 0) {
        return Tone::Neutral;
    }

    // First tone in declaration order with the strictly highest total.
    let mut best = TONE_ORDER[0];
    let mut best_total = totals[0];
    for (i, &tone) in TONE_ORDER.iter().enumerate().skip(1) {
        if totals[i] > best_total {
            best = tone;
            best_total = totals[i];
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_classification() {
        assert_eq!(classify("I feel anxious and scared"), Tone::Anxious);
        assert_eq!(classify("calm, confident, peaceful morning"), Tone::Positive);
        assert_eq!(classify("so hyped and pumped right now"), Tone::HighEnergy);
        assert_eq!(classify("maybe ok, fine I guess"), Tone::Neutral);
    }

    #[test]
    fn test_no_signal_defaults_neutral() {
        assert_eq!(classify("the weather report for tomorrow"), Tone::Neutral);
        assert_eq!(classify(""), Tone::Neutral);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(classify("PANIC panic Panic"), Tone::Anxious);
    }

    #[test]
    fn test_word_boundaries_only() {
        // "okay" must not match "ok", "madness" must not match "mad"
        assert_eq!(classify("okay then, madness aside"), Tone::Neutral);
        // "profitability" must not match "profit"
        assert_eq!(classify("profitability reports"), Tone::Neutral);
    }

    #[test]
    fn test_occurrences_multiply_weight() {
        // panic(3) x2 = 6 beats calm(3) + confident(3) = 6? No — tie, anxious
        // is declared first. One more calm breaks the tie the other way.
        assert_eq!(classify("panic panic calm confident"), Tone::Anxious);
        assert_eq!(classify("panic panic calm calm confident"), Tone::Positive);
    }

    #[test]
    fn test_exclamations_lean_anxious() {
        // Two hedge words (neutral 2) vs floor(6 * 0.5) = 3 anxious points
        assert_eq!(classify("maybe unsure!!!!!!"), Tone::Anxious);
    }

    #[test]
    fn test_caps_lean_high_energy() {
        // 31 uppercase letters -> floor(23 * 0.2) = 4 high-energy points
        assert_eq!(classify("THIS MARKET IS ABSOLUTELY WILD TODAY"), Tone::HighEnergy);
    }

    #[test]
    fn test_tie_breaks_to_declaration_order() {
        // sad(2) vs happy(2): equal totals, anxious declared first
        assert_eq!(classify("happy and sad"), Tone::Anxious);
    }

    #[test]
    fn test_label_round_trip() {
        for tone in TONE_ORDER {
            assert_eq!(tone.as_str().parse::<Tone>().unwrap(), tone);
        }
        assert!("mellow".parse::<Tone>().is_err());
    }
}
