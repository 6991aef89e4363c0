use crate::ranges::RangeBand;
use crate::scoring::tone::Tone;

/// Slope magnitude below which the trend reads as steady.
const TREND_EPSILON: f64 = 0.5;

/// Compose the reflection line shown with a summary: a tone-keyed template
/// plus a trend hint derived from the regression slope.
pub fn reflect(tone: Tone, range: &RangeBand, slope: f64) -> String {
    let trend_hint = if slope > TREND_EPSILON {
        "You're trending up — keep channeling that rhythm."
    } else if slope < -TREND_EPSILON {
        "Tiny wobble — slow the breath, steady the hands."
    } else {
        "You're steady — consistency compounds."
    };

    let name = range.name;
    match tone {
        Tone::Anxious => format!(
            "You sound tense, but self-aware — {name} energy. Breathe. Let's steady those hands. {trend_hint}"
        ),
        Tone::Neutral => format!(
            "You're composed — classic {name} range. Builder focus on. {trend_hint}"
        ),
        Tone::Positive => format!(
            "Calm confidence detected — pure {name} flow. Stay locked in. {trend_hint}"
        ),
        Tone::HighEnergy => format!(
            "Hyped and focused — {name} elite energy. Channel it with patience. {trend_hint}"
        ),
    }
}
