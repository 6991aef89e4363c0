use serde::Serialize;

/// A named Q-Score band with its narrative metadata.
///
/// `midpoint` is the quantization target for the stabilizer — the canonical
/// center value, not the arithmetic mean of the bounds (Storm's would be
/// 149.5).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeBand {
    pub name: &'static str,
    pub emoji: &'static str,
    #[serde(skip)]
    pub low: i64,
    #[serde(skip)]
    pub high: i64,
    #[serde(skip)]
    pub midpoint: i64,
    pub archetype: &'static str,
    pub element: &'static str,
    pub motto: &'static str,
}

/// The five bands, ascending. Boundaries are inclusive and partition
/// [100,600] with no gaps and no overlaps.
pub const RANGES: [RangeBand; 5] = [
    RangeBand {
        name: "Storm",
        emoji: "🌪",
        low: 100,
        high: 199,
        midpoint: 150,
        archetype: "The Reactor",
        element: "Fire",
        motto: "Emotion first, logic later.",
    },
    RangeBand {
        name: "Ground",
        emoji: "🌍",
        low: 200,
        high: 299,
        midpoint: 250,
        archetype: "The Builder",
        element: "Earth",
        motto: "Steady hands make heavy bags.",
    },
    RangeBand {
        name: "Flow",
        emoji: "🌊",
        low: 300,
        high: 399,
        midpoint: 350,
        archetype: "The Surfer",
        element: "Water",
        motto: "Don't fight the wave — ride it.",
    },
    RangeBand {
        name: "Gold",
        emoji: "🏆",
        low: 400,
        high: 499,
        midpoint: 450,
        archetype: "The Strategist",
        element: "Air",
        motto: "Silence wins faster.",
    },
    RangeBand {
        name: "Sun",
        emoji: "☀️",
        low: 500,
        high: 600,
        midpoint: 550,
        archetype: "The Oracle",
        element: "Light",
        motto: "Peace is the ultimate edge.",
    },
];

/// Map a Q-Score to its band.
///
/// Total function: anything outside [100,600] falls back to the lowest
/// band. Callers are expected to clamp first — the fallback exists so a
/// bad input can't turn a display path into an error path.
pub fn classify(qscore: i64) -> &'static RangeBand {
    RANGES
        .iter()
        .find(|band| band.low <= qscore && qscore <= band.high)
        .unwrap_or(&RANGES[0])
}
