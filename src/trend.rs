//! Rolling trend statistics over a user's Q-Score history.
//!
//! All functions here are pure: they take a chronological score slice
//! (oldest first) and compute over its tail windows. The engine feeds them
//! the last `rolling_window` persisted scores.

use serde::{Deserialize, Serialize};

/// Default number of recent scores feeding the trend statistics.
pub const ROLLING_WINDOW: usize = 10;
/// Default sub-window for the regression slope. Must not exceed the
/// rolling window.
pub const SLOPE_WINDOW: usize = 7;

/// Direction of a score-to-score step (or of a whole streak).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Steady,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Steady => "steady",
        }
    }
}

/// The trailing run of consecutive same-direction score changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streak {
    pub direction: Direction,
    pub length: usize,
}

/// Derived trend statistics — computed fresh on every read, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSnapshot {
    pub main_qscore: Option<i64>,
    pub volatility: Option<i64>,
    pub slope: f64,
    pub streak: Streak,
}

/// Compute the full snapshot over the tail of `scores`.
pub fn snapshot(scores: &[i64], rolling_window: usize, slope_window: usize) -> TrendSnapshot {
    let recent = tail(scores, rolling_window);
    TrendSnapshot {
        main_qscore: weighted_mean(recent),
        volatility: volatility(recent),
        slope: slope(tail(recent, slope_window)),
        streak: streak(recent),
    }
}

fn tail(scores: &[i64], window: usize) -> &[i64] {
    &scores[scores.len().saturating_sub(window)..]
}

/// Linear-ramp weighted moving average: the i-th oldest score in the
/// window carries weight i+1, so the most recent weighs the most.
/// Returns `None` on an empty window.
pub fn weighted_mean(scores: &[i64]) -> Option<i64> {
    if scores.is_empty() {
        return None;
    }
    let mut weighted_sum = 0.0;
    let mut weight_sum = 0.0;
    for (i, &s) in scores.iter().enumerate() {
        let w = (i + 1) as f64;
        weighted_sum += s as f64 * w;
        weight_sum += w;
    }
    Some((weighted_sum / weight_sum).round() as i64)
}

/// Population standard deviation, rounded. `None` under 2 samples.
pub fn volatility(scores: &[i64]) -> Option<i64> {
    if scores.len() < 2 {
        return None;
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<i64>() as f64 / n;
    let var = scores
        .iter()
        .map(|&s| {
            let d = s as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    Some(var.sqrt().round() as i64)
}

/// OLS slope of the scores against their indices 0..n.
/// Returns 0.0 under 2 samples or on degenerate variance.
pub fn slope(scores: &[i64]) -> f64 {
    let n = scores.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = scores.iter().sum::<i64>() as f64 / n as f64;

    let mut cov = 0.0;
    let mut var = 0.0;
    for (i, &y) in scores.iter().enumerate() {
        let dx = i as f64 - x_mean;
        cov += dx * (y as f64 - y_mean);
        var += dx * dx;
    }

    if var < 1e-12 { 0.0 } else { cov / var }
}

/// Scan backward from the most recent score for the trailing run of a
/// single non-steady direction.
///
/// Steady steps at the tail defer to the first non-steady step's
/// direction; a steady step *after* a run has started breaks it. Under 2
/// samples the streak is steady with length 1.
pub fn streak(scores: &[i64]) -> Streak {
    if scores.len() < 2 {
        return Streak { direction: Direction::Steady, length: 1 };
    }

    let mut direction = Direction::Steady;
    let mut length = 1;

    for i in (1..scores.len()).rev() {
        let diff = scores[i] - scores[i - 1];
        let step = if diff > 0 {
            Direction::Up
        } else if diff < 0 {
            Direction::Down
        } else {
            Direction::Steady
        };

        if direction == Direction::Steady {
            direction = step;
            length = 1;
        } else if step == direction {
            length += 1;
        } else {
            break;
        }
    }

    Streak { direction, length }
}
