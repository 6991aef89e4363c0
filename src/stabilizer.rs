//! Score stabilization: quantize to band midpoints, then exponentially
//! smooth against the previous persisted score so near-identical inputs
//! can't jitter the displayed band back and forth.

use crate::ranges;

/// EMA weight of the incoming quantized score. The previous persisted
/// score keeps the remaining 0.7.
pub const SMOOTHING_ALPHA: f64 = 0.3;

/// Drop lines that normalize identically to an earlier line, preserving
/// first-occurrence order. Normalization: lowercase, trim, collapse runs
/// of whitespace.
pub fn dedup_lines<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut kept = Vec::new();
    for line in lines {
        let norm = normalize_line(line.as_ref());
        if seen.insert(norm) {
            kept.push(line.as_ref().to_string());
        }
    }
    kept
}

fn normalize_line(line: &str) -> String {
    line.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Snap a raw score to its band's midpoint (150/250/350/450/550).
pub fn quantize(raw: i64) -> i64 {
    ranges::classify(raw).midpoint
}

/// Exponential smoothing against the previous persisted score.
/// With no previous score the quantized value passes through.
pub fn smooth(previous: Option<i64>, quantized: i64, alpha: f64) -> i64 {
    match previous {
        None => quantized,
        Some(prev) => (prev as f64 * (1.0 - alpha) + quantized as f64 * alpha).round() as i64,
    }
}

/// Quantize-then-smooth. Callers must re-derive the band from the result —
/// smoothing can land in a different band than the raw score did.
pub fn stabilize(raw: i64, previous: Option<i64>, alpha: f64) -> i64 {
    smooth(previous, quantize(raw), alpha)
}
