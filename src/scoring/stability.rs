/// Score how composed a message reads, 0-100 (higher = calmer).
///
/// Instability is accumulated from surface features — exclamation/question
/// density, shouting caps, repeated-character runs — then normalized by
/// message length so long messages aren't penalized for volume alone.
pub fn composure(message: &str) -> i64 {
    // Empty message -> length 1 -> no instability -> 100.
    let length = message.chars().count().max(1);

    let exclaim_q = message.chars().filter(|&c| c == '!' || c == '?').count() as f64;
    let caps = message
        .chars()
        .filter(|c| c.is_alphabetic() && c.is_uppercase())
        .count() as f64;
    let repeats = repeated_runs(message) as f64;

    let raw_instability = exclaim_q * 1.2 + (caps - 10.0).max(0.0) * 0.5 + repeats * 2.0;
    let normalized = raw_instability / (1.0 + length as f64 / 120.0);

    (100 - (normalized * 3.0).round() as i64).clamp(0, 100)
}

/// Count maximal runs of 3+ identical consecutive characters.
/// "soooo goooood" has two runs; "aaaaaa" has one.
fn repeated_runs(message: &str) -> usize {
    let mut runs = 0;
    let mut prev: Option<char> = None;
    let mut run_len = 0;

    for c in message.chars() {
        if Some(c) == prev {
            run_len += 1;
            if run_len == 3 {
                runs += 1;
            }
        } else {
            prev = Some(c);
            run_len = 1;
        }
    }
    runs
}
