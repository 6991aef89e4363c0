pub mod stability;
pub mod tone;

use md5::{Digest, Md5};

use crate::{QSCORE_MIN, QSCORE_MAX};
use self::tone::Tone;

/// Jitter is drawn from [-15, +15] — a 31-value span.
const JITTER_SPAN: u32 = 31;

/// Raw synthesis result for a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawScore {
    pub qscore: i64,
    pub tone: Tone,
}

/// Synthesize a raw Q-Score from a message.
///
/// Tone picks the base value, composure shifts it by up to ±25, and a
/// content-hash jitter spreads identical-base messages by up to ±15. Total
/// pure function of the text: the same message always scores the same.
pub fn synthesize(message: &str) -> RawScore {
    let tone = tone::classify(message);
    let composure = stability::composure(message);

    let adjusted = tone.base() + (composure - 50).div_euclid(2);
    let qscore = (adjusted + jitter(message)).clamp(QSCORE_MIN, QSCORE_MAX);

    RawScore { qscore, tone }
}

/// Deterministic pseudo-random offset in [-15, +15].
///
/// First 4 bytes of the MD5 digest, big-endian, reduced mod 31 and
/// re-centered. MD5 keeps the vectors identical to the reference
/// implementation; nothing here is security-sensitive.
pub fn jitter(message: &str) -> i64 {
    let digest = Md5::digest(message.as_bytes());
    let v = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (v % JITTER_SPAN) as i64 - 15
}
