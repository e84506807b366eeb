//! Wraparound mapping of formula results into the 8-bit channel domain.
//!
//! Formulas routinely produce values far outside `[0, 255]` (`x*y` on a wide
//! canvas, `r - 3s` after a few passes). Those values wrap cyclically modulo
//! 256 instead of saturating, which is what makes the animations cycle.

const CHANNEL_PERIOD: f64 = 256.0;

/// Fold a raw formula result into `[0, 255]` modulo 256, rounding to the
/// nearest integer.
///
/// Non-finite input maps to 0. Use [`try_clamp_channel`] to tell the two
/// apart.
#[inline]
pub fn clamp_channel(raw: f64) -> u8 {
    try_clamp_channel(raw).unwrap_or(0)
}

/// Like [`clamp_channel`], but reports a non-finite input as `None`.
#[inline]
pub fn try_clamp_channel(raw: f64) -> Option<u8> {
    if !raw.is_finite() {
        return None;
    }

    let mut value = raw;
    if value < 0.0 {
        value -= (value / CHANNEL_PERIOD).floor() * CHANNEL_PERIOD;
    }

    // 255.5 and above round up to 256, which is 0 again.
    let rounded = (value % CHANNEL_PERIOD).round() as u32;
    Some((rounded % 256) as u8)
}
