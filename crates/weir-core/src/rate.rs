//! Numeric semantics for relative-rate conversion.
//!
//! All item-count scaling in the engine rounds half away from zero on
//! widened unsigned values. Rates are always positive, so that reduces to
//! `floor(x + 0.5)`.

/// Round a nonnegative scaled item count to the nearest integer, half away
/// from zero.
pub fn round_rate(value: f64) -> u64 {
    debug_assert!(value >= 0.0, "rates and item counts are nonnegative");
    (value + 0.5) as u64
}

/// Scale a stream offset across a rate boundary: `round(offset * rate)`.
pub fn scale_offset(offset: u64, rate: f64) -> u64 {
    round_rate(offset as f64 * rate)
}

#[cfg(test)]
mod tests {
    use super::{round_rate, scale_offset};

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_rate(0.0), 0);
        assert_eq!(round_rate(0.49), 0);
        assert_eq!(round_rate(0.5), 1);
        assert_eq!(round_rate(2.5), 3);
        assert_eq!(round_rate(511.999), 512);
    }

    #[test]
    fn scales_offsets_by_rate() {
        assert_eq!(scale_offset(10, 2.0), 20);
        assert_eq!(scale_offset(30, 2.0), 60);
        assert_eq!(scale_offset(256, 0.5), 128);
        assert_eq!(scale_offset(3, 0.5), 2); // 1.5 rounds up
    }
}
