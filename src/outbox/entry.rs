//! Backoff arithmetic shared by the dispatcher and its tests (C7, spec §4.7).

/// Exponential backoff: `base_ms * 2^attempts`, capped at `max_ms`. `attempts`
/// is the number of attempts already made, so the delay before the *first*
/// retry (`attempts == 1`) is `2 * base_ms`.
pub fn next_backoff_ms(attempts: u32, base_ms: u64, max_ms: u64) -> u64 {
    let shift = attempts.min(32);
    base_ms.saturating_mul(1u64 << shift).min(max_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially_until_capped() {
        assert_eq!(next_backoff_ms(0, 500, 60_000), 500);
        assert_eq!(next_backoff_ms(1, 500, 60_000), 1_000);
        assert_eq!(next_backoff_ms(2, 500, 60_000), 2_000);
        assert_eq!(next_backoff_ms(10, 500, 60_000), 60_000);
    }

    #[test]
    fn never_overflows_on_large_attempts() {
        assert_eq!(next_backoff_ms(1000, 500, 60_000), 60_000);
    }
}
