use std::time::Duration;

/// Largest exponent applied to the base delay (2^16 times the base).
const MAX_EXPONENT: u32 = 16;

/// Returns the delay before retry `attempt` (1-based) when doubling from `base`.
///
/// Attempt 1 waits `base`, attempt 2 waits `2 * base`, and so on, capped at
/// `max`.
pub fn exponential_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
    base.saturating_mul(2u32.pow(exponent)).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delay() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(60);
        assert_eq!(exponential_delay(base, 0, max), Duration::from_secs(1));
        assert_eq!(exponential_delay(base, 1, max), Duration::from_secs(1));
        assert_eq!(exponential_delay(base, 2, max), Duration::from_secs(2));
        assert_eq!(exponential_delay(base, 4, max), Duration::from_secs(8));
        assert_eq!(exponential_delay(base, 7, max), Duration::from_secs(60));
        assert_eq!(exponential_delay(base, u32::MAX, max), Duration::from_secs(60));
    }
}
