//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay before reconnect attempt number `attempt`.
///
/// Attempt 0 is immediate. After that the delay doubles from `base_ms`, is
/// capped at `max_ms`, and gains up to 10% random jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
    let capped = base_ms.saturating_mul(factor).min(max_ms);

    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_is_immediate() {
        assert_eq!(calculate_backoff(0, 100, 2000), Duration::ZERO);
    }

    #[test]
    fn delay_doubles_within_jitter() {
        for (attempt, expected) in [(1, 100u128), (2, 200), (3, 400)] {
            let delay = calculate_backoff(attempt, 100, 10_000).as_millis();
            assert!(delay >= expected && delay < expected + expected / 10 + 1, "attempt {attempt}: {delay}");
        }
    }

    #[test]
    fn delay_is_capped() {
        let delay = calculate_backoff(40, 100, 1000).as_millis();
        assert!((1000..1100).contains(&delay));

        let huge = calculate_backoff(u32::MAX, 100, 5000).as_millis();
        assert!((5000..5500).contains(&huge));
    }
}
