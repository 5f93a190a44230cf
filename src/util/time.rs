//! Time utilities for liveness checks and round timing

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Age of a timestamp, zero if it lies in the future
pub fn age(ts: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - ts).to_std().unwrap_or(Duration::ZERO)
}

/// Whether `ts` is strictly more than `window` before `now`
pub fn older_than(ts: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    age(ts, now) > window
}

/// Seconds (with millisecond precision) between two instants
pub fn elapsed_secs(since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    age(since, now).as_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_older_than_is_strict() {
        let now = Utc::now();
        let window = Duration::from_secs(30);
        assert!(!older_than(now - chrono::Duration::seconds(30), now, window));
        assert!(older_than(now - chrono::Duration::seconds(31), now, window));
        assert!(!older_than(now + chrono::Duration::seconds(5), now, window));
    }

    #[test]
    fn test_elapsed_secs() {
        let now = Utc::now();
        assert_eq!(elapsed_secs(now - chrono::Duration::milliseconds(12_500), now), 12.5);
        assert_eq!(elapsed_secs(now + chrono::Duration::seconds(1), now), 0.0);
    }
}
