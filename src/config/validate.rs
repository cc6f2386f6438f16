//! CLI value validation: a negative duration falls back to the
//! default rather than erroring, matching the original daemon's
//! argument parsing.

use tracing::warn;

use super::{DEFAULT_RESTART_GRACE_PERIOD_SECS, DEFAULT_SYNC_INTERVAL_SECS};

pub fn validate_sync_interval(value: f64) -> f64 {
    if value < 0.0 {
        warn!(value, "negative --sync-interval, falling back to default");
        DEFAULT_SYNC_INTERVAL_SECS
    } else {
        value
    }
}

pub fn validate_grace_period(value: i64) -> i64 {
    if value < 0 {
        warn!(value, "negative --restart-grace-period, falling back to default");
        DEFAULT_RESTART_GRACE_PERIOD_SECS
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_sync_interval_falls_back() {
        assert_eq!(validate_sync_interval(-1.0), DEFAULT_SYNC_INTERVAL_SECS);
        assert_eq!(validate_sync_interval(2.5), 2.5);
    }

    #[test]
    fn negative_grace_period_falls_back() {
        assert_eq!(validate_grace_period(-5), DEFAULT_RESTART_GRACE_PERIOD_SECS);
        assert_eq!(validate_grace_period(30), 30);
    }
}
