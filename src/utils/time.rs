//! Time utility functions

use std::time::Duration;

/// Convert duration to milliseconds
pub fn duration_to_ms(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

/// Interpret a `*_secs` setting where zero means "no limit"
pub fn optional_secs(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}
