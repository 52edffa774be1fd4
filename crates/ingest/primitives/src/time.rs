//! Wall clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds in an hour.
pub const SECS_PER_HOUR: u64 = 3_600;

/// Returns the current time in seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}
