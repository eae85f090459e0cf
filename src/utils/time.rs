//! Time utilities
//!
//! Safe time operations that never panic on clock issues.

use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Get current Unix timestamp (seconds since epoch)
///
/// Returns 0 if system time is before epoch (should never happen).
pub fn current_timestamp() -> u64 {
    current_timestamp_duration().as_secs()
}

/// Get current Unix timestamp as Duration
pub fn current_timestamp_duration() -> std::time::Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| {
            warn!("System time is before UNIX epoch, using zero duration");
            std::time::Duration::from_secs(0)
        })
}
