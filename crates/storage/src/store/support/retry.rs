#![forbid(unsafe_code)]

use super::super::StoreError;
use std::time::Duration;

/// Re-runs a read while SQLite reports busy/locked. Every other error is
/// returned on first occurrence.
pub(in crate::store) fn with_read_retry<T>(
    attempts: u32,
    mut read: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match read() {
            Err(err) if err.is_transient() && attempt < attempts => {
                tracing::debug!(attempt, error = %err, "retrying transient read");
                std::thread::sleep(Duration::from_millis(20 * u64::from(attempt)));
                attempt += 1;
            }
            other => return other,
        }
    }
}
