pub mod feed;
pub mod tracker;
pub mod types;

use chrono::Utc;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
