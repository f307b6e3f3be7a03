//! Wall-clock helpers
//!
//! The core timestamps everything in Unix milliseconds. Services accept
//! explicit timestamps so tests stay deterministic; only the outermost
//! entry points read the wall clock.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as Unix milliseconds
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}
