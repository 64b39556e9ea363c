//! Demo settings read from the environment

use std::time::Duration;

/// Default number of concurrent requests fired after the token expires
pub const DEFAULT_CALLERS: usize = 12;

/// Number of concurrent callers (`REFRESH_DEMO_CALLERS`)
pub fn callers() -> usize {
    std::env::var("REFRESH_DEMO_CALLERS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_CALLERS)
}

/// Artificial latency of the mock refresh endpoint (`REFRESH_DEMO_DELAY_MS`)
pub fn refresh_delay() -> Duration {
    let ms = std::env::var("REFRESH_DEMO_DELAY_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(300);
    Duration::from_millis(ms)
}
