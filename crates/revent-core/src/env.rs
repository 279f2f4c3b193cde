//! Environment variable utilities
//!
//! Generic `env_get<T>` parsing with defaults, used by the config layer
//! and the logger.

use std::str::FromStr;

/// Get an environment variable parsed as `T`, or the default.
///
/// ```ignore
/// let workers: usize = env_get("REV_NUM_WORKERS", 4);
/// let timeout: u64 = env_get("REV_IDLE_TIMEOUT_MS", 2000);
/// ```
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Get an environment variable as a boolean.
///
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true; anything
/// else (including unset) yields the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
