//! Environment variable parsing helpers shared by the option types.

use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Parse an environment variable with a default fallback.
pub(crate) fn parse_env_with_default<T: FromStr>(key: &str, default: T) -> T {
    parse_env_optional(key).unwrap_or(default)
}

/// Parse an environment variable, `None` if missing or unparsable.
pub(crate) fn parse_env_optional<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Read a millisecond duration. Zero or negative values fall back to `default`.
pub(crate) fn duration_ms_from_env(key: &str, default: Duration) -> Duration {
    match parse_env_optional::<i64>(key) {
        Some(ms) if ms > 0 => Duration::from_millis(ms as u64),
        Some(ms) => {
            warn!(key, value = ms, default_ms = default.as_millis() as u64, "non-positive duration, using default");
            default
        }
        None => default,
    }
}
