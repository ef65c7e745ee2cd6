//! Launcher configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Load fragments from disk instead of `{base_url}/static/components`.
    pub components_dir: Option<PathBuf>,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl AppConfig {
    /// Build config from environment variables.
    ///
    /// Optional:
    /// - `LAUNCHPAD_BASE_URL`: default `http://127.0.0.1:8000`
    /// - `LAUNCHPAD_API_KEY`: bearer key for `/api/v1`
    /// - `LAUNCHPAD_COMPONENTS_DIR`: read fragments from this directory
    /// - `LAUNCHPAD_POLL_INTERVAL_MS`: default 5000
    /// - `LAUNCHPAD_REQUEST_TIMEOUT_SECS`: default 30
    /// - `LAUNCHPAD_CONNECT_TIMEOUT_SECS`: default 10
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
        let parse = |key: &str, default: u64| lookup_parse(&non_empty, key, default);

        Self {
            base_url: non_empty("LAUNCHPAD_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned())
                .trim_end_matches('/')
                .to_owned(),
            api_key: non_empty("LAUNCHPAD_API_KEY"),
            components_dir: non_empty("LAUNCHPAD_COMPONENTS_DIR").map(PathBuf::from),
            poll_interval: Duration::from_millis(parse("LAUNCHPAD_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)),
            request_timeout: Duration::from_secs(parse("LAUNCHPAD_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)),
            connect_timeout: Duration::from_secs(parse("LAUNCHPAD_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn lookup_parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    lookup(key).and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
