//! Daemon configuration from environment variables.

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use calflow_session::{DEFAULT_CAPACITY, PollerConfig};

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the bridge listens on.
    pub bind_addr: SocketAddr,
    /// Base URL of the extraction backend.
    pub backend_url: String,
    /// Directory persisted state lives under.
    pub data_dir: PathBuf,
    /// Session cache capacity.
    pub cache_capacity: usize,
    /// Poll pacing and budget.
    pub poll: PollerConfig,
}

impl Config {
    /// Read configuration, falling back to defaults for anything unset or
    /// unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_parsed("CALFLOW_BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 8787))),
            backend_url: std::env::var("CALFLOW_BACKEND_URL")
                .unwrap_or_else(|_| "https://api.calflow.app".to_string()),
            data_dir: std::env::var("CALFLOW_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_data_dir()),
            cache_capacity: env_parsed("CALFLOW_CACHE_CAPACITY", DEFAULT_CAPACITY),
            poll: PollerConfig {
                interval: Duration::from_secs(env_parsed("CALFLOW_POLL_INTERVAL_SECS", 2)),
                max_duration: Duration::from_secs(env_parsed("CALFLOW_POLL_TIMEOUT_SECS", 300)),
            },
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("calflow")
}

fn env_parsed<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variables_fall_back_to_defaults() {
        assert_eq!(env_parsed("CALFLOW_TEST_NEVER_SET", 42_usize), 42);
        assert_eq!(
            env_parsed(
                "CALFLOW_TEST_NEVER_SET",
                SocketAddr::from(([127, 0, 0, 1], 8787))
            )
            .port(),
            8787
        );
    }

    #[test]
    fn default_data_dir_ends_with_app_name() {
        assert!(default_data_dir().ends_with("calflow"));
    }
}
