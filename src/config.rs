//! Configuration Module
//!
//! Client settings resolved from the environment.

use std::path::PathBuf;
use std::time::Duration;

/// Backend the dashboard talks to when nothing else is configured
pub const DEFAULT_API_URL: &str = "http://localhost:8002";

/// Default per-request timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the auth/user API
    pub api_base_url: String,

    /// Per-request timeout
    pub request_timeout: Duration,

    /// Directory holding the persisted session record
    pub data_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            data_dir: default_data_dir(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DASHBOARD_API_URL") {
            if !url.trim().is_empty() {
                config.api_base_url = url;
            }
        }

        if let Ok(val) = std::env::var("DASHBOARD_API_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.request_timeout = Duration::from_secs(secs);
            }
        }

        if let Ok(dir) = std::env::var("DASHBOARD_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }

        config
    }
}

/// Per-user application data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("SaasDashboard")
}
