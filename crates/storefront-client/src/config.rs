//! Configuration loading and validation for the storefront CLI.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Validated client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the storefront API.
    #[serde(rename = "storefront_api_url", default = "default_api_url")]
    pub api_url: String,

    /// Directory holding the persisted session and cart.
    #[serde(rename = "storefront_state_dir", default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Tracing log level. Quiet by default so command output stays readable.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Per-request timeout in seconds.
    #[serde(rename = "storefront_timeout_secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "http://localhost:8080".into()
}
fn default_state_dir() -> PathBuf {
    PathBuf::from(".storefront")
}
fn default_log_level() -> String {
    "warn".into()
}
fn default_timeout_secs() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            state_dir: default_state_dir(),
            log_level: default_log_level(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ClientConfig {
    /// Read configuration from environment variables without validating it.
    ///
    /// Callers apply command-line overrides and then call [`validate`](Self::validate).
    pub fn load_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build client configuration")?;

        cfg.try_deserialize()
            .context("failed to deserialise client configuration")
    }

    /// Replace the API URL and state directory where an override is given.
    pub fn with_overrides(mut self, api_url: Option<String>, state_dir: Option<PathBuf>) -> Self {
        if let Some(url) = api_url {
            self.api_url = url;
        }
        if let Some(dir) = state_dir {
            self.state_dir = dir;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.api_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("STOREFRONT_API_URL must be an http(s) URL");
        }
        if self.state_dir.as_os_str().is_empty() {
            anyhow::bail!("STOREFRONT_STATE_DIR must not be empty");
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("STOREFRONT_TIMEOUT_SECS must be > 0");
        }
        Ok(())
    }
}
