//! Client configuration resolved once at startup
//!
//! A `ClientConfig` is built once and handed to the transport and the report
//! controller by reference; nothing reads the environment after that.

use crate::backoff::ReconnectPolicy;
use litmus_common::constants::{self, API_PREFIX};
use std::env;
use std::time::Duration;

/// Default per-request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default number of retries for idempotent GETs
const DEFAULT_GET_RETRIES: u32 = 2;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL (e.g., "https://litmus.example.com")
    pub api_url: String,

    /// WebSocket base URL (e.g., "wss://litmus.example.com")
    pub ws_url: String,

    /// Timeout applied to every REST call
    pub request_timeout: Duration,

    /// Retries for GET requests on network failure or 5xx
    pub get_retries: u32,

    /// Live channel reconnect schedule
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(constants::DEFAULT_API_URL)
    }
}

impl ClientConfig {
    /// Config for an API URL, deriving the WebSocket URL from it
    pub fn new(api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self {
            ws_url: websocket_url(&api_url),
            api_url,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            get_retries: DEFAULT_GET_RETRIES,
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// `LITMUS_API_URL`, `LITMUS_WS_URL` and `LITMUS_REQUEST_TIMEOUT_SECS`;
    /// anything unset falls back to the local default.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("LITMUS_API_URL").unwrap_or_else(|| constants::DEFAULT_API_URL.to_string());
        let mut config = Self::new(api_url);

        if let Some(ws_url) = lookup("LITMUS_WS_URL") {
            config.ws_url = ws_url.trim_end_matches('/').to_string();
        }

        if let Some(raw) = lookup("LITMUS_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidNumber("LITMUS_REQUEST_TIMEOUT_SECS", raw.clone()))?;
            config.request_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Override the WebSocket URL
    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = ws_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Check URL schemes
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl("api_url", self.api_url.clone()));
        }
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidUrl("ws_url", self.ws_url.clone()));
        }
        Ok(())
    }

    /// Base for REST paths (API URL plus version prefix)
    pub fn rest_base(&self) -> String {
        format!("{}{}", self.api_url, API_PREFIX)
    }

    /// Live report channel URL for an experiment
    pub fn live_url(&self, experiment_id: &str) -> String {
        format!("{}{}{}", self.ws_url, API_PREFIX, constants::live_path(experiment_id))
    }
}

/// Get WebSocket URL from an HTTP URL
pub fn websocket_url(api_url: &str) -> String {
    let ws_scheme = if api_url.starts_with("https://") {
        "wss"
    } else {
        "ws"
    };
    let host = api_url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    format!("{}://{}", ws_scheme, host)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid {0}: {1} (check the URL scheme)")]
    InvalidUrl(&'static str, String),

    #[error("Invalid number in {0}: {1}")]
    InvalidNumber(&'static str, String),
}
