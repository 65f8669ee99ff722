//! CLI configuration management

use anyhow::{Context, Result};
use litmus_client::ClientConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Get the configuration directory path
pub fn config_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("litmus")
    }

    #[cfg(not(target_os = "windows"))]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".litmus")
    }
}

/// Get the config file path
pub fn config_file() -> PathBuf {
    config_dir().join("config.yml")
}

/// Get the logs directory
pub fn logs_dir() -> PathBuf {
    config_dir().join("logs")
}

/// Ensure all config directories exist
pub fn ensure_dirs() -> Result<()> {
    fs::create_dir_all(config_dir()).context("Failed to create config directory")?;
    fs::create_dir_all(logs_dir()).context("Failed to create logs directory")?;
    Ok(())
}

/// Main configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Platform URL (default: http://localhost:8000)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Live channel URL; derived from `api_url` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl Config {
    /// Load config from file
    pub fn load() -> Result<Self> {
        let path = config_file();

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        Self::parse(&content)
    }

    fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).context("Failed to parse config file")
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        ensure_dirs()?;
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;
        fs::write(config_file(), content).context("Failed to write config file")?;
        Ok(())
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_url: Option<String>,
    pub ws_url: Option<String>,
}

/// Resolve the client configuration
///
/// Each field comes from the first of: command-line flag, environment
/// variable, config file, built-in default.
pub fn resolve(overrides: &Overrides) -> Result<ClientConfig> {
    let file = Config::load()?;
    resolve_with(overrides, |key| std::env::var(key).ok(), &file)
}

fn resolve_with<F>(overrides: &Overrides, lookup: F, file: &Config) -> Result<ClientConfig>
where
    F: Fn(&str) -> Option<String>,
{
    // Environment first; the file only fills what the environment leaves unset
    let mut config = ClientConfig::from_lookup(|key| {
        lookup(key).or_else(|| match key {
            "LITMUS_API_URL" => file.api_url.clone(),
            "LITMUS_WS_URL" => file.ws_url.clone(),
            "LITMUS_REQUEST_TIMEOUT_SECS" => file.request_timeout_secs.map(|s| s.to_string()),
            _ => None,
        })
    })
    .context("Invalid client configuration")?;

    if let Some(api_url) = &overrides.api_url {
        let explicit_ws = overrides.ws_url.is_some()
            || lookup("LITMUS_WS_URL").is_some()
            || file.ws_url.is_some();
        let ws_url = config.ws_url.clone();
        let timeout = config.request_timeout;

        config = ClientConfig::new(api_url.as_str());
        config.request_timeout = timeout;
        if explicit_ws {
            config = config.with_ws_url(ws_url);
        }
    }
    if let Some(ws_url) = &overrides.ws_url {
        config = config.with_ws_url(ws_url.as_str());
    }

    config.validate().context("Invalid client configuration")?;
    tracing::debug!("Using API {} and live channel {}", config.api_url, config.ws_url);
    Ok(config)
}

/// Default request timeout as shown by `litmus config`
pub fn describe_timeout(timeout: Duration) -> String {
    format!("{}s", timeout.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn file(api_url: Option<&str>, ws_url: Option<&str>) -> Config {
        Config {
            api_url: api_url.map(str::to_string),
            ws_url: ws_url.map(str::to_string),
            request_timeout_secs: Some(30),
        }
    }

    #[test]
    fn test_default_when_nothing_configured() {
        let config = resolve_with(&Overrides::default(), env(&[]), &Config::default()).unwrap();
        assert_eq!(config.api_url, "http://localhost:8000");
        assert_eq!(config.ws_url, "ws://localhost:8000");
    }

    #[test]
    fn test_file_fills_unset_env() {
        let config = resolve_with(
            &Overrides::default(),
            env(&[]),
            &file(Some("https://litmus.example.com"), None),
        )
        .unwrap();
        assert_eq!(config.api_url, "https://litmus.example.com");
        assert_eq!(config.ws_url, "wss://litmus.example.com");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_env_beats_file() {
        let config = resolve_with(
            &Overrides::default(),
            env(&[("LITMUS_API_URL", "http://staging:8000")]),
            &file(Some("https://litmus.example.com"), None),
        )
        .unwrap();
        assert_eq!(config.api_url, "http://staging:8000");
        assert_eq!(config.ws_url, "ws://staging:8000");
    }

    #[test]
    fn test_flag_beats_env_and_rederives_ws_url() {
        let overrides = Overrides {
            api_url: Some("https://prod.example.com".to_string()),
            ws_url: None,
        };
        let config = resolve_with(
            &overrides,
            env(&[("LITMUS_API_URL", "http://staging:8000")]),
            &file(None, None),
        )
        .unwrap();
        assert_eq!(config.api_url, "https://prod.example.com");
        assert_eq!(config.ws_url, "wss://prod.example.com");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_explicit_ws_url_survives_api_flag() {
        let overrides = Overrides {
            api_url: Some("https://prod.example.com".to_string()),
            ws_url: None,
        };
        let config = resolve_with(
            &overrides,
            env(&[]),
            &file(None, Some("wss://push.example.com")),
        )
        .unwrap();
        assert_eq!(config.ws_url, "wss://push.example.com");
    }

    #[test]
    fn test_invalid_flag_is_rejected() {
        let overrides = Overrides {
            api_url: None,
            ws_url: Some("http://not-a-socket".to_string()),
        };
        assert!(resolve_with(&overrides, env(&[]), &Config::default()).is_err());
    }

    #[test]
    fn test_config_file_round_trip() {
        let config = file(Some("https://litmus.example.com"), None);
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("ws_url"));
        assert_eq!(Config::parse(&yaml).unwrap(), config);
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }
}
