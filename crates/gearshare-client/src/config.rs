//! Client configuration.
//!
//! Loaded from TOML, then overridden from the environment:
//!
//! ```toml
//! api_base_url = "https://gear.example.com/api"
//! hub_path = "/hubs/chat"
//!
//! [reconnect]
//! max_attempts = 5
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//! ```

use crate::error::ConfigError;
use crate::policy::ReconnectPolicy;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const API_URL_ENV: &str = "GEARSHARE_API_URL";
pub const HUB_PATH_ENV: &str = "GEARSHARE_HUB_PATH";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// REST base address; the hub lives beside it.
    pub api_base_url: String,
    pub hub_path: String,
    pub reconnect: ReconnectConfig,
    /// How often [`wait_for_connection`](crate::ChatConnection::wait_for_connection) polls.
    pub poll_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub keep_alive_interval_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".to_string(),
            hub_path: "/hubs/chat".to_string(),
            reconnect: ReconnectConfig::default(),
            poll_interval_ms: 100,
            connect_timeout_ms: 30_000,
            keep_alive_interval_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

impl ChatConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Read a TOML file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&text)?.with_env_overrides())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            self.api_base_url = url;
        }
        if let Ok(path) = std::env::var(HUB_PATH_ENV) {
            self.hub_path = path;
        }
        self
    }

    /// Hub endpoint: the API base with its `/api` suffix replaced by the hub path.
    pub fn hub_url(&self) -> Result<HubUrl, ConfigError> {
        let base = self.api_base_url.trim_end_matches('/');
        let base = base.strip_suffix("/api").unwrap_or(base);
        let path = self.hub_path.trim_start_matches('/');
        HubUrl::parse(&format!("{base}/{path}"))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect.max_attempts,
            base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms.max(1))
    }
}

/// Validated hub endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubUrl(Url);

impl HubUrl {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(s).map_err(|source| ConfigError::InvalidUrl {
            url: s.to_string(),
            source,
        })?;
        match url.scheme() {
            "http" | "https" | "ws" | "wss" => Ok(Self(url)),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }

    /// WebSocket form of the endpoint carrying `token` as `access_token`.
    pub fn websocket_url(&self, token: &str) -> Url {
        let mut url = self.0.clone();
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        // Switching between special schemes cannot fail.
        let _ = url.set_scheme(scheme);
        url.query_pairs_mut().append_pair("access_token", token);
        url
    }
}

impl fmt::Display for HubUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_url_strips_api_suffix() {
        let config = ChatConfig {
            api_base_url: "https://gear.example.com/api/".into(),
            ..ChatConfig::default()
        };
        assert_eq!(
            config.hub_url().unwrap().to_string(),
            "https://gear.example.com/hubs/chat"
        );
    }

    #[test]
    fn hub_url_without_api_suffix() {
        let config = ChatConfig {
            api_base_url: "http://10.0.2.2:5000".into(),
            hub_path: "chathub".into(),
            ..ChatConfig::default()
        };
        assert_eq!(
            config.hub_url().unwrap().to_string(),
            "http://10.0.2.2:5000/chathub"
        );
    }

    #[test]
    fn websocket_url_carries_token() {
        let hub = HubUrl::parse("https://gear.example.com/hubs/chat").unwrap();
        let ws = hub.websocket_url("a.b c");
        assert_eq!(ws.scheme(), "wss");
        assert_eq!(ws.query(), Some("access_token=a.b+c"));
    }

    #[test]
    fn rejects_unsupported_scheme() {
        assert!(matches!(
            HubUrl::parse("ftp://gear.example.com/hubs/chat"),
            Err(ConfigError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            HubUrl::parse("not a url"),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn parse_toml_with_defaults() {
        let config = ChatConfig::from_toml_str(
            r#"
            api_base_url = "https://gear.example.com/api"

            [reconnect]
            max_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.hub_path, "/hubs/chat");
        let policy = config.reconnect_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
    }
}
