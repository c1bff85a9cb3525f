use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Location of the registry server plus client-side query defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub host: String,
    pub port: u16,
    /// How long a discovery query may block waiting for a matching healthy
    /// instance. `0` returns immediately.
    pub discovery_wait_secs: u64,
    /// ACL token sent with every request.
    pub token: Option<String>,
    /// Datacenter to query; the agent's own datacenter when unset.
    pub datacenter: Option<String>,
    /// Timeout for a single non-blocking round-trip.
    pub request_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8500,
            discovery_wait_secs: 0,
            token: None,
            datacenter: None,
            request_timeout_ms: 5_000,
        }
    }
}

impl RegistryConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_discovery_wait(mut self, secs: u64) -> Self {
        self.discovery_wait_secs = secs;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// `host:port` of the registry.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[inline]
    pub fn discovery_wait(&self) -> Duration {
        Duration::from_secs(self.discovery_wait_secs)
    }

    #[inline]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_points_at_local_agent() {
        let cfg = RegistryConfig::default();
        assert_eq!(cfg.address(), "127.0.0.1:8500");
        assert_eq!(cfg.discovery_wait(), Duration::ZERO);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_host_and_zero_port() {
        assert_eq!(
            RegistryConfig::new(" ", 8500).validate(),
            Err(ConfigError::EmptyHost)
        );
        assert_eq!(
            RegistryConfig::new("consul", 0).validate(),
            Err(ConfigError::ZeroPort)
        );
    }

    #[test]
    fn deserializes_partial_documents_with_defaults() {
        let cfg: RegistryConfig =
            serde_json::from_str(r#"{"host":"consul.internal","discovery_wait_secs":3}"#).unwrap();
        assert_eq!(cfg.host, "consul.internal");
        assert_eq!(cfg.port, 8500);
        assert_eq!(cfg.discovery_wait_secs, 3);
        assert_eq!(cfg.request_timeout_ms, 5_000);
    }
}
