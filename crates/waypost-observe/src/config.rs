use std::io::IsTerminal;

use serde::{Deserialize, Serialize};

use crate::{error::LoggerError, format::LoggerFormat};

/// Filter directive variable, `RUST_LOG` syntax.
pub const LOG_ENV: &str = "WAYPOST_LOG";
/// Output format variable: `text`, `json` or `journald`.
pub const LOG_FORMAT_ENV: &str = "WAYPOST_LOG_FORMAT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    /// Base level or full filter directive (`info`, `warn,waypost_registry=debug`).
    pub level: String,
    /// Extra per-target directives appended to `level`.
    pub directives: Vec<String>,
    pub with_targets: bool,
    pub use_color: bool,
    /// Journald `SYSLOG_IDENTIFIER`; the executable name when unset.
    pub syslog_identifier: Option<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LoggerFormat::Text,
            level: "info".to_string(),
            directives: Vec::new(),
            with_targets: true,
            use_color: std::io::stdout().is_terminal(),
            syslog_identifier: None,
        }
    }
}

impl LoggerConfig {
    pub fn json() -> Self {
        Self {
            format: LoggerFormat::Json,
            use_color: false,
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Defaults overridden by [`LOG_ENV`] and [`LOG_FORMAT_ENV`].
    pub fn from_env() -> Result<Self, LoggerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, LoggerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(level) = lookup(LOG_ENV).filter(|v| !v.trim().is_empty()) {
            cfg.level = level.trim().to_string();
        }
        if let Some(format) = lookup(LOG_FORMAT_ENV).filter(|v| !v.trim().is_empty()) {
            cfg.format = format.parse()?;
        }
        if cfg.format != LoggerFormat::Text {
            cfg.use_color = false;
        }
        Ok(cfg)
    }

    /// Full filter directive string handed to the env filter.
    pub fn filter(&self) -> String {
        std::iter::once(self.level.trim())
            .chain(self.directives.iter().map(|d| d.trim()))
            .filter(|d| !d.is_empty())
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn lookup_overrides_defaults() {
        let cfg = LoggerConfig::from_lookup(env(&[
            (LOG_ENV, "debug,hyper=warn"),
            (LOG_FORMAT_ENV, "json"),
        ]))
        .unwrap();
        assert_eq!(cfg.level, "debug,hyper=warn");
        assert_eq!(cfg.format, LoggerFormat::Json);
        assert!(!cfg.use_color);
    }

    #[test]
    fn empty_lookup_keeps_defaults() {
        let cfg = LoggerConfig::from_lookup(env(&[(LOG_ENV, "  ")])).unwrap();
        assert_eq!(cfg.level, "info");
        assert_eq!(cfg.format, LoggerFormat::Text);
    }

    #[test]
    fn bad_format_is_reported() {
        let err = LoggerConfig::from_lookup(env(&[(LOG_FORMAT_ENV, "xml")])).unwrap_err();
        assert!(matches!(err, LoggerError::InvalidFormat(_)));
    }

    #[test]
    fn filter_joins_directives() {
        let cfg = LoggerConfig::default()
            .with_level("warn")
            .with_directive("waypost_registry=debug")
            .with_directive(" ");
        assert_eq!(cfg.filter(), "warn,waypost_registry=debug");
    }

    #[test]
    fn deserializes_partial_config() {
        let cfg: LoggerConfig =
            serde_json::from_str(r#"{"format":"json","level":"trace"}"#).unwrap();
        assert_eq!(cfg.format, LoggerFormat::Json);
        assert_eq!(cfg.level, "trace");
        assert!(cfg.with_targets);
    }
}
