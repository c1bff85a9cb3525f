use std::{fmt, str::FromStr};

use crate::{config::RegistryConfig, error::TargetError};

/// Scheme served by the registry-backed resolver.
pub const REGISTRY_SCHEME: &str = "registry";

/// Resolvable channel target: `registry://{host}:{port}/{service}?wait={N}s`.
///
/// `tags` and `passing_only` are optional refinements; they only show up in
/// the string form when they differ from the defaults (no tags, healthy only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub scheme: String,
    pub registry_host: String,
    pub registry_port: u16,
    pub service_name: String,
    pub wait_secs: u64,
    pub tags: Vec<String>,
    pub passing_only: bool,
}

impl ResolvedTarget {
    pub fn new(
        registry_host: impl Into<String>,
        registry_port: u16,
        service_name: impl Into<String>,
        wait_secs: u64,
    ) -> Self {
        Self {
            scheme: REGISTRY_SCHEME.to_string(),
            registry_host: registry_host.into(),
            registry_port,
            service_name: service_name.into(),
            wait_secs,
            tags: Vec::new(),
            passing_only: true,
        }
    }

    /// Target for `service` on the registry described by `config`.
    pub fn for_registry(config: &RegistryConfig, service: impl Into<String>, wait_secs: u64) -> Self {
        Self::new(config.host.clone(), config.port, service, wait_secs)
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_passing_only(mut self, passing_only: bool) -> Self {
        self.passing_only = passing_only;
        self
    }

    /// `host:port` of the registry this target resolves against.
    pub fn registry_address(&self) -> String {
        format!("{}:{}", self.registry_host, self.registry_port)
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}/{}?wait={}s",
            self.scheme, self.registry_host, self.registry_port, self.service_name, self.wait_secs
        )?;
        for tag in &self.tags {
            write!(f, "&tag={tag}")?;
        }
        if !self.passing_only {
            f.write_str("&healthy=false")?;
        }
        Ok(())
    }
}

impl FromStr for ResolvedTarget {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .filter(|(scheme, _)| !scheme.is_empty())
            .ok_or_else(|| TargetError::MissingScheme(s.to_string()))?;

        let (path, query) = match rest.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (rest, None),
        };
        let (authority, service) = path
            .split_once('/')
            .ok_or_else(|| TargetError::MissingService(s.to_string()))?;
        if service.is_empty() || service.contains('/') {
            return Err(TargetError::MissingService(s.to_string()));
        }

        let (host, port) = authority
            .rsplit_once(':')
            .filter(|(host, _)| !host.is_empty())
            .ok_or_else(|| TargetError::MissingAuthority(s.to_string()))?;
        let port: u16 = port
            .parse()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| TargetError::InvalidPort(s.to_string()))?;

        let mut target = ResolvedTarget::new(host, port, service, 0);
        target.scheme = scheme.to_string();

        for param in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let invalid = || TargetError::InvalidParam {
                target: s.to_string(),
                param: param.to_string(),
            };
            let (key, value) = param.split_once('=').ok_or_else(invalid)?;
            match key {
                "wait" => {
                    target.wait_secs = value
                        .strip_suffix('s')
                        .and_then(|v| v.parse().ok())
                        .ok_or_else(invalid)?;
                }
                "tag" if !value.is_empty() => target.tags.push(value.to_string()),
                "healthy" => target.passing_only = value.parse().map_err(|_| invalid())?,
                _ => return Err(invalid()),
            }
        }
        Ok(target)
    }
}
