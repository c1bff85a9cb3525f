use std::time::Duration;

use crate::node::host_port;

/// How the registry probes an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthCheckKind {
    /// `GET http://{address}:{port}{path}` must answer 2xx.
    Http { path: String },
    /// Standard gRPC health protocol; `service` narrows the probe to one service.
    Grpc { service: Option<String> },
    /// A TCP connect must succeed.
    Tcp,
}

/// Liveness check attached to a registration.
///
/// An instance failing the check continuously for longer than
/// `deregister_critical_after` is purged from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub kind: HealthCheckKind,
    pub timeout: Duration,
    pub interval: Duration,
    pub deregister_critical_after: Duration,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::http("/health")
    }
}

impl HealthCheck {
    fn with_kind(kind: HealthCheckKind) -> Self {
        Self {
            kind,
            timeout: Duration::from_secs(5),
            interval: Duration::from_secs(5),
            deregister_critical_after: Duration::from_secs(15),
        }
    }

    pub fn http(path: impl Into<String>) -> Self {
        Self::with_kind(HealthCheckKind::Http { path: path.into() })
    }

    pub fn grpc(service: Option<String>) -> Self {
        Self::with_kind(HealthCheckKind::Grpc { service })
    }

    pub fn tcp() -> Self {
        Self::with_kind(HealthCheckKind::Tcp)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_deregister_after(mut self, grace: Duration) -> Self {
        self.deregister_critical_after = grace;
        self
    }

    /// Probe target for an instance listening on `address:port`.
    pub fn probe_target(&self, address: &str, port: u16) -> String {
        let authority = host_port(address, port);
        match &self.kind {
            HealthCheckKind::Http { path } => {
                let path = path.strip_prefix('/').unwrap_or(path);
                format!("http://{authority}/{path}")
            }
            HealthCheckKind::Grpc { service: Some(svc) } => format!("{authority}/{svc}"),
            HealthCheckKind::Grpc { service: None } | HealthCheckKind::Tcp => authority,
        }
    }
}
