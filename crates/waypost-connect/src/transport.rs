use std::time::Duration;

use tonic::transport::Endpoint;

use waypost_model::ServiceNode;

/// Wire security for backend connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TransportSecurity {
    #[default]
    Plaintext,
    /// TLS with an optional SNI override and an optional PEM trust anchor.
    Tls {
        domain: Option<String>,
        ca_pem: Option<Vec<u8>>,
    },
}

/// Per-connection transport settings applied to every backend endpoint.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub security: TransportSecurity,
    pub connect_timeout: Duration,
    pub tcp_keepalive: Option<Duration>,
    /// Per-request timeout enforced by the endpoint itself.
    pub endpoint_timeout: Option<Duration>,
    /// Capacity of the balancer's change queue.
    pub buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            security: TransportSecurity::Plaintext,
            connect_timeout: Duration::from_secs(5),
            tcp_keepalive: Some(Duration::from_secs(60)),
            endpoint_timeout: None,
            buffer: 1024,
        }
    }
}

impl TransportConfig {
    pub fn plaintext() -> Self {
        Self::default()
    }

    pub fn tls(domain: Option<String>, ca_pem: Option<Vec<u8>>) -> Self {
        Self {
            security: TransportSecurity::Tls { domain, ca_pem },
            ..Self::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_endpoint_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint_timeout = Some(timeout);
        self
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.security, TransportSecurity::Tls { .. })
    }

    /// URI scheme used for backend endpoints.
    pub fn scheme(&self) -> &'static str {
        if self.is_tls() { "https" } else { "http" }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be > 0".into());
        }
        if self.buffer == 0 {
            return Err("balancer buffer must be > 0".into());
        }
        if self.is_tls() && !cfg!(feature = "tls") {
            return Err("TLS requested but waypost-connect was built without the `tls` feature".into());
        }
        Ok(())
    }

    /// Lazily connecting endpoint for one backend node.
    pub fn endpoint(&self, node: &ServiceNode) -> Result<Endpoint, tonic::transport::Error> {
        let mut endpoint = Endpoint::from_shared(node.uri(self.scheme()))?
            .connect_timeout(self.connect_timeout)
            .tcp_keepalive(self.tcp_keepalive);
        if let Some(timeout) = self.endpoint_timeout {
            endpoint = endpoint.timeout(timeout);
        }
        apply_tls(endpoint, &self.security, node)
    }
}

#[cfg(feature = "tls")]
fn apply_tls(
    endpoint: Endpoint,
    security: &TransportSecurity,
    node: &ServiceNode,
) -> Result<Endpoint, tonic::transport::Error> {
    use tonic::transport::{Certificate, ClientTlsConfig};

    let TransportSecurity::Tls { domain, ca_pem } = security else {
        return Ok(endpoint);
    };
    let mut tls = ClientTlsConfig::new()
        .domain_name(domain.clone().unwrap_or_else(|| node.address.clone()));
    if let Some(pem) = ca_pem {
        tls = tls.ca_certificate(Certificate::from_pem(pem));
    }
    endpoint.tls_config(tls)
}

#[cfg(not(feature = "tls"))]
fn apply_tls(
    endpoint: Endpoint,
    _security: &TransportSecurity,
    _node: &ServiceNode,
) -> Result<Endpoint, tonic::transport::Error> {
    Ok(endpoint)
}
