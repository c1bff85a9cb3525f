//! Registry client over the Consul agent / health HTTP API.
mod wire;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use tracing::{debug, info, instrument, warn};

use waypost_model::{Registration, RegistryConfig, ServiceNode};

use crate::{
    errors::RegistryError,
    registry::{ServiceQuery, ServiceRegistry, WatchResult},
};
use wire::{AgentServiceRegistration, HealthEntry};

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Consul-backed [`ServiceRegistry`].
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct ConsulRegistry {
    http: reqwest::Client,
    config: RegistryConfig,
    base: Url,
}

impl ConsulRegistry {
    pub fn new(config: RegistryConfig) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|source| RegistryError::Unavailable {
                op: "client",
                source,
            })?;
        Self::with_client(config, http)
    }

    /// Build on top of an existing HTTP client.
    pub fn with_client(config: RegistryConfig, http: reqwest::Client) -> Result<Self, RegistryError> {
        config.validate()?;
        let base = Url::parse(&format!("http://{}/", config.address()))
            .map_err(|_| RegistryError::InvalidAddress(config.address()))?;
        Ok(Self { http, config, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.clear().extend(segments);
        }
        if let Some(dc) = &self.config.datacenter {
            url.query_pairs_mut().append_pair("dc", dc);
        }
        url
    }

    fn request(&self, method: Method, url: Url, timeout: Duration) -> RequestBuilder {
        let req = self.http.request(method, url).timeout(timeout);
        match &self.config.token {
            Some(token) => req.header(TOKEN_HEADER, token),
            None => req,
        }
    }

    async fn send(op: &'static str, req: RequestBuilder) -> Result<Response, RegistryError> {
        req.send()
            .await
            .map_err(|source| RegistryError::transport(op, source))
    }

    async fn failure(op: &'static str, resp: Response) -> RegistryError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        RegistryError::Status { op, status, body }
    }
}

#[async_trait]
impl ServiceRegistry for ConsulRegistry {
    #[instrument(level = "debug", skip(self, registration), fields(id = %registration.id, service = %registration.name))]
    async fn register(&self, registration: &Registration) -> Result<(), RegistryError> {
        registration.validate().map_err(RegistryError::Registration)?;

        let url = self.endpoint(&["v1", "agent", "service", "register"]);
        let body = AgentServiceRegistration::from(registration);
        let req = self
            .request(Method::PUT, url, self.config.request_timeout())
            .json(&body);
        let resp = Self::send("register", req).await?;

        let status = resp.status();
        if status.is_success() {
            info!(
                address = %registration.address,
                port = registration.port,
                "service registered"
            );
            return Ok(());
        }
        if status.is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RegistryError::Registration(format!("{status}: {}", body.trim())));
        }
        Err(Self::failure("register", resp).await)
    }

    #[instrument(level = "debug", skip(self))]
    async fn deregister(&self, id: &str) -> Result<(), RegistryError> {
        let url = self.endpoint(&["v1", "agent", "service", "deregister", id]);
        let req = self.request(Method::PUT, url, self.config.request_timeout());
        let resp = Self::send("deregister", req).await?;

        let status = resp.status();
        if status.is_success() {
            info!("service deregistered");
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        let err = Self::failure("deregister", resp).await;
        // Older agents answer 500 for unknown ids.
        if let RegistryError::Status { body, .. } = &err
            && body.contains("Unknown service")
        {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        Err(err)
    }

    async fn watch(
        &self,
        query: &ServiceQuery,
        index: u64,
        wait: Duration,
    ) -> Result<WatchResult, RegistryError> {
        let mut url = self.endpoint(&["v1", "health", "service", &query.name]);
        let mut timeout = self.config.request_timeout();
        {
            let mut params = url.query_pairs_mut();
            for tag in &query.tags {
                params.append_pair("tag", tag);
            }
            if query.passing_only {
                params.append_pair("passing", "true");
            }
            if index > 0 && !wait.is_zero() {
                params.append_pair("index", &index.to_string());
                // `wait=0ms` means the agent default of five minutes.
                params.append_pair("wait", &format!("{}ms", wait.as_millis().max(1)));
                // The agent may hold the request up to wait + wait/16.
                timeout += wait + wait / 16;
            }
        }

        let resp = Self::send("list", self.request(Method::GET, url, timeout)).await?;
        if !resp.status().is_success() {
            return Err(Self::failure("list", resp).await);
        }

        let new_index = resp
            .headers()
            .get(INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| RegistryError::InvalidResponse {
                op: "list",
                reason: format!("missing or invalid {INDEX_HEADER} header"),
            })?;

        let entries: Vec<HealthEntry> =
            resp.json().await.map_err(|e| RegistryError::InvalidResponse {
                op: "list",
                reason: e.to_string(),
            })?;
        let nodes: Vec<ServiceNode> = entries.into_iter().map(ServiceNode::from).collect();

        // Index going backwards means the agent state was reset; restart from scratch.
        let next = if new_index < index {
            warn!(service = %query.name, index, new_index, "registry index went backwards");
            0
        } else {
            new_index
        };
        debug!(service = %query.name, index = next, nodes = nodes.len(), "health query answered");
        Ok(WatchResult { index: next, nodes })
    }

    fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_escapes_segments_and_adds_datacenter() {
        let mut cfg = RegistryConfig::new("consul.internal", 8500);
        cfg.datacenter = Some("eu-1".into());
        let registry = ConsulRegistry::new(cfg).unwrap();

        let url = registry.endpoint(&["v1", "agent", "service", "deregister", "user 1/a"]);
        assert_eq!(
            url.as_str(),
            "http://consul.internal:8500/v1/agent/service/deregister/user%201%2Fa?dc=eu-1"
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(matches!(
            ConsulRegistry::new(RegistryConfig::new("", 8500)),
            Err(RegistryError::Config(_))
        ));
        assert!(matches!(
            ConsulRegistry::new(RegistryConfig::new("bad host", 8500)),
            Err(RegistryError::InvalidAddress(_))
        ));
    }
}
