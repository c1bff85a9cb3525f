//! Consul HTTP API payloads.
use serde::{Deserialize, Serialize};

use waypost_model::{HealthCheckKind, Registration, ServiceNode, format_duration};

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AgentServiceRegistration<'a> {
    #[serde(rename = "ID")]
    pub id: &'a str,
    pub name: &'a str,
    pub address: &'a str,
    pub port: u16,
    pub tags: &'a [String],
    pub check: AgentServiceCheck,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AgentServiceCheck {
    #[serde(rename = "HTTP", skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
    #[serde(rename = "GRPC", skip_serializing_if = "Option::is_none")]
    pub grpc: Option<String>,
    #[serde(rename = "GRPCUseTLS", skip_serializing_if = "Option::is_none")]
    pub grpc_use_tls: Option<bool>,
    #[serde(rename = "TCP", skip_serializing_if = "Option::is_none")]
    pub tcp: Option<String>,
    pub timeout: String,
    pub interval: String,
    pub deregister_critical_service_after: String,
}

impl<'a> From<&'a Registration> for AgentServiceRegistration<'a> {
    fn from(reg: &'a Registration) -> Self {
        let probe = reg.check.probe_target(&reg.address, reg.port);
        let (http, grpc, grpc_use_tls, tcp) = match reg.check.kind {
            HealthCheckKind::Http { .. } => (Some(probe), None, None, None),
            HealthCheckKind::Grpc { .. } => (None, Some(probe), Some(false), None),
            HealthCheckKind::Tcp => (None, None, None, Some(probe)),
        };

        Self {
            id: &reg.id,
            name: &reg.name,
            address: &reg.address,
            port: reg.port,
            tags: &reg.tags,
            check: AgentServiceCheck {
                http,
                grpc,
                grpc_use_tls,
                tcp,
                timeout: format_duration(reg.check.timeout),
                interval: format_duration(reg.check.interval),
                deregister_critical_service_after: format_duration(
                    reg.check.deregister_critical_after,
                ),
            },
        }
    }
}

/// One element of `GET /v1/health/service/{name}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct HealthEntry {
    pub node: HealthNode,
    pub service: HealthService,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct HealthNode {
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct HealthService {
    #[serde(default)]
    pub address: String,
    pub port: u16,
}

impl From<HealthEntry> for ServiceNode {
    /// An empty service address means "same as the node".
    fn from(entry: HealthEntry) -> Self {
        let address = if entry.service.address.is_empty() {
            entry.node.address
        } else {
            entry.service.address
        };
        ServiceNode::new(address, entry.service.port)
    }
}
