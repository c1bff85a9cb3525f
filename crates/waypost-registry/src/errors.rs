use thiserror::Error;

use waypost_model::ConfigError;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("{op}: registry unavailable: {source}")]
    Unavailable {
        op: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{op}: registry request timed out")]
    Timeout { op: &'static str },

    #[error("{op}: registry answered {status}: {body}")]
    Status {
        op: &'static str,
        status: u16,
        body: String,
    },

    #[error("{op}: invalid registry response: {reason}")]
    InvalidResponse { op: &'static str, reason: String },

    #[error("registration rejected: {0}")]
    Registration(String),

    #[error("service id not found: {0}")]
    NotFound(String),

    #[error("no healthy instance of '{service}' within {waited_secs}s")]
    DiscoveryTimeout { service: String, waited_secs: u64 },

    #[error("no instance of '{0}' available")]
    NoInstances(String),

    #[error("unknown registry driver: {0} (expected: consul|memory)")]
    UnknownDriver(String),

    #[error("invalid registry address '{0}'")]
    InvalidAddress(String),

    #[error("invalid registry config: {0}")]
    Config(#[from] ConfigError),
}

impl RegistryError {
    /// Deregistering an unknown id; callers usually treat this as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }

    /// Deadline exceeded, either on a single round-trip or on a discovery budget.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            RegistryError::Timeout { .. } | RegistryError::DiscoveryTimeout { .. }
        )
    }

    /// Transport or server-side failure talking to the registry.
    pub fn is_unavailable(&self) -> bool {
        match self {
            RegistryError::Unavailable { .. } | RegistryError::Timeout { .. } => true,
            RegistryError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn transport(op: &'static str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            RegistryError::Timeout { op }
        } else {
            RegistryError::Unavailable { op, source }
        }
    }
}
