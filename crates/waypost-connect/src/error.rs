use thiserror::Error;

use waypost_model::PolicyError;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connection manager construction failed: {0}")]
    Construction(String),

    #[error("channel policy rejected: {0}")]
    ConfigSerialization(#[from] PolicyError),

    #[error("dial {target}: {reason}")]
    Dial { target: String, reason: String },

    #[error("no resolver registered for scheme '{0}'")]
    SchemeNotRegistered(String),

    #[error("no healthy instance of '{service}' within {waited_ms}ms")]
    DiscoveryTimeout { service: String, waited_ms: u128 },

    #[error("connection to {0} is closed")]
    Closed(String),
}

impl ConnectError {
    pub(crate) fn dial(target: impl ToString, reason: impl ToString) -> Self {
        ConnectError::Dial {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<ConnectError> for tonic::Status {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::DiscoveryTimeout { .. } => tonic::Status::deadline_exceeded(err.to_string()),
            ConnectError::Closed(_) | ConnectError::Dial { .. } => {
                tonic::Status::unavailable(err.to_string())
            }
            ConnectError::Construction(_)
            | ConnectError::ConfigSerialization(_)
            | ConnectError::SchemeNotRegistered(_) => {
                tonic::Status::failed_precondition(err.to_string())
            }
        }
    }
}
