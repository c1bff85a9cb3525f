use thiserror::Error;

/// Invalid channel policy; raised before the policy is serialized.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("retry max_attempts must be at least 1, got {0}")]
    MaxAttempts(u32),
    #[error("retry initial_backoff must be positive")]
    ZeroBackoff,
    #[error("retry max_backoff ({max_ms}ms) is lower than initial_backoff ({initial_ms}ms)")]
    BackoffOrder { initial_ms: u128, max_ms: u128 },
    #[error("retry backoff_multiplier must be a positive finite number, got {0}")]
    BackoffMultiplier(f64),
    #[error("retry policy must name at least one retryable status code")]
    NoRetryableCodes,
    #[error("unknown grpc status code: {0}")]
    UnknownStatusCode(String),
    #[error("method '{0}' has no service to match against")]
    MethodWithoutService(String),
    #[error("unknown load balancing policy: {0}")]
    UnknownLoadBalancingPolicy(String),
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
    #[error("service config encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Malformed resolution target string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("target '{0}' has no scheme")]
    MissingScheme(String),
    #[error("target '{0}' has no registry authority (host:port)")]
    MissingAuthority(String),
    #[error("target '{0}' has an invalid registry port")]
    InvalidPort(String),
    #[error("target '{0}' has no service name")]
    MissingService(String),
    #[error("target '{target}' has an invalid query parameter '{param}'")]
    InvalidParam { target: String, param: String },
}

/// Invalid registry configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("registry host cannot be empty")]
    EmptyHost,
    #[error("registry port cannot be zero")]
    ZeroPort,
    #[error("request timeout cannot be zero")]
    ZeroTimeout,
}
