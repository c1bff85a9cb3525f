mod error;
pub use error::{ConfigError, PolicyError, TargetError};

mod duration;
pub use duration::{format_duration, parse_duration};

mod node;
pub use node::ServiceNode;

mod config;
pub use config::RegistryConfig;

mod health;
pub use health::{HealthCheck, HealthCheckKind};

mod registration;
pub use registration::Registration;

mod policy;
pub use policy::{
    GRPC_STATUS_CODES, LoadBalancingPolicy, MethodPolicy, RetryPolicy, ServiceConfigDocument,
    ServiceConnectionConfig,
};

mod target;
pub use target::{REGISTRY_SCHEME, ResolvedTarget};

/// Logical service name as known to the registry.
pub type ServiceName = String;

/// Registry-assigned instance identifier.
pub type ServiceId = String;
