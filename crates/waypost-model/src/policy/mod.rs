//! Typed channel policy.
//!
//! The policy stays typed inside the process and is only rendered to the gRPC
//! service-config JSON document at the channel boundary, after [`ServiceConnectionConfig::validate`]
//! has accepted it.
mod document;
pub use document::ServiceConfigDocument;

mod retry;
pub use retry::{GRPC_STATUS_CODES, RetryPolicy};

use std::{fmt, str::FromStr, time::Duration};

use crate::error::PolicyError;

/// Named load-balancing policy delegated to the channel layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadBalancingPolicy {
    RoundRobin,
    PickFirst,
}

impl LoadBalancingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalancingPolicy::RoundRobin => "round_robin",
            LoadBalancingPolicy::PickFirst => "pick_first",
        }
    }
}

impl fmt::Display for LoadBalancingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadBalancingPolicy {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round_robin" => Ok(LoadBalancingPolicy::RoundRobin),
            "pick_first" => Ok(LoadBalancingPolicy::PickFirst),
            _ => Err(PolicyError::UnknownLoadBalancingPolicy(s.to_string())),
        }
    }
}

/// Call behavior for the methods matching `service` (and `method`, when set).
///
/// An empty `service` matches every call that no other entry claims.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MethodPolicy {
    pub service: String,
    pub method: Option<String>,
    pub wait_for_ready: bool,
    pub timeout: Option<Duration>,
    pub retry_policy: Option<RetryPolicy>,
}

impl MethodPolicy {
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Default::default()
        }
    }

    /// Entry applied to every call without a more specific match.
    pub fn fallback() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn wait_for_ready(mut self, wait: bool) -> Self {
        self.wait_for_ready = wait;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if let Some(method) = &self.method
            && self.service.is_empty()
        {
            return Err(PolicyError::MethodWithoutService(method.clone()));
        }
        if let Some(retry) = &self.retry_policy {
            retry.validate()?;
        }
        Ok(())
    }
}

/// Channel policy for a connection: load balancing plus per-method behavior.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceConnectionConfig {
    /// Deprecated in favor of per-method policies; still honored.
    pub load_balancing_policy: Option<LoadBalancingPolicy>,
    pub method_policies: Vec<MethodPolicy>,
}

impl ServiceConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn round_robin() -> Self {
        Self::new().with_load_balancing(LoadBalancingPolicy::RoundRobin)
    }

    pub fn with_load_balancing(mut self, policy: LoadBalancingPolicy) -> Self {
        self.load_balancing_policy = Some(policy);
        self
    }

    pub fn with_method_policy(mut self, policy: MethodPolicy) -> Self {
        self.method_policies.push(policy);
        self
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        self.method_policies.iter().try_for_each(MethodPolicy::validate)
    }

    /// Validate, then render the service-config JSON document.
    pub fn to_service_config(&self) -> Result<String, PolicyError> {
        self.validate()?;
        ServiceConfigDocument::from(self).to_json()
    }

    /// Parse a service-config JSON document back into a typed policy.
    pub fn from_service_config(json: &str) -> Result<Self, PolicyError> {
        let cfg = Self::try_from(ServiceConfigDocument::parse(json)?)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Effective policy for `service/method`.
    ///
    /// Resolution order: exact method entry, service entry, fallback entry.
    pub fn policy_for(&self, service: &str, method: &str) -> Option<&MethodPolicy> {
        let exact = self
            .method_policies
            .iter()
            .find(|p| p.service == service && p.method.as_deref() == Some(method));
        let by_service = || {
            self.method_policies
                .iter()
                .find(|p| p.service == service && p.method.is_none())
        };
        let fallback = || self.method_policies.iter().find(|p| p.service.is_empty());

        exact.or_else(by_service).or_else(fallback)
    }
}
