use serde::{Deserialize, Serialize};

use super::{MethodPolicy, RetryPolicy, ServiceConnectionConfig};
use crate::{
    duration::{format_duration, parse_duration},
    error::PolicyError,
};

/// Wire form of [`ServiceConnectionConfig`]: the gRPC service-config JSON document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfigDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    load_balancing_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    method_config: Vec<MethodConfig>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MethodConfig {
    #[serde(default)]
    name: Vec<MethodName>,
    #[serde(default, skip_serializing_if = "is_false")]
    wait_for_ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry_policy: Option<RetryPolicyDoc>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct MethodName {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetryPolicyDoc {
    max_attempts: u32,
    initial_backoff: String,
    max_backoff: String,
    backoff_multiplier: f64,
    retryable_status_codes: Vec<String>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl ServiceConfigDocument {
    pub fn parse(json: &str) -> Result<Self, PolicyError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, PolicyError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn load_balancing_policy(&self) -> Option<&str> {
        self.load_balancing_policy.as_deref()
    }

    /// Number of `methodConfig` entries.
    pub fn method_config_len(&self) -> usize {
        self.method_config.len()
    }
}

impl From<&RetryPolicy> for RetryPolicyDoc {
    fn from(p: &RetryPolicy) -> Self {
        Self {
            max_attempts: p.max_attempts,
            initial_backoff: format_duration(p.initial_backoff),
            max_backoff: format_duration(p.max_backoff),
            backoff_multiplier: p.backoff_multiplier,
            retryable_status_codes: p.retryable_status_codes.iter().cloned().collect(),
        }
    }
}

impl TryFrom<RetryPolicyDoc> for RetryPolicy {
    type Error = PolicyError;

    fn try_from(doc: RetryPolicyDoc) -> Result<Self, Self::Error> {
        Ok(RetryPolicy::new(doc.max_attempts)
            .with_backoff(
                parse_duration(&doc.initial_backoff)?,
                parse_duration(&doc.max_backoff)?,
            )
            .with_multiplier(doc.backoff_multiplier)
            .with_retryable_codes(doc.retryable_status_codes))
    }
}

impl From<&MethodPolicy> for MethodConfig {
    fn from(p: &MethodPolicy) -> Self {
        Self {
            name: vec![MethodName {
                service: p.service.clone(),
                method: p.method.clone(),
            }],
            wait_for_ready: p.wait_for_ready,
            timeout: p.timeout.map(format_duration),
            retry_policy: p.retry_policy.as_ref().map(RetryPolicyDoc::from),
        }
    }
}

impl From<&ServiceConnectionConfig> for ServiceConfigDocument {
    fn from(cfg: &ServiceConnectionConfig) -> Self {
        Self {
            load_balancing_policy: cfg.load_balancing_policy.map(|p| p.as_str().to_string()),
            method_config: cfg.method_policies.iter().map(MethodConfig::from).collect(),
        }
    }
}

impl TryFrom<ServiceConfigDocument> for ServiceConnectionConfig {
    type Error = PolicyError;

    fn try_from(doc: ServiceConfigDocument) -> Result<Self, Self::Error> {
        let load_balancing_policy = doc
            .load_balancing_policy
            .as_deref()
            .map(str::parse)
            .transpose()?;

        let mut method_policies = Vec::new();
        for entry in doc.method_config {
            let timeout = entry.timeout.as_deref().map(parse_duration).transpose()?;
            let retry_policy = entry.retry_policy.map(RetryPolicy::try_from).transpose()?;
            // One typed policy per name; an entry without names is the fallback.
            let names = if entry.name.is_empty() {
                vec![MethodName::default()]
            } else {
                entry.name
            };
            for name in names {
                method_policies.push(MethodPolicy {
                    service: name.service,
                    method: name.method,
                    wait_for_ready: entry.wait_for_ready,
                    timeout,
                    retry_policy: retry_policy.clone(),
                });
            }
        }

        Ok(Self {
            load_balancing_policy,
            method_policies,
        })
    }
}
