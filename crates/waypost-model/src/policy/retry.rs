use std::{collections::BTreeSet, time::Duration};

use crate::error::PolicyError;

/// Canonical gRPC status names, indexed by numeric code.
pub const GRPC_STATUS_CODES: [&str; 17] = [
    "OK",
    "CANCELLED",
    "UNKNOWN",
    "INVALID_ARGUMENT",
    "DEADLINE_EXCEEDED",
    "NOT_FOUND",
    "ALREADY_EXISTS",
    "PERMISSION_DENIED",
    "RESOURCE_EXHAUSTED",
    "FAILED_PRECONDITION",
    "ABORTED",
    "OUT_OF_RANGE",
    "UNIMPLEMENTED",
    "INTERNAL",
    "UNAVAILABLE",
    "DATA_LOSS",
    "UNAUTHENTICATED",
];

/// Per-method retry behavior applied by the channel layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Upper-case gRPC status names that trigger a retry.
    pub retryable_status_codes: BTreeSet<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            retryable_status_codes: BTreeSet::from(["UNAVAILABLE".to_string()]),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Replace the retryable set; names are upper-cased.
    pub fn with_retryable_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.retryable_status_codes = codes
            .into_iter()
            .map(|c| c.as_ref().trim().to_ascii_uppercase())
            .collect();
        self
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_attempts < 1 {
            return Err(PolicyError::MaxAttempts(self.max_attempts));
        }
        if self.initial_backoff.is_zero() {
            return Err(PolicyError::ZeroBackoff);
        }
        if self.max_backoff < self.initial_backoff {
            return Err(PolicyError::BackoffOrder {
                initial_ms: self.initial_backoff.as_millis(),
                max_ms: self.max_backoff.as_millis(),
            });
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier > 0.0) {
            return Err(PolicyError::BackoffMultiplier(self.backoff_multiplier));
        }
        if self.retryable_status_codes.is_empty() {
            return Err(PolicyError::NoRetryableCodes);
        }
        if let Some(bad) = self
            .retryable_status_codes
            .iter()
            .find(|c| !GRPC_STATUS_CODES.contains(&c.as_str()))
        {
            return Err(PolicyError::UnknownStatusCode(bad.clone()));
        }
        Ok(())
    }

    /// Whether a numeric gRPC status code is in the retryable set.
    pub fn is_retryable(&self, code: i32) -> bool {
        usize::try_from(code)
            .ok()
            .and_then(|i| GRPC_STATUS_CODES.get(i))
            .is_some_and(|name| self.retryable_status_codes.contains(*name))
    }

    /// Delay before retry number `retry` (1-based), capped at `max_backoff`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exp);
        if secs >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_backoff)
    }
}
