use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use waypost_model::{Registration, RegistryConfig, ResolvedTarget, ServiceNode};

use crate::{errors::RegistryError, selector::Selector};

/// Filter for discovery queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceQuery {
    pub name: String,
    /// Every tag must be present on a matching instance.
    pub tags: Vec<String>,
    /// Exclude instances currently failing their health check.
    pub passing_only: bool,
}

impl ServiceQuery {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
            passing_only: true,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn passing_only(mut self, passing_only: bool) -> Self {
        self.passing_only = passing_only;
        self
    }

    pub(crate) fn matches(&self, name: &str, tags: &[String]) -> bool {
        self.name == name && self.tags.iter().all(|t| tags.contains(t))
    }
}

impl From<&ResolvedTarget> for ServiceQuery {
    fn from(target: &ResolvedTarget) -> Self {
        Self {
            name: target.service_name.clone(),
            tags: target.tags.clone(),
            passing_only: target.passing_only,
        }
    }
}

/// Outcome of one blocking query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchResult {
    /// Registry index to pass to the next blocking query.
    pub index: u64,
    pub nodes: Vec<ServiceNode>,
}

/// Registry client: registration, health-filtered discovery and blocking watches.
///
/// Implementations hold no cache and never retry; every call is one live
/// round-trip and errors are surfaced as-is, tagged with the operation.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Create or overwrite an instance entry together with its liveness check.
    async fn register(&self, registration: &Registration) -> Result<(), RegistryError>;

    /// Remove an instance entry. Unknown ids yield [`RegistryError::NotFound`].
    async fn deregister(&self, id: &str) -> Result<(), RegistryError>;

    /// Blocking query: returns once the registry index moves past `index` or
    /// `wait` elapses. `index == 0` never blocks.
    async fn watch(
        &self,
        query: &ServiceQuery,
        index: u64,
        wait: Duration,
    ) -> Result<WatchResult, RegistryError>;

    fn config(&self) -> &RegistryConfig;

    /// Instances matching `query`.
    ///
    /// Blocks up to the configured discovery wait when nothing matches yet.
    async fn list_services(&self, query: &ServiceQuery) -> Result<Vec<ServiceNode>, RegistryError> {
        discover(self, query, self.config().discovery_wait()).await
    }

    /// One instance chosen by `selector` among the matches of `query`.
    async fn pick_service(
        &self,
        query: &ServiceQuery,
        selector: &dyn Selector,
    ) -> Result<ServiceNode, RegistryError> {
        let nodes = self.list_services(query).await?;
        selector
            .select(&nodes)
            .ok_or_else(|| RegistryError::NoInstances(query.name.clone()))
    }
}

/// List matches of `query`, long-polling for up to `budget` while the result is empty.
///
/// A zero budget returns the first answer, empty or not. Otherwise an empty
/// result at the end of the budget is a [`RegistryError::DiscoveryTimeout`].
pub async fn discover<R>(
    registry: &R,
    query: &ServiceQuery,
    budget: Duration,
) -> Result<Vec<ServiceNode>, RegistryError>
where
    R: ServiceRegistry + ?Sized,
{
    let first = registry.watch(query, 0, Duration::ZERO).await?;
    if !first.nodes.is_empty() || budget.is_zero() {
        return Ok(first.nodes);
    }

    let deadline = Instant::now() + budget;
    let mut index = first.index.max(1);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining < Duration::from_millis(1) {
            return Err(RegistryError::DiscoveryTimeout {
                service: query.name.clone(),
                waited_secs: budget.as_secs(),
            });
        }

        debug!(service = %query.name, index, "waiting for a matching instance");
        let next = registry.watch(query, index, remaining).await?;
        if !next.nodes.is_empty() {
            return Ok(next.nodes);
        }
        index = next.index.max(1);
    }
}
