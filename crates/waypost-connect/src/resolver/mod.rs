use std::sync::Arc;

use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, trace};

use waypost_model::{ResolvedTarget, ServiceNode};

use crate::error::ConnectError;

mod registry;
pub use registry::RegistryResolver;

/// Live view of a target's backends, kept current by a background task.
pub struct ResolverWatch {
    /// Sorted, deduplicated node snapshots. Starts empty.
    pub nodes: watch::Receiver<Vec<ServiceNode>>,
    pub task: JoinHandle<()>,
}

/// Turns a target into a stream of node snapshots.
///
/// A resolver owns one URI scheme. `watch` spawns whatever it needs to keep
/// the snapshot current and must stop once `cancel` fires.
pub trait Resolver: Send + Sync + 'static {
    fn scheme(&self) -> &str;

    fn watch(
        &self,
        target: &ResolvedTarget,
        cancel: CancellationToken,
    ) -> Result<ResolverWatch, ConnectError>;
}

/// Scheme-keyed set of resolvers handed to the connection manager.
#[derive(Default, Clone)]
pub struct ResolverRegistry {
    resolvers: Vec<Arc<dyn Resolver>>,
}

impl ResolverRegistry {
    #[inline]
    pub fn new() -> Self {
        Self {
            resolvers: Vec::new(),
        }
    }

    /// Later registrations for the same scheme shadow earlier ones.
    #[inline]
    pub fn register(&mut self, resolver: Arc<dyn Resolver>) {
        self.resolvers.push(resolver);
    }

    #[inline]
    pub fn with(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.register(resolver);
        self
    }

    pub fn pick(&self, scheme: &str) -> Option<&Arc<dyn Resolver>> {
        self.resolvers.iter().rev().find(|r| r.scheme() == scheme)
    }

    pub fn contains(&self, scheme: &str) -> bool {
        self.pick(scheme).is_some()
    }

    pub fn schemes(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.resolvers.iter().map(|r| r.scheme()).collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    #[instrument(level = "trace", skip(self, target, cancel), fields(target = %target))]
    pub fn resolve(
        &self,
        target: &ResolvedTarget,
        cancel: CancellationToken,
    ) -> Result<ResolverWatch, ConnectError> {
        let resolver = self
            .pick(&target.scheme)
            .ok_or_else(|| ConnectError::SchemeNotRegistered(target.scheme.clone()))?;

        let watch = resolver.watch(target, cancel)?;
        trace!(scheme = resolver.scheme(), "resolver watch started");
        Ok(watch)
    }
}
