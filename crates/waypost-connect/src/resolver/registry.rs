use std::{sync::Arc, time::Duration};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use waypost_model::{REGISTRY_SCHEME, ResolvedTarget, RetryPolicy, ServiceNode};
use waypost_registry::{ServiceQuery, ServiceRegistry, WatchResult};

use super::{Resolver, ResolverWatch};
use crate::error::ConnectError;

/// Long-poll window used when the target carries `wait=0s`.
pub const DEFAULT_WATCH_WINDOW: Duration = Duration::from_secs(30);

/// Resolves `registry://` targets through blocking queries against one registry.
pub struct RegistryResolver {
    registry: Arc<dyn ServiceRegistry>,
    backoff: RetryPolicy,
}

impl RegistryResolver {
    pub fn new(registry: Arc<dyn ServiceRegistry>) -> Self {
        Self {
            registry,
            backoff: RetryPolicy::new(u32::MAX)
                .with_backoff(Duration::from_millis(250), Duration::from_secs(10)),
        }
    }

    /// Delays between failed registry queries.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff = self.backoff.with_backoff(initial, max);
        self
    }
}

impl Resolver for RegistryResolver {
    fn scheme(&self) -> &str {
        REGISTRY_SCHEME
    }

    fn watch(
        &self,
        target: &ResolvedTarget,
        cancel: CancellationToken,
    ) -> Result<ResolverWatch, ConnectError> {
        let config = self.registry.config();
        if target.registry_host != config.host || target.registry_port != config.port {
            return Err(ConnectError::dial(
                target,
                format!("resolver is bound to registry {}", config.address()),
            ));
        }

        let window = match target.wait_secs {
            0 => DEFAULT_WATCH_WINDOW,
            secs => Duration::from_secs(secs),
        };
        let (tx, rx) = watch::channel(Vec::new());
        let task = tokio::spawn(run_watch(
            Arc::clone(&self.registry),
            ServiceQuery::from(target),
            window,
            self.backoff.clone(),
            tx,
            cancel,
        ));
        Ok(ResolverWatch { nodes: rx, task })
    }
}

async fn run_watch(
    registry: Arc<dyn ServiceRegistry>,
    query: ServiceQuery,
    window: Duration,
    backoff: RetryPolicy,
    tx: watch::Sender<Vec<ServiceNode>>,
    cancel: CancellationToken,
) {
    // Index 0 is never sent back to the registry, or every query would return at once.
    let mut index = 0u64;
    let mut first = true;
    let mut failures = 0u32;

    loop {
        if tx.is_closed() {
            break;
        }
        let wait = if first { Duration::ZERO } else { window };
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            r = registry.watch(&query, index, wait) => r,
        };

        match result {
            Ok(WatchResult { index: next, mut nodes }) => {
                if failures > 0 {
                    info!(service = %query.name, failures, "registry watch recovered");
                }
                failures = 0;
                nodes.sort();
                nodes.dedup();
                let changed = tx.send_if_modified(|current| {
                    if *current == nodes {
                        return false;
                    }
                    *current = nodes;
                    true
                });
                if changed {
                    debug!(service = %query.name, index = next, "backend set changed");
                }
                index = next.max(1);
                first = false;
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let delay = backoff.backoff(failures);
                warn!(service = %query.name, failures, ?delay, error = %e, "registry watch failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    debug!(service = %query.name, "registry watch stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use waypost_model::{Registration, RegistryConfig};
    use waypost_registry::{MemoryRegistry, RegistryError};

    /// Registry that always answers with index 0, like an agent after a reset.
    struct ZeroIndex {
        config: RegistryConfig,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ServiceRegistry for ZeroIndex {
        async fn register(&self, _registration: &Registration) -> Result<(), RegistryError> {
            Ok(())
        }

        async fn deregister(&self, _id: &str) -> Result<(), RegistryError> {
            Ok(())
        }

        async fn watch(
            &self,
            _query: &ServiceQuery,
            index: u64,
            wait: Duration,
        ) -> Result<WatchResult, RegistryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if index > 0 && !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
            Ok(WatchResult { index: 0, nodes: Vec::new() })
        }

        fn config(&self) -> &RegistryConfig {
            &self.config
        }
    }

    async fn next_snapshot(rx: &mut watch::Receiver<Vec<ServiceNode>>) -> Vec<ServiceNode> {
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("snapshot in time")
            .expect("resolver alive");
        rx.borrow_and_update().clone()
    }

    #[tokio::test]
    async fn publishes_registry_changes() {
        let registry = Arc::new(MemoryRegistry::default());
        registry
            .register(&Registration::new("user-1", "user-srv", "10.0.0.5", 9000))
            .await
            .unwrap();

        let resolver = RegistryResolver::new(registry.clone());
        let target = ResolvedTarget::for_registry(registry.config(), "user-srv", 1);
        let cancel = CancellationToken::new();
        let mut watch = resolver.watch(&target, cancel.clone()).unwrap();

        assert_eq!(next_snapshot(&mut watch.nodes).await, vec![ServiceNode::new("10.0.0.5", 9000)]);

        registry
            .register(&Registration::new("user-2", "user-srv", "10.0.0.4", 9000))
            .await
            .unwrap();
        assert_eq!(
            next_snapshot(&mut watch.nodes).await,
            vec![ServiceNode::new("10.0.0.4", 9000), ServiceNode::new("10.0.0.5", 9000)]
        );

        registry.deregister("user-1").await.unwrap();
        registry.deregister("user-2").await.unwrap();
        let mut last = next_snapshot(&mut watch.nodes).await;
        if !last.is_empty() {
            last = next_snapshot(&mut watch.nodes).await;
        }
        assert!(last.is_empty());

        cancel.cancel();
        watch.task.await.unwrap();
    }

    #[tokio::test]
    async fn other_registry_is_a_dial_error() {
        let registry = Arc::new(MemoryRegistry::default());
        let resolver = RegistryResolver::new(registry);
        let target = ResolvedTarget::for_registry(&RegistryConfig::new("consul.internal", 8500), "user-srv", 0);

        let err = resolver.watch(&target, CancellationToken::new()).err().unwrap();
        assert!(matches!(err, ConnectError::Dial { .. }), "{err}");
    }

    #[tokio::test]
    async fn stops_when_cancelled() {
        let registry = Arc::new(MemoryRegistry::default());
        let resolver = RegistryResolver::new(registry.clone());
        let target = ResolvedTarget::for_registry(registry.config(), "user-srv", 0);
        let cancel = CancellationToken::new();
        let watch = resolver.watch(&target, cancel.clone()).unwrap();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), watch.task)
            .await
            .expect("watch task exits")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_index_still_blocks() {
        let registry = Arc::new(ZeroIndex {
            config: RegistryConfig::default(),
            calls: AtomicU32::new(0),
        });
        let resolver = RegistryResolver::new(registry.clone());
        let target = ResolvedTarget::for_registry(&registry.config, "user-srv", 5);
        let cancel = CancellationToken::new();
        let watch = resolver.watch(&target, cancel.clone()).unwrap();

        tokio::time::sleep(Duration::from_secs(12)).await;
        // One immediate query, then one blocking query per 5s window.
        let calls = registry.calls.load(Ordering::SeqCst);
        assert!((2..=4).contains(&calls), "{calls} registry queries");

        cancel.cancel();
        watch.task.await.unwrap();
    }
}
