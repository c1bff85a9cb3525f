//! In-process registry for tests and single-host development.
//!
//! Mirrors the registry semantics the rest of the crate relies on: monotonic
//! index, blocking watches, health-filtered listing, and purging of instances
//! that stay critical longer than their check's grace period.
use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::watch, time::Instant};
use tracing::{debug, info};

use waypost_model::{Registration, RegistryConfig, ServiceNode};

use crate::{
    errors::RegistryError,
    registry::{ServiceQuery, ServiceRegistry, WatchResult},
};

struct Entry {
    registration: Registration,
    critical_since: Option<Instant>,
}

impl Entry {
    fn passing(&self) -> bool {
        self.critical_since.is_none()
    }
}

struct State {
    index: u64,
    entries: BTreeMap<String, Entry>,
}

pub struct MemoryRegistry {
    config: RegistryConfig,
    state: Mutex<State>,
    changes: watch::Sender<u64>,
}

impl MemoryRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let (changes, _) = watch::channel(1);
        Self {
            config,
            state: Mutex::new(State {
                index: 1,
                entries: BTreeMap::new(),
            }),
            changes,
        }
    }

    /// Flip the health state of an instance, as the registry's checker would.
    pub fn set_passing(&self, id: &str, passing: bool) -> Result<(), RegistryError> {
        let mut state = self.lock();
        let entry = state
            .entries
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let changed = match (passing, entry.critical_since) {
            (true, Some(_)) => {
                entry.critical_since = None;
                true
            }
            (false, None) => {
                entry.critical_since = Some(Instant::now());
                true
            }
            _ => false,
        };
        if changed {
            debug!(id, passing, "health state changed");
            self.bump(&mut state);
        }
        Ok(())
    }

    /// Registry index; moves on every change.
    pub fn index(&self) -> u64 {
        self.lock().index
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self, state: &mut State) {
        state.index += 1;
        self.changes.send_replace(state.index);
    }

    fn purge_expired(&self, state: &mut State) {
        let now = Instant::now();
        let before = state.entries.len();
        state.entries.retain(|id, entry| {
            let expired = entry.critical_since.is_some_and(|since| {
                now.duration_since(since) > entry.registration.check.deregister_critical_after
            });
            if expired {
                info!(id = %id, "critical instance purged after grace period");
            }
            !expired
        });
        if state.entries.len() != before {
            self.bump(state);
        }
    }

    /// Earliest instant at which a critical instance becomes purgeable.
    fn next_expiry(&self) -> Option<Instant> {
        self.lock()
            .entries
            .values()
            .filter_map(|entry| {
                let since = entry.critical_since?;
                Some(since + entry.registration.check.deregister_critical_after + Duration::from_millis(1))
            })
            .min()
    }

    fn snapshot(&self, query: &ServiceQuery) -> WatchResult {
        let mut state = self.lock();
        self.purge_expired(&mut state);

        let nodes = state
            .entries
            .values()
            .filter(|e| query.matches(&e.registration.name, &e.registration.tags))
            .filter(|e| !query.passing_only || e.passing())
            .map(|e| ServiceNode::new(e.registration.address.clone(), e.registration.port))
            .collect();
        WatchResult {
            index: state.index,
            nodes,
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[async_trait]
impl ServiceRegistry for MemoryRegistry {
    async fn register(&self, registration: &Registration) -> Result<(), RegistryError> {
        registration.validate().map_err(RegistryError::Registration)?;

        let mut state = self.lock();
        state.entries.insert(
            registration.id.clone(),
            Entry {
                registration: registration.clone(),
                critical_since: None,
            },
        );
        self.bump(&mut state);
        info!(id = %registration.id, service = %registration.name, "service registered");
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), RegistryError> {
        let mut state = self.lock();
        if state.entries.remove(id).is_none() {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        self.bump(&mut state);
        info!(id, "service deregistered");
        Ok(())
    }

    async fn watch(
        &self,
        query: &ServiceQuery,
        index: u64,
        wait: Duration,
    ) -> Result<WatchResult, RegistryError> {
        let mut changes = self.changes.subscribe();
        let current = self.snapshot(query);
        if index == 0 || wait.is_zero() || current.index != index {
            return Ok(current);
        }

        // Purges happen lazily, so also wake when a critical instance expires.
        let deadline = Instant::now() + wait;
        loop {
            let wake = self.next_expiry().map_or(deadline, |at| at.min(deadline));
            let changed = tokio::time::timeout_at(wake, changes.changed()).await.is_ok();
            let snapshot = self.snapshot(query);
            if changed || snapshot.index != index || Instant::now() >= deadline {
                return Ok(snapshot);
            }
        }
    }

    fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use waypost_model::HealthCheck;

    use super::*;
    use crate::selector::RoundRobin;

    fn user(id: &str, addr: &str) -> Registration {
        Registration::new(id, "user-srv", addr, 9000)
    }

    #[tokio::test]
    async fn deregister_after_register_hides_instance() {
        let registry = MemoryRegistry::default();
        registry.register(&user("user-1", "10.0.0.5")).await.unwrap();

        let all = ServiceQuery::new("user-srv").passing_only(false);
        assert_eq!(registry.list_services(&all).await.unwrap().len(), 1);

        registry.deregister("user-1").await.unwrap();
        assert!(registry.list_services(&all).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_deregister_reports_not_found() {
        let registry = MemoryRegistry::default();
        registry.register(&user("user-1", "10.0.0.5")).await.unwrap();
        registry.deregister("user-1").await.unwrap();

        let err = registry.deregister("user-1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn register_overwrites_same_id() {
        let registry = MemoryRegistry::default();
        registry.register(&user("user-1", "10.0.0.5")).await.unwrap();
        registry.register(&user("user-1", "10.0.0.9")).await.unwrap();

        let nodes = registry.list_services(&ServiceQuery::new("user-srv")).await.unwrap();
        assert_eq!(nodes, vec![ServiceNode::new("10.0.0.9", 9000)]);
    }

    #[tokio::test]
    async fn malformed_registration_is_rejected() {
        let registry = MemoryRegistry::default();
        let err = registry
            .register(&Registration::new("user-1", "user-srv", "http://10.0.0.5", 9000))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Registration(_)));
    }

    #[tokio::test]
    async fn passing_only_excludes_failing_instances() {
        let registry = MemoryRegistry::default();
        registry.register(&user("user-1", "10.0.0.5")).await.unwrap();
        registry.register(&user("user-2", "10.0.0.6")).await.unwrap();
        registry.set_passing("user-1", false).unwrap();

        let healthy = registry.list_services(&ServiceQuery::new("user-srv")).await.unwrap();
        assert_eq!(healthy, vec![ServiceNode::new("10.0.0.6", 9000)]);

        let all = registry
            .list_services(&ServiceQuery::new("user-srv").passing_only(false))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn tags_must_all_match() {
        let registry = MemoryRegistry::default();
        registry
            .register(&user("user-1", "10.0.0.5").with_tags(["v1", "blue"]))
            .await
            .unwrap();
        registry
            .register(&user("user-2", "10.0.0.6").with_tags(["v1"]))
            .await
            .unwrap();

        let both = ServiceQuery::new("user-srv").with_tags(["v1", "blue"]);
        assert_eq!(
            registry.list_services(&both).await.unwrap(),
            vec![ServiceNode::new("10.0.0.5", 9000)]
        );
        let v1 = ServiceQuery::new("user-srv").with_tags(["v1"]);
        assert_eq!(registry.list_services(&v1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn pick_service_returns_exactly_one_or_errors() {
        let registry = MemoryRegistry::default();
        let query = ServiceQuery::new("user-srv");
        let rr = RoundRobin::new();

        let err = registry.pick_service(&query, &rr).await.unwrap_err();
        assert!(matches!(err, RegistryError::NoInstances(name) if name == "user-srv"));

        registry.register(&user("user-1", "10.0.0.5")).await.unwrap();
        registry.register(&user("user-2", "10.0.0.6")).await.unwrap();
        let a = registry.pick_service(&query, &rr).await.unwrap();
        let b = registry.pick_service(&query, &rr).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn critical_instances_are_purged_after_grace() {
        let registry = MemoryRegistry::default();
        let reg = user("user-1", "10.0.0.5")
            .with_check(HealthCheck::default().with_deregister_after(Duration::from_secs(15)));
        registry.register(&reg).await.unwrap();
        registry.set_passing("user-1", false).unwrap();

        let all = ServiceQuery::new("user-srv").passing_only(false);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(registry.list_services(&all).await.unwrap().len(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(registry.list_services(&all).await.unwrap().is_empty());
        assert!(registry.deregister("user-1").await.unwrap_err().is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_wait_times_out_without_instances() {
        let registry = MemoryRegistry::new(RegistryConfig::default().with_discovery_wait(2));
        let err = registry
            .list_services(&ServiceQuery::new("user-srv"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::DiscoveryTimeout { ref service, waited_secs: 2 } if service == "user-srv"
        ));
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_wait_returns_once_an_instance_appears() {
        let registry = Arc::new(MemoryRegistry::new(
            RegistryConfig::default().with_discovery_wait(30),
        ));

        let late = Arc::clone(&registry);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            late.register(&user("user-1", "10.0.0.5")).await.unwrap();
        });

        let nodes = registry
            .list_services(&ServiceQuery::new("user-srv"))
            .await
            .unwrap();
        assert_eq!(nodes, vec![ServiceNode::new("10.0.0.5", 9000)]);
    }

    #[tokio::test]
    async fn zero_wait_returns_empty_immediately() {
        let registry = MemoryRegistry::default();
        let nodes = registry
            .list_services(&ServiceQuery::new("user-srv"))
            .await
            .unwrap();
        assert!(nodes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn watch_blocks_until_change() {
        let registry = Arc::new(MemoryRegistry::default());
        let query = ServiceQuery::new("user-srv");
        let first = registry.watch(&query, 0, Duration::ZERO).await.unwrap();

        let writer = Arc::clone(&registry);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            writer.register(&user("user-1", "10.0.0.5")).await.unwrap();
        });

        let next = registry
            .watch(&query, first.index, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(next.index > first.index);
        assert_eq!(next.nodes.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_watch_sees_grace_period_purge() {
        let registry = MemoryRegistry::default();
        let reg = user("user-1", "10.0.0.5")
            .with_check(HealthCheck::default().with_deregister_after(Duration::from_secs(2)));
        registry.register(&reg).await.unwrap();
        registry.set_passing("user-1", false).unwrap();

        let all = ServiceQuery::new("user-srv").passing_only(false);
        let index = registry.index();
        let started = Instant::now();
        let result = registry.watch(&all, index, Duration::from_secs(30)).await.unwrap();

        assert!(result.nodes.is_empty());
        assert!(result.index > index);
        assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());
    }
}
