use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tonic::{
    Status,
    transport::{Channel, Endpoint},
};
use tower::discover::Change;
use tracing::{debug, info, trace, warn};

use waypost_model::{LoadBalancingPolicy, ResolvedTarget, ServiceConnectionConfig, ServiceNode};

use crate::{error::ConnectError, resolver::ResolverWatch, transport::TransportConfig};

/// Load-balanced channel to the healthy instances of one service.
///
/// Backends are connected lazily and follow the registry. Under `round_robin`
/// every instance is handed to the balancer; under `pick_first` (also the
/// default when no policy is named) only one instance is, and it is replaced
/// only when it leaves the registry.
/// Background work stops on [`Connection::close`] or when the value is dropped.
pub struct Connection {
    target: ResolvedTarget,
    channel: Channel,
    policy: ServiceConnectionConfig,
    service_config: String,
    nodes: watch::Receiver<Vec<ServiceNode>>,
    active: watch::Receiver<Vec<ServiceNode>>,
    cancel: CancellationToken,
    closed: AtomicBool,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    pub(crate) fn establish(
        target: ResolvedTarget,
        watch: ResolverWatch,
        policy: ServiceConnectionConfig,
        service_config: String,
        transport: &TransportConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (channel, changes) = Channel::balance_channel::<ServiceNode>(transport.buffer);
        let lb = policy
            .load_balancing_policy
            .unwrap_or(LoadBalancingPolicy::PickFirst);
        let (active_tx, active) = watch::channel(Vec::new());
        let feeder = tokio::spawn(feed_balancer(
            target.to_string(),
            lb,
            watch.nodes.clone(),
            changes,
            active_tx,
            transport.clone(),
            cancel.clone(),
        ));

        info!(target = %target, policy = %lb, "connection opened");
        Self {
            target,
            channel,
            policy,
            service_config,
            nodes: watch.nodes,
            active,
            cancel,
            closed: AtomicBool::new(false),
            tasks: vec![watch.task, feeder],
        }
    }

    pub fn target(&self) -> &ResolvedTarget {
        &self.target
    }

    /// Balanced channel; clone it into generated tonic clients.
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    /// Channel policy as a gRPC service config JSON document.
    pub fn service_config(&self) -> &str {
        &self.service_config
    }

    pub fn policy(&self) -> &ServiceConnectionConfig {
        &self.policy
    }

    /// Current backend snapshot.
    pub fn nodes(&self) -> Vec<ServiceNode> {
        self.nodes.borrow().clone()
    }

    /// Backends currently handed to the balancer, sorted.
    pub fn active_backends(&self) -> Vec<ServiceNode> {
        self.active.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait until at least one backend is known.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), ConnectError> {
        if self.is_closed() {
            return Err(ConnectError::Closed(self.target.to_string()));
        }
        match tokio::time::timeout(timeout, self.backend_available()).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ConnectError::Closed(self.target.to_string())),
            Err(_) => Err(ConnectError::DiscoveryTimeout {
                service: self.target.service_name.clone(),
                waited_ms: timeout.as_millis(),
            }),
        }
    }

    /// [`Connection::wait_ready`] bounded by the target's `wait` parameter.
    pub async fn ready(&self) -> Result<(), ConnectError> {
        self.wait_ready(Duration::from_secs(self.target.wait_secs)).await
    }

    /// Run one call under the method policy configured for `service/method`.
    ///
    /// `call` is invoked once per attempt with a clone of the balanced channel.
    /// Without `wait_for_ready` an attempt with no known backend fails fast
    /// with `UNAVAILABLE`. Retries apply only to the policy's retryable codes,
    /// and the policy timeout bounds the whole call including backoff.
    pub async fn invoke<T, F, Fut>(&self, service: &str, method: &str, mut call: F) -> Result<T, Status>
    where
        F: FnMut(Channel) -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        let policy = self.policy.policy_for(service, method);
        let wait_for_ready = policy.is_some_and(|p| p.wait_for_ready);
        let retry = policy.and_then(|p| p.retry_policy.as_ref());
        let deadline = policy.and_then(|p| p.timeout).map(|t| Instant::now() + t);
        let max_attempts = retry.map_or(1, |r| r.max_attempts.max(1));

        let mut attempt = 1u32;
        loop {
            let status = match self.attempt(&mut call, wait_for_ready, deadline).await {
                Ok(value) => return Ok(value),
                Err(status) => status,
            };

            let Some(retry) = retry.filter(|r| r.is_retryable(status.code() as i32)) else {
                return Err(status);
            };
            if attempt >= max_attempts || self.is_closed() {
                return Err(status);
            }
            let delay = retry.backoff(attempt);
            if deadline.is_some_and(|d| Instant::now() + delay >= d) {
                return Err(status);
            }

            debug!(
                target = %self.target,
                service,
                method,
                attempt,
                ?delay,
                code = ?status.code(),
                "retrying call"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt<T, F, Fut>(
        &self,
        call: &mut F,
        wait_for_ready: bool,
        deadline: Option<Instant>,
    ) -> Result<T, Status>
    where
        F: FnMut(Channel) -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        if self.is_closed() {
            return Err(ConnectError::Closed(self.target.to_string()).into());
        }

        if self.nodes.borrow().is_empty() {
            if !wait_for_ready {
                return Err(Status::unavailable(format!(
                    "no healthy backend for {}",
                    self.target
                )));
            }
            let ready = match deadline {
                Some(d) => tokio::time::timeout_at(d, self.backend_available())
                    .await
                    .map_err(|_| Status::deadline_exceeded("deadline exceeded waiting for a backend"))?,
                None => self.backend_available().await,
            };
            if !ready {
                return Err(ConnectError::Closed(self.target.to_string()).into());
            }
        }

        let fut = call(self.channel.clone());
        match deadline {
            Some(d) => tokio::time::timeout_at(d, fut)
                .await
                .map_err(|_| Status::deadline_exceeded("deadline exceeded"))?,
            None => fut.await,
        }
    }

    /// Resolves `true` once a backend is known, `false` if the connection closes first.
    async fn backend_available(&self) -> bool {
        let mut nodes = self.nodes.clone();
        loop {
            if !nodes.borrow_and_update().is_empty() {
                return true;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                changed = nodes.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Stop the resolver watch and release the balancer. Safe to call repeatedly.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        info!(target = %self.target, "connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.cancel.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Backends the balancer should hold for `snapshot` under `policy`.
///
/// `pick_first` keeps the current backend while it is still listed and
/// otherwise takes the first one in snapshot order.
fn desired_backends(
    policy: LoadBalancingPolicy,
    snapshot: &[ServiceNode],
    active: &HashSet<ServiceNode>,
) -> HashSet<ServiceNode> {
    match policy {
        LoadBalancingPolicy::RoundRobin => snapshot.iter().cloned().collect(),
        LoadBalancingPolicy::PickFirst => snapshot
            .iter()
            .find(|node| active.contains(*node))
            .or_else(|| snapshot.first())
            .cloned()
            .into_iter()
            .collect(),
    }
}

/// Mirror node snapshots into the balancer as insert/remove changes.
async fn feed_balancer(
    target: String,
    policy: LoadBalancingPolicy,
    mut nodes: watch::Receiver<Vec<ServiceNode>>,
    changes: mpsc::Sender<Change<ServiceNode, Endpoint>>,
    published: watch::Sender<Vec<ServiceNode>>,
    transport: TransportConfig,
    cancel: CancellationToken,
) {
    let mut active: HashSet<ServiceNode> = HashSet::new();

    loop {
        let snapshot: Vec<ServiceNode> = nodes.borrow_and_update().clone();

        // Nodes without a valid endpoint never reach the balancer.
        let mut fresh: HashMap<ServiceNode, Endpoint> = HashMap::new();
        let mut usable: Vec<ServiceNode> = Vec::with_capacity(snapshot.len());
        for node in snapshot {
            if !active.contains(&node) {
                match transport.endpoint(&node) {
                    Ok(endpoint) => {
                        fresh.insert(node.clone(), endpoint);
                    }
                    Err(e) => {
                        warn!(%target, %node, error = %e, "skipping backend with invalid endpoint");
                        continue;
                    }
                }
            }
            usable.push(node);
        }
        let wanted = desired_backends(policy, &usable, &active);

        let gone: Vec<ServiceNode> = active.difference(&wanted).cloned().collect();
        for node in gone {
            trace!(%target, %node, "removing backend");
            if changes.send(Change::Remove(node.clone())).await.is_err() {
                return;
            }
            active.remove(&node);
        }

        let added: Vec<ServiceNode> = wanted.difference(&active).cloned().collect();
        for node in added {
            let Some(endpoint) = fresh.remove(&node) else {
                continue;
            };
            trace!(%target, %node, "adding backend");
            if changes.send(Change::Insert(node.clone(), endpoint)).await.is_err() {
                return;
            }
            active.insert(node);
        }

        published.send_if_modified(|current| {
            let mut next: Vec<ServiceNode> = active.iter().cloned().collect();
            next.sort();
            if *current == next {
                return false;
            }
            *current = next;
            true
        });

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = nodes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!(%target, backends = active.len(), "balancer feed stopped");
}
