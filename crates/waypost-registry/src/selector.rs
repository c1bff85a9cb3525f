use std::sync::atomic::{AtomicUsize, Ordering};

use waypost_model::ServiceNode;

/// Picks one instance out of a discovery result.
pub trait Selector: Send + Sync {
    fn select(&self, nodes: &[ServiceNode]) -> Option<ServiceNode>;
}

impl<F> Selector for F
where
    F: Fn(&[ServiceNode]) -> Option<ServiceNode> + Send + Sync,
{
    fn select(&self, nodes: &[ServiceNode]) -> Option<ServiceNode> {
        self(nodes)
    }
}

/// Always the first instance in registry order.
#[derive(Debug, Default, Clone, Copy)]
pub struct First;

impl Selector for First {
    fn select(&self, nodes: &[ServiceNode]) -> Option<ServiceNode> {
        nodes.first().cloned()
    }
}

/// Cycles through instances across calls.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Selector for RoundRobin {
    fn select(&self, nodes: &[ServiceNode]) -> Option<ServiceNode> {
        if nodes.is_empty() {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % nodes.len();
        nodes.get(i).cloned()
    }
}
