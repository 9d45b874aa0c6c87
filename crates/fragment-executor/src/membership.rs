//! Cluster membership notifications.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::handle::NodeEndpoint;

/// Reacts to nodes joining or leaving the cluster.
pub trait MembershipListener: Send + Sync {
    fn nodes_registered(&self, _registered: &HashSet<NodeEndpoint>) {}

    fn nodes_departed(&self, departed: &HashSet<NodeEndpoint>);
}

/// Token returned by [`ClusterMembership::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// In-process registry of membership listeners.
#[derive(Default)]
pub struct ClusterMembership {
    listeners: Mutex<Vec<(ListenerId, Arc<dyn MembershipListener>)>>,
    next_id: AtomicU64,
}

impl ClusterMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn MembershipListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    /// Returns whether the listener was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn nodes_registered(&self, registered: &HashSet<NodeEndpoint>) {
        for listener in self.snapshot() {
            listener.nodes_registered(registered);
        }
    }

    pub fn nodes_departed(&self, departed: &HashSet<NodeEndpoint>) {
        tracing::debug!(count = departed.len(), "Nodes departed");
        for listener in self.snapshot() {
            listener.nodes_departed(departed);
        }
    }

    // Listeners run outside the lock so they may (de)register themselves.
    fn snapshot(&self) -> Vec<Arc<dyn MembershipListener>> {
        self.listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }
}
