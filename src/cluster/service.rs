//! In-process cluster state supplier.
//!
//! The authoritative state is produced elsewhere (a coordinator applying published
//! states); this service only stores the latest snapshot and fans it out to
//! subscribers. Subscribers see versions in increasing order and may skip
//! intermediate versions when they fall behind: only the latest snapshot matters to
//! predicates evaluated over it.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

use super::error::ClusterStateError;
use super::state::ClusterSnapshot;
use crate::membership::types::Node;

pub struct ClusterStateService {
    local_node: Node,
    sender: Mutex<Option<watch::Sender<Arc<ClusterSnapshot>>>>,
    receiver: watch::Receiver<Arc<ClusterSnapshot>>,
}

impl ClusterStateService {
    pub fn new(local_node: Node, initial: ClusterSnapshot) -> Arc<Self> {
        let (sender, receiver) = watch::channel(Arc::new(initial));
        Arc::new(Self {
            local_node,
            sender: Mutex::new(Some(sender)),
            receiver,
        })
    }

    pub fn local_node(&self) -> &Node {
        &self.local_node
    }

    /// Latest published snapshot. Still readable after `close`.
    pub fn current(&self) -> Arc<ClusterSnapshot> {
        self.receiver.borrow().clone()
    }

    /// Returns a receiver positioned at the current snapshot.
    ///
    /// `changed()` on the receiver fires for every later publication and fails once
    /// the service is closed.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ClusterSnapshot>> {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.subscribe(),
            None => {
                let mut receiver = self.receiver.clone();
                receiver.borrow_and_update();
                receiver
            }
        }
    }

    pub fn publish(&self, snapshot: ClusterSnapshot) -> Result<(), ClusterStateError> {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(ClusterStateError::Closed)?;

        let current = sender.borrow().version;
        if snapshot.version <= current {
            return Err(ClusterStateError::StaleVersion {
                current,
                offered: snapshot.version,
            });
        }

        tracing::debug!(
            "Publishing cluster state version {} ({} nodes, {} indices)",
            snapshot.version,
            snapshot.nodes.len(),
            snapshot.routing.len()
        );
        sender.send_replace(Arc::new(snapshot));
        Ok(())
    }

    /// Closes the service. Subscribers observe the closure on their next wait.
    pub fn close(&self) {
        if self.sender.lock().take().is_some() {
            tracing::info!("Cluster state service closed on {}", self.local_node);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }
}
