//! Listener Registry and Notification Dispatch
//!
//! Listeners are stored as an immutable `Arc<Vec<_>>` that is swapped on every add or
//! remove. Dispatch takes the current snapshot and iterates it without holding a lock,
//! so registration never waits on a notification in progress and vice versa.
//!
//! Notifications are delivered by a dedicated task, one at a time and in submission
//! order, so listeners never run on a probe cycle or transport task.

use parking_lot::{Mutex, RwLock};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::error::FaultDetectionError;
use super::types::PingRequest;
use crate::membership::types::Node;

pub trait FaultDetectionListener: Send + Sync {
    fn on_node_failure(&self, _node: &Node, _reason: &str) {}

    fn on_ping_received(&self, _request: &PingRequest) {}
}

type ListenerList = Arc<Vec<Arc<dyn FaultDetectionListener>>>;

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<ListenerList>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn FaultDetectionListener>) {
        let mut listeners = self.listeners.write();
        let mut next = listeners.as_ref().clone();
        next.push(listener);
        *listeners = Arc::new(next);
    }

    /// Removes one registration of `listener`. Returns `false` if it was not registered.
    pub fn remove(&self, listener: &Arc<dyn FaultDetectionListener>) -> bool {
        let mut listeners = self.listeners.write();
        let Some(position) = listeners.iter().position(|l| Arc::ptr_eq(l, listener)) else {
            return false;
        };
        let mut next = listeners.as_ref().clone();
        next.remove(position);
        *listeners = Arc::new(next);
        true
    }

    pub fn snapshot(&self) -> ListenerList {
        self.listeners.read().clone()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Notification {
    NodeFailure { node: Node, reason: String },
    PingReceived(PingRequest),
}

pub(crate) struct NotificationDispatcher {
    sender: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
}

impl NotificationDispatcher {
    /// Spawns the delivery task. Must be called inside a tokio runtime.
    pub(crate) fn start(registry: Arc<ListenerRegistry>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(deliver(receiver, registry));
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    pub(crate) fn dispatch(&self, notification: Notification) -> Result<(), FaultDetectionError> {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => sender
                .send(notification)
                .map_err(|_| FaultDetectionError::DispatchRejected),
            None => Err(FaultDetectionError::DispatchRejected),
        }
    }

    /// Rejects further notifications. Already queued ones are still delivered.
    pub(crate) fn shutdown(&self) {
        self.sender.lock().take();
    }
}

async fn deliver(
    mut receiver: mpsc::UnboundedReceiver<Notification>,
    registry: Arc<ListenerRegistry>,
) {
    while let Some(notification) = receiver.recv().await {
        let listeners = registry.snapshot();

        for listener in listeners.iter() {
            let outcome = catch_unwind(AssertUnwindSafe(|| match &notification {
                Notification::NodeFailure { node, reason } => listener.on_node_failure(node, reason),
                Notification::PingReceived(request) => listener.on_ping_received(request),
            }));

            if outcome.is_err() {
                tracing::warn!("Fault detection listener panicked handling {:?}", notification);
            }
        }
    }

    tracing::debug!("Fault detection notification dispatcher stopped");
}
