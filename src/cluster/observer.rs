use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use super::service::ClusterStateService;
use super::state::ClusterSnapshot;

/// How a wait on the cluster state ended.
#[derive(Debug, Clone)]
pub enum ObservedChange {
    /// A newer snapshot satisfied the predicate.
    Matched(Arc<ClusterSnapshot>),
    TimedOut,
    /// The supplier closed before a matching snapshot arrived.
    ServiceClosed,
}

/// Waits for cluster state changes that satisfy a predicate.
///
/// The observer remembers the last snapshot it saw, so a publication that lands
/// between construction and `wait_for_next_change` is not lost.
pub struct ClusterStateObserver {
    receiver: watch::Receiver<Arc<ClusterSnapshot>>,
    last_observed: Arc<ClusterSnapshot>,
}

impl ClusterStateObserver {
    pub fn new(service: &ClusterStateService) -> Self {
        let mut receiver = service.subscribe();
        let last_observed = receiver.borrow_and_update().clone();
        Self {
            receiver,
            last_observed,
        }
    }

    pub fn observed_state(&self) -> Arc<ClusterSnapshot> {
        self.last_observed.clone()
    }

    /// Resolves on the first later snapshot for which `predicate` holds, on timeout,
    /// or when the supplier closes. `None` waits without a deadline.
    pub async fn wait_for_next_change<P>(
        &mut self,
        predicate: P,
        timeout: Option<Duration>,
    ) -> ObservedChange
    where
        P: Fn(&ClusterSnapshot) -> bool,
    {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        loop {
            let changed = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, self.receiver.changed()).await {
                        Ok(changed) => changed,
                        Err(_) => return ObservedChange::TimedOut,
                    }
                }
                None => self.receiver.changed().await,
            };

            if changed.is_err() {
                return ObservedChange::ServiceClosed;
            }

            let state = self.receiver.borrow_and_update().clone();
            self.last_observed = state.clone();

            if predicate(&state) {
                return ObservedChange::Matched(state);
            }

            tracing::trace!(
                "Cluster state version {} does not match, waiting for next change",
                state.version
            );
        }
    }
}
