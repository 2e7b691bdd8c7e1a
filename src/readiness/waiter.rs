//! Active Shards Observer
//!
//! Holds a caller back until enough shard copies of a set of indices are started,
//! or a timeout expires.
//!
//! ## Resolution
//! Exactly one of the two callbacks runs, exactly once:
//! - `on_result(true)`: the requirement was met (immediately, or by a later snapshot).
//! - `on_result(false)`: the timeout elapsed first.
//! - `on_failure(..)`: the cluster state service closed, or the bound task was cancelled.
//!
//! Immediate outcomes run on the calling thread. Otherwise a single spawned waiter owns
//! both callbacks and retires itself when it resolves.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

use super::active_shards::ActiveShardCount;
use crate::cluster::observer::{ClusterStateObserver, ObservedChange};
use crate::cluster::service::ClusterStateService;
use crate::cluster::state::ClusterSnapshot;
use crate::membership::types::Node;
use crate::settings::ReadinessSettings;
use crate::tasks::cancellable::CancellableTask;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReadinessError {
    /// The local node shut down while the wait was outstanding.
    #[error("node closed {node}")]
    NodeClosed { node: Node },
    #[error("waiting for active shards cancelled [{reason}]")]
    Cancelled { reason: String },
}

pub struct ActiveShardsObserver {
    cluster: Arc<ClusterStateService>,
    settings: ReadinessSettings,
    pending: Arc<AtomicUsize>,
}

impl ActiveShardsObserver {
    pub fn new(cluster: Arc<ClusterStateService>, settings: ReadinessSettings) -> Self {
        Self {
            cluster,
            settings,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of waits currently subscribed to cluster state changes.
    pub fn pending_waits(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Waits for `count` active copies on every shard of `indices`.
    ///
    /// `timeout = None` uses the configured default readiness timeout.
    pub fn wait_for_active_shards<R, F>(
        &self,
        indices: Vec<String>,
        count: ActiveShardCount,
        timeout: Option<Duration>,
        on_result: R,
        on_failure: F,
    ) where
        R: FnOnce(bool) + Send + 'static,
        F: FnOnce(ReadinessError) + Send + 'static,
    {
        self.wait_internal(indices, count, timeout, None, on_result, on_failure);
    }

    /// Same as [`Self::wait_for_active_shards`], but gives up with
    /// [`ReadinessError::Cancelled`] once `task` is cancelled.
    pub fn wait_for_active_shards_cancellable<R, F>(
        &self,
        indices: Vec<String>,
        count: ActiveShardCount,
        timeout: Option<Duration>,
        task: Arc<CancellableTask>,
        on_result: R,
        on_failure: F,
    ) where
        R: FnOnce(bool) + Send + 'static,
        F: FnOnce(ReadinessError) + Send + 'static,
    {
        self.wait_internal(indices, count, timeout, Some(task), on_result, on_failure);
    }

    /// Async form: `Ok(true)` when enough shards are active, `Ok(false)` on timeout.
    pub async fn wait(
        &self,
        indices: Vec<String>,
        count: ActiveShardCount,
        timeout: Option<Duration>,
    ) -> Result<bool, ReadinessError> {
        let (tx, rx) = oneshot::channel();
        let failure_tx = Arc::new(parking_lot::Mutex::new(Some(tx)));
        let result_tx = failure_tx.clone();

        self.wait_for_active_shards(
            indices,
            count,
            timeout,
            move |active| {
                if let Some(tx) = result_tx.lock().take() {
                    let _ = tx.send(Ok(active));
                }
            },
            move |error| {
                if let Some(tx) = failure_tx.lock().take() {
                    let _ = tx.send(Err(error));
                }
            },
        );

        rx.await.unwrap_or_else(|_| {
            Err(ReadinessError::NodeClosed {
                node: self.cluster.local_node().clone(),
            })
        })
    }

    fn wait_internal<R, F>(
        &self,
        indices: Vec<String>,
        count: ActiveShardCount,
        timeout: Option<Duration>,
        task: Option<Arc<CancellableTask>>,
        on_result: R,
        on_failure: F,
    ) where
        R: FnOnce(bool) + Send + 'static,
        F: FnOnce(ReadinessError) + Send + 'static,
    {
        if count.is_none() {
            on_result(true);
            return;
        }

        let mut observer = ClusterStateObserver::new(&self.cluster);
        if count.enough_shards_active(&observer.observed_state(), indices.as_slice()) {
            on_result(true);
            return;
        }

        if let Some(task) = &task
            && let Err(cancelled) = task.ensure_not_cancelled()
        {
            on_failure(ReadinessError::Cancelled {
                reason: cancelled.reason,
            });
            return;
        }

        let timeout = timeout.unwrap_or_else(|| self.settings.default_timeout());
        let local_node = self.cluster.local_node().clone();
        let pending = PendingWait::register(self.pending.clone());

        tracing::trace!(
            "Waiting up to {:?} for [{}] active shards on {:?}",
            timeout,
            count,
            indices
        );

        tokio::spawn(async move {
            let predicate = |state: &ClusterSnapshot| count.enough_shards_active(state, indices.as_slice());

            let outcome = match task {
                Some(task) => {
                    tokio::select! {
                        change = observer.wait_for_next_change(predicate, Some(timeout)) => Ok(change),
                        _ = task.cancelled() => Err(task.reason_cancelled().unwrap_or_default().to_string()),
                    }
                }
                None => Ok(observer.wait_for_next_change(predicate, Some(timeout)).await),
            };

            drop(pending);

            match outcome {
                Ok(ObservedChange::Matched(state)) => {
                    tracing::trace!(
                        "{:?} reached [{}] active shards at cluster state version {}",
                        indices,
                        count,
                        state.version
                    );
                    on_result(true);
                }
                Ok(ObservedChange::TimedOut) => {
                    tracing::debug!(
                        "{:?} timed out after {:?} waiting for [{}] active shards",
                        indices,
                        timeout,
                        count
                    );
                    on_result(false);
                }
                Ok(ObservedChange::ServiceClosed) => {
                    tracing::debug!(
                        "{:?} cluster service closed while waiting for enough shards to be started.",
                        indices
                    );
                    on_failure(ReadinessError::NodeClosed { node: local_node });
                }
                Err(reason) => {
                    tracing::debug!("{:?} wait for active shards cancelled: {}", indices, reason);
                    on_failure(ReadinessError::Cancelled { reason });
                }
            }
        });
    }
}

/// Counts an outstanding subscription for as long as it is alive.
struct PendingWait(Arc<AtomicUsize>);

impl PendingWait {
    fn register(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
