//! Cancellable Task
//!
//! A one-way `Running -> Cancelled` flag attached to a task. Cancellation never
//! interrupts the work itself: long-running code polls [`CancellableTask::is_cancelled`]
//! (or awaits [`CancellableTask::cancelled`]) at points where stopping is safe.

use std::sync::OnceLock;
use thiserror::Error;
use tokio::sync::Notify;

use super::types::{Task, TaskId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("task cancelled [{reason}]")]
pub struct TaskCancelledError {
    pub reason: String,
}

/// Per-task cancellation capabilities and hook.
///
/// The task tree manager that cascades cancellation lives outside this crate; it
/// reads the two flags to decide what to propagate.
pub trait CancellationBehavior: Send + Sync {
    /// Runs once, on the thread that won the cancellation.
    fn on_cancelled(&self) {}

    /// Cancel this task when the node that requested it leaves the cluster.
    fn cancel_on_parent_leaving(&self) -> bool {
        true
    }

    /// Whether cancelling this task must also cancel the tasks it spawned.
    fn should_cancel_children_on_cancellation(&self) -> bool;
}

pub struct CancellableTask {
    task: Task,
    // Set exactly once; presence of a reason is the cancelled state.
    reason: OnceLock<String>,
    notify: Notify,
    behavior: Box<dyn CancellationBehavior>,
}

impl CancellableTask {
    pub fn new(task: Task, behavior: impl CancellationBehavior + 'static) -> Self {
        Self {
            task,
            reason: OnceLock::new(),
            notify: Notify::new(),
            behavior: Box::new(behavior),
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn parent_task_id(&self) -> &TaskId {
        &self.task.parent_task_id
    }

    /// Cancels the task. Returns `true` for the single caller that performed the
    /// transition; every other call is a no-op returning `false`.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        if self.reason.set(reason.into()).is_err() {
            tracing::trace!("Task {} already cancelled", self.task.id);
            return false;
        }

        tracing::debug!(
            "Cancelled task {} [{}]: {}",
            self.task.id,
            self.task.action,
            self.reason_cancelled().unwrap_or_default()
        );
        self.notify.notify_waiters();
        self.behavior.on_cancelled();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason.get().is_some()
    }

    pub fn reason_cancelled(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }

    /// Returns an error once the task has been cancelled; meant for `?` at safe points.
    pub fn ensure_not_cancelled(&self) -> Result<(), TaskCancelledError> {
        match self.reason.get() {
            Some(reason) => Err(TaskCancelledError {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Completes once the task is cancelled.
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    pub fn cancel_on_parent_leaving(&self) -> bool {
        self.behavior.cancel_on_parent_leaving()
    }

    pub fn should_cancel_children_on_cancellation(&self) -> bool {
        self.behavior.should_cancel_children_on_cancellation()
    }
}

impl std::fmt::Debug for CancellableTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellableTask")
            .field("task", &self.task)
            .field("reason", &self.reason.get())
            .finish()
    }
}
