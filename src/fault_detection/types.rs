use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::membership::types::{ClusterName, Node, NodeId};

/// Liveness probe sent to a monitored node.
///
/// `cluster_name` is `None` when the sender predates cluster-name checks; receivers
/// accept such pings from any cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRequest {
    /// The node the sender believes it is pinging.
    pub target_node: NodeId,
    pub cluster_name: Option<ClusterName>,
    /// The node running the probe cycle.
    pub coordinator_node: NodeId,
    pub cluster_state_version: i64,
}

/// Empty acknowledgment of a [`PingRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse;

/// Distinguishes one probe cycle from any earlier cycle for the same node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u64);

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Where a probe cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePhase {
    /// Installed, first ping not sent yet.
    Idle,
    /// A ping is in flight.
    AwaitingResponse,
    /// Last ping succeeded; waiting out the ping interval.
    Backoff,
}

/// The monitored-set entry for one node.
#[derive(Debug, Clone)]
pub struct ProbeCycle {
    pub node: Node,
    pub generation: Generation,
    /// Consecutive failed attempts since the last successful ping.
    pub retry_count: u32,
    pub phase: ProbePhase,
    retired: Arc<Notify>,
}

impl ProbeCycle {
    pub fn new(node: Node, generation: Generation) -> Self {
        Self {
            node,
            generation,
            retry_count: 0,
            phase: ProbePhase::Idle,
            retired: Arc::new(Notify::new()),
        }
    }

    /// Tells the task driving this cycle to drop its in-flight ping or backoff and exit.
    ///
    /// Only the cycle task waits on the signal, so the stored permit is never lost.
    pub fn retire(&self) {
        self.retired.notify_one();
    }

    pub(crate) fn retired_signal(&self) -> Arc<Notify> {
        self.retired.clone()
    }
}
