//! Cluster Liveness Library
//!
//! The liveness layer of a distributed search cluster: it notices members that stop
//! answering, lets coordinators wait for shard copies to come up, and gives long-running
//! operations a single-shot cancellation flag.
//!
//! ## Architecture Modules
//! - **`membership`**: node identity (`NodeId`, `Node`, `ClusterName`).
//! - **`cluster`**: versioned cluster snapshots, the supplier that publishes them and an
//!   observer that waits for a snapshot matching a predicate.
//! - **`transport`**: the ping request/response transport and its UDP implementation.
//! - **`fault_detection`**: `NodesFaultDetection`, which pings every member on its own
//!   probe cycle and notifies listeners when a member fails.
//! - **`readiness`**: `ActiveShardCount` and the `ActiveShardsObserver` wait.
//! - **`tasks`**: task descriptors and `CancellableTask`.
//! - **`settings`**: node configuration loaded from JSON, with defaults.

pub mod cluster;
pub mod fault_detection;
pub mod membership;
pub mod readiness;
pub mod settings;
pub mod tasks;
pub mod transport;
