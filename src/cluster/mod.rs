//! Cluster State Module
//!
//! Consumes the authoritative cluster state as opaque, versioned snapshots.
//! This crate never computes membership or placement itself; it only reads them.
//!
//! ## Submodules
//! - **`state`**: the immutable `ClusterSnapshot` (members, coordinator, shard routing).
//! - **`service`**: `ClusterStateService`, the in-process supplier (publish, current, subscribe, close).
//! - **`observer`**: `ClusterStateObserver`, a predicate wait over successive snapshots.
//! - **`error`**: supplier errors.

pub mod error;
pub mod observer;
pub mod service;
pub mod state;
