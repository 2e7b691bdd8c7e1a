//! Membership Identity Module
//!
//! Defines how members of the cluster are identified. Everything else in the crate
//! (fault detection, cluster state, the ping wire protocol) speaks in these types.
//!
//! ## Identity Rules
//! - **`NodeId`**: opaque, globally unique (UUID v4 unless supplied by the operator).
//! - **`Node`**: id plus a display name and the address its transport listens on.
//!   Equality and hashing use the id only.
//! - **`ClusterName`**: guards against cross-cluster pings after address reuse.

pub mod types;
