use thiserror::Error;

/// Errors returned by the cluster state supplier.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClusterStateError {
    /// A snapshot must carry a strictly higher version than the current one.
    #[error("rejecting cluster state version [{offered}], current version is [{current}]")]
    StaleVersion { current: i64, offered: i64 },
    /// The supplier has been closed (node shutting down).
    #[error("cluster state service is closed")]
    Closed,
}
