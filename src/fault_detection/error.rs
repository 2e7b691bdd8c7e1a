use thiserror::Error;

use crate::membership::types::{ClusterName, NodeId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FaultDetectionError {
    /// Usually a node restarted on the address of another node.
    #[error("Got pinged as node [{target}], but I am node [{local}]")]
    TargetMismatch { target: NodeId, local: NodeId },
    #[error("Got pinged with cluster name [{received}], but I'm part of cluster [{local}]")]
    ClusterNameMismatch {
        received: ClusterName,
        local: ClusterName,
    },
    /// Listener notification refused because the detector is shutting down.
    #[error("fault detection notifications rejected, local node is shutting down")]
    DispatchRejected,
}

impl FaultDetectionError {
    pub fn is_protocol_mismatch(&self) -> bool {
        matches!(
            self,
            FaultDetectionError::TargetMismatch { .. }
                | FaultDetectionError::ClusterNameMismatch { .. }
        )
    }
}
