//! Transport Module
//!
//! The request/response transport the fault detector pings over. Only the ping action
//! is carried; responses are pure acknowledgments.
//!
//! ## Contract
//! - **`send_ping`**: one request, one outcome. The caller bounds the wait; a transport
//!   may also honour the timeout it is handed.
//! - **`connect`**: re-establishes connectivity to a node after a disconnect.
//! - **`register_ping_handler`**: installs the receiver-side handler for inbound pings.
//! - **`subscribe_disconnects`**: stream of nodes whose connection dropped.
//!
//! ## Submodules
//! - **`udp`**: bincode envelopes over a single UDP socket.

pub mod udp;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::fault_detection::error::FaultDetectionError;
use crate::fault_detection::types::{PingRequest, PingResponse};
use crate::membership::types::{Node, NodeId};

pub const PING_ACTION_NAME: &str = "internal:discovery/zen/fd/ping";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The node could not be reached at the connection level.
    #[error("[{node}] connect failed: {reason}")]
    ConnectFailed { node: NodeId, reason: String },
    #[error("[{node}][{action}] request timed out after {timeout:?}", action = PING_ACTION_NAME)]
    Timeout { node: NodeId, timeout: Duration },
    /// The remote handler answered with an explicit error.
    #[error("[{node}] remote error: {message}")]
    Remote { node: NodeId, message: String },
    #[error("transport i/o error: {0}")]
    Io(String),
    #[error("transport serialization error: {0}")]
    Serialization(String),
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Connection-level failures bypass the retry budget of a probe cycle.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, TransportError::ConnectFailed { .. })
    }
}

/// Receiver side of the ping action.
pub trait PingHandler: Send + Sync {
    fn handle_ping(&self, request: PingRequest) -> Result<PingResponse, FaultDetectionError>;
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send_ping(
        &self,
        target: &Node,
        request: PingRequest,
        timeout: Duration,
    ) -> Result<PingResponse, TransportError>;

    async fn connect(&self, node: &Node) -> Result<(), TransportError>;

    fn register_ping_handler(&self, handler: Arc<dyn PingHandler>);

    fn subscribe_disconnects(&self) -> broadcast::Receiver<Node>;
}
