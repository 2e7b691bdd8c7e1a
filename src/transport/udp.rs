//! UDP Transport
//!
//! Carries ping requests and acknowledgments as bincode-encoded envelopes over one UDP
//! socket per node. Requests are correlated with responses by a per-transport request id.
//!
//! UDP has no connections, so `connect` always succeeds and disconnects are only
//! reported when the operating system rejects a send outright.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use super::{PING_ACTION_NAME, PingHandler, Transport, TransportError};
use crate::fault_detection::types::{PingRequest, PingResponse};
use crate::membership::types::{Node, NodeId};

const MAX_DATAGRAM_SIZE: usize = 65_536;
const DISCONNECT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Envelope {
    Request {
        request_id: u64,
        action: String,
        request: PingRequest,
    },
    Response {
        request_id: u64,
    },
    Error {
        request_id: u64,
        message: String,
    },
}

struct PendingRequest {
    node: NodeId,
    /// Only replies from this address complete the request.
    addr: SocketAddr,
    reply: oneshot::Sender<Result<PingResponse, TransportError>>,
}

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    next_request_id: AtomicU64,
    pending: DashMap<u64, PendingRequest>,
    handler: RwLock<Option<Arc<dyn PingHandler>>>,
    disconnects: broadcast::Sender<Node>,
}

impl UdpTransport {
    pub async fn bind(bind_addr: SocketAddr) -> Result<Arc<Self>, TransportError> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let (disconnects, _) = broadcast::channel(DISCONNECT_CHANNEL_CAPACITY);

        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            next_request_id: AtomicU64::new(1),
            pending: DashMap::new(),
            handler: RwLock::new(None),
            disconnects,
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.socket
            .local_addr()
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Spawns the receive loop. Abort the handle to stop receiving.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let transport = self.clone();
        tokio::spawn(async move {
            transport.receive_loop().await;
        })
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<Envelope>(&buf[..len]) {
                    Ok(envelope) => self.handle_envelope(envelope, src).await,
                    Err(e) => {
                        tracing::warn!("Failed to deserialize envelope from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_envelope(&self, envelope: Envelope, src: SocketAddr) {
        match envelope {
            Envelope::Request {
                request_id,
                action,
                request,
            } => {
                let reply = self.handle_request(&action, request);
                let reply = match reply {
                    Ok(PingResponse) => Envelope::Response { request_id },
                    Err(message) => {
                        tracing::debug!("Rejecting [{}] request from {}: {}", action, src, message);
                        Envelope::Error {
                            request_id,
                            message,
                        }
                    }
                };
                if let Err(e) = self.send_envelope(&reply, src).await {
                    tracing::warn!("Failed to reply to {}: {}", src, e);
                }
            }
            Envelope::Response { request_id } => {
                self.complete(request_id, src, |_| Ok(PingResponse));
            }
            Envelope::Error {
                request_id,
                message,
            } => {
                self.complete(request_id, src, |node| Err(TransportError::Remote { node, message }));
            }
        }
    }

    fn handle_request(&self, action: &str, request: PingRequest) -> Result<PingResponse, String> {
        if action != PING_ACTION_NAME {
            return Err(format!("no handler for action [{}]", action));
        }
        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => handler.handle_ping(request).map_err(|e| e.to_string()),
            None => Err(format!("no handler registered for [{}]", action)),
        }
    }

    fn complete<F>(&self, request_id: u64, src: SocketAddr, outcome: F)
    where
        F: FnOnce(NodeId) -> Result<PingResponse, TransportError>,
    {
        match self.pending.remove_if(&request_id, |_, pending| pending.addr == src) {
            Some((_, pending)) => {
                let _ = pending.reply.send(outcome(pending.node));
            }
            None => {
                tracing::trace!("Dropping unexpected reply for request {} from {}", request_id, src);
            }
        }
    }

    async fn send_envelope(&self, envelope: &Envelope, addr: SocketAddr) -> std::io::Result<()> {
        let encoded = bincode::serialize(envelope)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e.to_string()))?;
        self.socket.send_to(&encoded, addr).await?;
        Ok(())
    }
}

/// Drops the pending entry when a send is abandoned (timeout or caller gone).
struct PendingGuard<'a> {
    pending: &'a DashMap<u64, PendingRequest>,
    request_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.request_id);
    }
}

fn is_unreachable(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::NetworkUnreachable
            | ErrorKind::HostUnreachable
            | ErrorKind::AddrNotAvailable
    )
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_ping(
        &self,
        target: &Node,
        request: PingRequest,
        timeout: Duration,
    ) -> Result<PingResponse, TransportError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (reply, receiver) = oneshot::channel();
        self.pending.insert(
            request_id,
            PendingRequest {
                node: target.id.clone(),
                addr: target.addr,
                reply,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            request_id,
        };

        let envelope = Envelope::Request {
            request_id,
            action: PING_ACTION_NAME.to_string(),
            request,
        };
        let encoded =
            bincode::serialize(&envelope).map_err(|e| TransportError::Serialization(e.to_string()))?;

        if let Err(e) = self.socket.send_to(&encoded, target.addr).await {
            if is_unreachable(e.kind()) {
                let _ = self.disconnects.send(target.clone());
                return Err(TransportError::ConnectFailed {
                    node: target.id.clone(),
                    reason: e.to_string(),
                });
            }
            return Err(TransportError::Io(e.to_string()));
        }
        tracing::trace!("Sent ping {} to {}", request_id, target);

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout {
                node: target.id.clone(),
                timeout,
            }),
        }
    }

    async fn connect(&self, node: &Node) -> Result<(), TransportError> {
        tracing::trace!("UDP transport has no connection to establish for {}", node);
        Ok(())
    }

    fn register_ping_handler(&self, handler: Arc<dyn PingHandler>) {
        *self.handler.write() = Some(handler);
    }

    fn subscribe_disconnects(&self) -> broadcast::Receiver<Node> {
        self.disconnects.subscribe()
    }
}
