//! Nodes Fault Detection
//!
//! Pings every node of the current membership on its own probe cycle and reports
//! nodes that stop answering.
//!
//! ## Probe Cycle
//! Each monitored node has one entry in the monitored set, tagged with a fresh
//! [`Generation`]. The task driving a cycle re-checks that generation before every
//! step, and every removal retires the cycle, which drops its in-flight ping or backoff
//! right away. Pings to one node pass through a per-node gate, so a re-added node is
//! not pinged until the previous cycle's request is gone. The task holds the detector
//! weakly and exits once it is dropped.
//! 1. `AwaitingResponse`: send a ping bounded by `ping_timeout`.
//! 2. On success: reset the retry counter, `Backoff` for `ping_interval`, repeat.
//! 3. On a timeout or explicit error: count the attempt and resend right away; once
//!    `ping_retries` attempts failed in a row, remove the entry and report the node.
//! 4. On a connection failure: leave the retry budget alone and go through
//!    [`NodesFaultDetection::handle_transport_disconnect`].

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::error::FaultDetectionError;
use super::listeners::{FaultDetectionListener, ListenerRegistry, Notification, NotificationDispatcher};
use super::types::{Generation, PingRequest, PingResponse, ProbeCycle, ProbePhase};
use crate::cluster::service::ClusterStateService;
use crate::cluster::state::ClusterSnapshot;
use crate::membership::types::{ClusterName, Node, NodeId};
use crate::settings::{FaultDetectionSettings, format_duration};
use crate::transport::{PingHandler, Transport, TransportError};

enum NextStep {
    SendNow,
    Backoff(Duration),
    Stop,
}

pub struct NodesFaultDetection {
    local_node: Node,
    cluster_name: ClusterName,
    settings: FaultDetectionSettings,
    transport: Arc<dyn Transport>,
    cluster_state: Arc<ClusterStateService>,
    monitored: DashMap<NodeId, ProbeCycle>,
    /// Outlives individual cycles; removed once no cycle holds it.
    ping_gates: DashMap<NodeId, Arc<tokio::sync::Mutex<()>>>,
    generations: AtomicU64,
    listeners: Arc<ListenerRegistry>,
    dispatcher: NotificationDispatcher,
}

impl NodesFaultDetection {
    /// Creates the detector and registers its ping handler with `transport`.
    ///
    /// Must be called inside a tokio runtime: the notification dispatcher and the
    /// connection listener are spawned here.
    pub fn new(
        local_node: Node,
        cluster_name: ClusterName,
        settings: FaultDetectionSettings,
        transport: Arc<dyn Transport>,
        cluster_state: Arc<ClusterStateService>,
    ) -> Arc<Self> {
        let listeners = Arc::new(ListenerRegistry::new());
        let dispatcher = NotificationDispatcher::start(listeners.clone());

        let detection = Arc::new(Self {
            local_node,
            cluster_name,
            settings,
            transport,
            cluster_state,
            monitored: DashMap::new(),
            ping_gates: DashMap::new(),
            generations: AtomicU64::new(0),
            listeners,
            dispatcher,
        });

        tracing::debug!(
            "[node  ] uses ping_interval [{}], ping_timeout [{}], ping_retries [{}]",
            format_duration(detection.settings.ping_interval()),
            format_duration(detection.settings.ping_timeout()),
            detection.settings.ping_retries
        );

        detection
            .transport
            .register_ping_handler(Arc::new(InboundPings(Arc::downgrade(&detection))));

        if detection.settings.register_connection_listener {
            detection.spawn_connection_listener();
        }

        detection
    }

    pub fn local_node(&self) -> &Node {
        &self.local_node
    }

    pub fn add_listener(&self, listener: Arc<dyn FaultDetectionListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn FaultDetectionListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Nodes currently under fault detection.
    pub fn monitored_nodes(&self) -> Vec<Node> {
        self.monitored
            .iter()
            .map(|entry| entry.value().node.clone())
            .collect()
    }

    pub fn is_monitoring(&self, id: &NodeId) -> bool {
        self.monitored.contains_key(id)
    }

    pub fn retry_count(&self, id: &NodeId) -> Option<u32> {
        self.monitored.get(id).map(|cycle| cycle.retry_count)
    }

    pub fn probe_phase(&self, id: &NodeId) -> Option<ProbePhase> {
        self.monitored.get(id).map(|cycle| cycle.phase)
    }

    pub fn generation(&self, id: &NodeId) -> Option<Generation> {
        self.monitored.get(id).map(|cycle| cycle.generation)
    }

    /// Brings the monitored set in line with `snapshot`.
    ///
    /// Nodes that left stop being pinged; new nodes get a fresh cycle whose first
    /// ping runs on its own task. Cycles of nodes present on both sides are kept.
    pub fn reconcile(self: &Arc<Self>, snapshot: &ClusterSnapshot) {
        self.monitored.retain(|id, cycle| {
            let keep = snapshot.node_exists(id);
            if !keep {
                tracing::debug!(
                    "[node  ] [{}] left the cluster, stopping fault detection ({})",
                    cycle.node,
                    cycle.generation
                );
                cycle.retire();
            }
            keep
        });

        for node in snapshot.nodes.values() {
            if node.id == self.local_node.id {
                continue;
            }
            if let Some((generation, retired)) = self.install_cycle(node.clone()) {
                tracing::debug!("[node  ] [{}] starting fault detection ({})", node, generation);
                self.spawn_cycle(node.clone(), generation, retired);
            }
        }
    }

    /// Stops pinging every node. Pings already in flight are abandoned.
    pub fn stop(&self) {
        let mut stopped = 0;
        self.monitored.retain(|_, cycle| {
            cycle.retire();
            stopped += 1;
            false
        });
        tracing::debug!("[node  ] stopped fault detection for {} nodes", stopped);
    }

    /// Stops pinging and rejects any further listener notification.
    pub fn close(&self) {
        self.stop();
        self.dispatcher.shutdown();
    }

    /// Reacts to the transport losing its connection to `node`.
    ///
    /// A node that is not monitored is ignored. Otherwise its cycle is dropped and,
    /// depending on `connect_on_network_disconnect`, either a reconnect is attempted
    /// (resuming with a fresh cycle on success) or the node is reported as failed.
    pub async fn handle_transport_disconnect(self: &Arc<Self>, node: Node) {
        let Some((_, cycle)) = self.monitored.remove(&node.id) else {
            return;
        };
        cycle.retire();
        self.after_disconnect(node).await;
    }

    /// Reconciles against every snapshot published by the cluster state service,
    /// starting with the current one. Stops pinging once the service closes.
    pub fn spawn_membership_follower(self: &Arc<Self>) -> JoinHandle<()> {
        let mut receiver = self.cluster_state.subscribe();
        let detection = Arc::downgrade(self);

        tokio::spawn(async move {
            let current = receiver.borrow_and_update().clone();
            match detection.upgrade() {
                Some(detection) => detection.reconcile(&current),
                None => return,
            }

            while receiver.changed().await.is_ok() {
                let snapshot = receiver.borrow_and_update().clone();
                let Some(detection) = detection.upgrade() else {
                    return;
                };
                detection.reconcile(&snapshot);
            }

            if let Some(detection) = detection.upgrade() {
                tracing::debug!("[node  ] cluster state service closed, stopping fault detection");
                detection.stop();
            }
        })
    }

    /// Validates an inbound ping and acknowledges it.
    pub fn handle_ping(&self, request: PingRequest) -> Result<PingResponse, FaultDetectionError> {
        if request.target_node != self.local_node.id {
            return Err(FaultDetectionError::TargetMismatch {
                target: request.target_node,
                local: self.local_node.id.clone(),
            });
        }

        if let Some(received) = &request.cluster_name
            && !received.0.is_empty()
            && received != &self.cluster_name
        {
            return Err(FaultDetectionError::ClusterNameMismatch {
                received: received.clone(),
                local: self.cluster_name.clone(),
            });
        }

        if let Err(e) = self.dispatcher.dispatch(Notification::PingReceived(request)) {
            tracing::trace!("[node  ] not notifying ping received: {}", e);
        }

        Ok(PingResponse)
    }

    fn spawn_connection_listener(self: &Arc<Self>) {
        let mut disconnects = self.transport.subscribe_disconnects();
        let detection = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                match disconnects.recv().await {
                    Ok(node) => {
                        let Some(detection) = detection.upgrade() else {
                            return;
                        };
                        detection.handle_transport_disconnect(node).await;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("[node  ] missed {} transport disconnect events", missed);
                    }
                    Err(RecvError::Closed) => return,
                }
            }
        });
    }

    fn next_generation(&self) -> Generation {
        Generation(self.generations.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Inserts a fresh cycle unless the node is already monitored.
    fn install_cycle(&self, node: Node) -> Option<(Generation, Arc<Notify>)> {
        match self.monitored.entry(node.id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let generation = self.next_generation();
                let cycle = ProbeCycle::new(node, generation);
                let retired = cycle.retired_signal();
                vacant.insert(cycle);
                Some((generation, retired))
            }
        }
    }

    fn spawn_cycle(self: &Arc<Self>, node: Node, generation: Generation, retired: Arc<Notify>) {
        let detection = Arc::downgrade(self);
        tokio::spawn(async move {
            Self::run_cycle(&detection, &node, generation, &retired).await;
            if let Some(detection) = detection.upgrade() {
                detection.release_ping_gate(&node.id);
            }
        });
    }

    fn ping_gate(&self, id: &NodeId) -> Arc<tokio::sync::Mutex<()>> {
        self.ping_gates.entry(id.clone()).or_default().clone()
    }

    fn release_ping_gate(&self, id: &NodeId) {
        self.ping_gates.remove_if(id, |_, gate| Arc::strong_count(gate) == 1);
    }

    /// Updates the phase of the cycle if it is still the registered one.
    fn enter_phase(&self, id: &NodeId, generation: Generation, phase: ProbePhase) -> bool {
        match self.monitored.get_mut(id) {
            Some(mut cycle) if cycle.generation == generation => {
                cycle.phase = phase;
                true
            }
            _ => false,
        }
    }

    fn remove_if_current(&self, id: &NodeId, generation: Generation) -> bool {
        match self
            .monitored
            .remove_if(id, |_, cycle| cycle.generation == generation)
        {
            Some((_, cycle)) => {
                cycle.retire();
                true
            }
            None => false,
        }
    }

    async fn run_cycle(
        detection: &Weak<Self>,
        node: &Node,
        generation: Generation,
        retired: &Notify,
    ) {
        let mut next = NextStep::SendNow;

        loop {
            match next {
                NextStep::Stop => return,
                NextStep::Backoff(delay) => {
                    let current = detection
                        .upgrade()
                        .is_some_and(|d| d.enter_phase(&node.id, generation, ProbePhase::Backoff));
                    if !current {
                        return;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => next = NextStep::SendNow,
                        _ = retired.notified() => return,
                    }
                }
                NextStep::SendNow => {
                    let Some(detection) = detection.upgrade() else {
                        return;
                    };
                    next = detection.probe_once(node, generation, retired).await;
                }
            }
        }
    }

    /// Sends one ping for the cycle and decides what the cycle does next.
    async fn probe_once(
        self: &Arc<Self>,
        node: &Node,
        generation: Generation,
        retired: &Notify,
    ) -> NextStep {
        let gate = self.ping_gate(&node.id);
        let permit = tokio::select! {
            permit = gate.lock_owned() => permit,
            _ = retired.notified() => return NextStep::Stop,
        };

        if !self.enter_phase(&node.id, generation, ProbePhase::AwaitingResponse) {
            tracing::trace!("[node  ] [{}] cycle {} superseded", node, generation);
            return NextStep::Stop;
        }

        let result = tokio::select! {
            result = self.ping(node) => result,
            _ = retired.notified() => {
                tracing::trace!("[node  ] [{}] cycle {} retired, abandoning ping", node, generation);
                return NextStep::Stop;
            }
        };
        drop(permit);

        self.on_ping_result(node, generation, result).await
    }

    async fn ping(&self, node: &Node) -> Result<PingResponse, TransportError> {
        let request = PingRequest {
            target_node: node.id.clone(),
            cluster_name: Some(self.cluster_name.clone()),
            coordinator_node: self.local_node.id.clone(),
            cluster_state_version: self.cluster_state.current().version,
        };
        let timeout = self.settings.ping_timeout();

        match tokio::time::timeout(timeout, self.transport.send_ping(node, request, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                node: node.id.clone(),
                timeout,
            }),
        }
    }

    async fn on_ping_result(
        self: &Arc<Self>,
        node: &Node,
        generation: Generation,
        result: Result<PingResponse, TransportError>,
    ) -> NextStep {
        match result {
            Ok(PingResponse) => match self.monitored.get_mut(&node.id) {
                Some(mut cycle) if cycle.generation == generation => {
                    cycle.retry_count = 0;
                    NextStep::Backoff(self.settings.ping_interval())
                }
                _ => NextStep::Stop,
            },
            Err(error) if error.is_disconnect() => {
                if self.remove_if_current(&node.id, generation) {
                    self.after_disconnect(node.clone()).await;
                }
                NextStep::Stop
            }
            Err(error) => {
                let retry_count = match self.monitored.get_mut(&node.id) {
                    Some(mut cycle) if cycle.generation == generation => {
                        cycle.retry_count += 1;
                        cycle.retry_count
                    }
                    _ => return NextStep::Stop,
                };
                let retries = self.settings.ping_retries;

                tracing::trace!(
                    "[node  ] failed to ping [{}], retry [{}] out of [{}]: {}",
                    node,
                    retry_count,
                    retries,
                    error
                );

                if retry_count < retries {
                    // Resend right away; the per-attempt timeout paces the retries.
                    return NextStep::SendNow;
                }

                let timeout = format_duration(self.settings.ping_timeout());
                tracing::debug!(
                    "[node  ] failed to ping [{}], tried [{}] times, each with maximum [{}] timeout",
                    node,
                    retries,
                    timeout
                );
                if self.remove_if_current(&node.id, generation) {
                    self.notify_node_failure(
                        node.clone(),
                        format!(
                            "failed to ping, tried [{}] times, each with maximum [{}] timeout",
                            retries, timeout
                        ),
                    );
                }
                NextStep::Stop
            }
        }
    }

    /// Runs after the node's cycle has been removed because of a disconnect.
    async fn after_disconnect(self: &Arc<Self>, node: Node) {
        if !self.settings.connect_on_network_disconnect {
            tracing::trace!("[node  ] [{}] transport disconnected", node);
            self.notify_node_failure(node, "transport disconnected".to_string());
            return;
        }

        match self.transport.connect(&node).await {
            Ok(()) => {
                if let Some((generation, retired)) = self.install_cycle(node.clone()) {
                    tracing::debug!("[node  ] [{}] reconnected, resuming fault detection ({})", node, generation);
                    self.spawn_cycle(node, generation, retired);
                }
            }
            Err(e) => {
                tracing::trace!("[node  ] [{}] transport disconnected (with verified connect): {}", node, e);
                self.notify_node_failure(node, "transport disconnected (with verified connect)".to_string());
            }
        }
    }

    fn notify_node_failure(&self, node: Node, reason: String) {
        tracing::info!("[node  ] [{}] failed: {}", node, reason);

        let notification = Notification::NodeFailure {
            node: node.clone(),
            reason: reason.clone(),
        };
        if let Err(e) = self.dispatcher.dispatch(notification) {
            tracing::trace!(
                "[node  ] [{}] ignoring node failure (reason [{}]). {}",
                node,
                reason,
                e
            );
        }
    }
}

/// Transport-facing ping handler. Holds the detector weakly so the transport does not
/// keep it alive.
struct InboundPings(Weak<NodesFaultDetection>);

impl PingHandler for InboundPings {
    fn handle_ping(&self, request: PingRequest) -> Result<PingResponse, FaultDetectionError> {
        match self.0.upgrade() {
            Some(detection) => detection.handle_ping(request),
            None => Err(FaultDetectionError::DispatchRejected),
        }
    }
}
