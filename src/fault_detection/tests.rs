//! Fault Detection Module Tests
//!
//! ## Test Scopes
//! - **Monitored set**: reconcile against snapshots, removal, stop and close.
//! - **Probe cycles**: single in-flight ping, retry budget, retry reset, failure timing.
//! - **Superseded cycles**: remove and re-add mid-cycle, late replies, dropped detector.
//! - **Disconnects**: with and without reconnect, transport disconnect events.
//! - **Inbound pings**: target and cluster-name checks, ping-received notifications.
//! - **Listeners**: duplicate registration, removal, panicking listeners.
//!
//! Timing tests run on a paused clock; the scripted transport answers instantly,
//! hangs forever, or fails, per node.

#[cfg(test)]
mod tests {
    use crate::cluster::service::ClusterStateService;
    use crate::cluster::state::ClusterSnapshot;
    use crate::fault_detection::error::FaultDetectionError;
    use crate::fault_detection::listeners::{FaultDetectionListener, ListenerRegistry};
    use crate::fault_detection::service::NodesFaultDetection;
    use crate::fault_detection::types::{PingRequest, PingResponse, ProbePhase};
    use crate::membership::types::{ClusterName, Node, NodeId};
    use crate::settings::FaultDetectionSettings;
    use crate::transport::{PingHandler, Transport, TransportError};
    use async_trait::async_trait;
    use parking_lot::{Mutex, RwLock};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::broadcast;
    use tokio::time::Instant;

    // ============================================================
    // SCRIPTED TRANSPORT
    // ============================================================

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Reply {
        Ack,
        AckAfter(Duration),
        Hang,
        Reject,
        Disconnect,
    }

    struct ScriptedTransport {
        defaults: Mutex<HashMap<NodeId, Reply>>,
        scripts: Mutex<HashMap<NodeId, VecDeque<Reply>>>,
        sent: Mutex<Vec<(PingRequest, Instant)>>,
        in_flight: Mutex<HashMap<NodeId, usize>>,
        peak_in_flight: Mutex<HashMap<NodeId, usize>>,
        connects: AtomicUsize,
        refuse_connect: AtomicBool,
        handler: RwLock<Option<Arc<dyn PingHandler>>>,
        disconnects: broadcast::Sender<Node>,
    }

    impl ScriptedTransport {
        fn new() -> Arc<Self> {
            let (disconnects, _) = broadcast::channel(16);
            Arc::new(Self {
                defaults: Mutex::new(HashMap::new()),
                scripts: Mutex::new(HashMap::new()),
                sent: Mutex::new(Vec::new()),
                in_flight: Mutex::new(HashMap::new()),
                peak_in_flight: Mutex::new(HashMap::new()),
                connects: AtomicUsize::new(0),
                refuse_connect: AtomicBool::new(false),
                handler: RwLock::new(None),
                disconnects,
            })
        }

        fn set_reply(&self, id: &str, reply: Reply) {
            self.defaults.lock().insert(NodeId::from(id), reply);
        }

        /// Replies consumed in order before falling back to the default reply.
        fn script(&self, id: &str, replies: &[Reply]) {
            self.scripts
                .lock()
                .insert(NodeId::from(id), replies.iter().copied().collect());
        }

        fn next_reply(&self, id: &NodeId) -> Reply {
            if let Some(reply) = self.scripts.lock().get_mut(id).and_then(|s| s.pop_front()) {
                return reply;
            }
            self.defaults.lock().get(id).copied().unwrap_or(Reply::Ack)
        }

        fn sent_to(&self, id: &str) -> usize {
            let id = NodeId::from(id);
            self.sent.lock().iter().filter(|(r, _)| r.target_node == id).count()
        }

        fn in_flight(&self, id: &str) -> usize {
            self.in_flight
                .lock()
                .get(&NodeId::from(id))
                .copied()
                .unwrap_or(0)
        }

        fn peak_in_flight(&self, id: &str) -> usize {
            self.peak_in_flight
                .lock()
                .get(&NodeId::from(id))
                .copied()
                .unwrap_or(0)
        }

        fn inbound(&self, request: PingRequest) -> Result<PingResponse, FaultDetectionError> {
            let handler = self.handler.read().clone().expect("handler registered");
            handler.handle_ping(request)
        }
    }

    struct InFlight<'a> {
        transport: &'a ScriptedTransport,
        node: NodeId,
    }

    impl<'a> InFlight<'a> {
        fn enter(transport: &'a ScriptedTransport, node: &NodeId) -> Self {
            let mut in_flight = transport.in_flight.lock();
            let count = in_flight.entry(node.clone()).or_insert(0);
            *count += 1;
            let mut peaks = transport.peak_in_flight.lock();
            let peak = peaks.entry(node.clone()).or_insert(0);
            *peak = (*peak).max(*count);
            Self {
                transport,
                node: node.clone(),
            }
        }
    }

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            if let Some(count) = self.transport.in_flight.lock().get_mut(&self.node) {
                *count -= 1;
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send_ping(
            &self,
            target: &Node,
            request: PingRequest,
            _timeout: Duration,
        ) -> Result<PingResponse, TransportError> {
            let reply = self.next_reply(&target.id);
            self.sent.lock().push((request, Instant::now()));
            let _in_flight = InFlight::enter(self, &target.id);

            match reply {
                Reply::Ack => Ok(PingResponse),
                Reply::AckAfter(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(PingResponse)
                }
                Reply::Hang => std::future::pending().await,
                Reply::Reject => Err(TransportError::Remote {
                    node: target.id.clone(),
                    message: "rejected".to_string(),
                }),
                Reply::Disconnect => Err(TransportError::ConnectFailed {
                    node: target.id.clone(),
                    reason: "connection reset".to_string(),
                }),
            }
        }

        async fn connect(&self, node: &Node) -> Result<(), TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.refuse_connect.load(Ordering::SeqCst) {
                return Err(TransportError::ConnectFailed {
                    node: node.id.clone(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(())
        }

        fn register_ping_handler(&self, handler: Arc<dyn PingHandler>) {
            *self.handler.write() = Some(handler);
        }

        fn subscribe_disconnects(&self) -> broadcast::Receiver<Node> {
            self.disconnects.subscribe()
        }
    }

    // ============================================================
    // FIXTURES
    // ============================================================

    #[derive(Default)]
    struct RecordingListener {
        failures: Mutex<Vec<(NodeId, String, Instant)>>,
        pings: Mutex<Vec<PingRequest>>,
    }

    impl RecordingListener {
        fn failures(&self) -> Vec<(NodeId, String)> {
            self.failures
                .lock()
                .iter()
                .map(|(id, reason, _)| (id.clone(), reason.clone()))
                .collect()
        }
    }

    impl FaultDetectionListener for RecordingListener {
        fn on_node_failure(&self, node: &Node, reason: &str) {
            self.failures
                .lock()
                .push((node.id.clone(), reason.to_string(), Instant::now()));
        }

        fn on_ping_received(&self, request: &PingRequest) {
            self.pings.lock().push(request.clone());
        }
    }

    struct PanickingListener;

    impl FaultDetectionListener for PanickingListener {
        fn on_node_failure(&self, _node: &Node, _reason: &str) {
            panic!("listener bug");
        }
    }

    struct Fixture {
        detection: Arc<NodesFaultDetection>,
        transport: Arc<ScriptedTransport>,
        cluster: Arc<ClusterStateService>,
        listener: Arc<RecordingListener>,
        local: Node,
    }

    impl Fixture {
        fn peer(&self, id: &str) -> Node {
            self.cluster
                .current()
                .nodes
                .get(&NodeId::from(id))
                .cloned()
                .expect("peer in snapshot")
        }

        fn reconcile_current(&self) {
            self.detection.reconcile(&self.cluster.current());
        }
    }

    fn node(id: &str, port: u16) -> Node {
        Node::new(NodeId::from(id), format!("127.0.0.1:{}", port).parse().unwrap())
    }

    fn fd_settings(interval_ms: u64, timeout_ms: u64, retries: u32) -> FaultDetectionSettings {
        FaultDetectionSettings {
            ping_interval_ms: interval_ms,
            ping_timeout_ms: timeout_ms,
            ping_retries: retries,
            ..FaultDetectionSettings::default()
        }
    }

    fn fixture(settings: FaultDetectionSettings, peers: &[&str]) -> Fixture {
        let local = node("local", 6000);
        let mut snapshot = ClusterSnapshot::empty(ClusterName::new("test"))
            .with_version(7)
            .with_node(local.clone())
            .with_coordinator(local.id.clone());
        for (i, peer) in peers.iter().enumerate() {
            snapshot = snapshot.with_node(node(peer, 6001 + i as u16));
        }

        let transport = ScriptedTransport::new();
        let cluster = ClusterStateService::new(local.clone(), snapshot);
        let detection = NodesFaultDetection::new(
            local.clone(),
            ClusterName::new("test"),
            settings,
            transport.clone(),
            cluster.clone(),
        );
        let listener = Arc::new(RecordingListener::default());
        detection.add_listener(listener.clone());

        Fixture {
            detection,
            transport,
            cluster,
            listener,
            local,
        }
    }

    /// Lets spawned tasks and the notification dispatcher catch up.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn ping_for(target: &NodeId, cluster_name: Option<&str>) -> PingRequest {
        PingRequest {
            target_node: target.clone(),
            cluster_name: cluster_name.map(ClusterName::new),
            coordinator_node: NodeId::from("coordinator"),
            cluster_state_version: 11,
        }
    }

    // ============================================================
    // MONITORED SET TESTS
    // ============================================================

    #[tokio::test]
    async fn test_reconcile_monitors_every_remote_node() {
        // ARRANGE
        let f = fixture(fd_settings(1_000, 500, 3), &["a", "b"]);

        // ACT
        f.reconcile_current();

        // ASSERT
        assert!(f.detection.is_monitoring(&NodeId::from("a")));
        assert!(f.detection.is_monitoring(&NodeId::from("b")));
        assert!(!f.detection.is_monitoring(&f.local.id));
        assert_eq!(f.detection.monitored_nodes().len(), 2);
        assert_eq!(f.detection.probe_phase(&NodeId::from("a")), Some(ProbePhase::Idle));
        assert_eq!(f.detection.retry_count(&NodeId::from("a")), Some(0));
    }

    #[tokio::test]
    async fn test_reconcile_keeps_existing_cycles() {
        let f = fixture(fd_settings(1_000, 500, 3), &["a"]);
        f.reconcile_current();
        let first = f.detection.generation(&NodeId::from("a"));

        f.reconcile_current();
        f.reconcile_current();

        assert_eq!(f.detection.generation(&NodeId::from("a")), first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_node_is_no_longer_pinged() {
        // ARRANGE
        let f = fixture(fd_settings(1_000, 500, 3), &["a", "b"]);
        f.reconcile_current();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(f.transport.sent_to("a"), 2);

        // ACT
        let without_a = f.cluster.current().next().without_node(&NodeId::from("a"));
        f.detection.reconcile(&without_a);
        tokio::time::sleep(Duration::from_millis(5_000)).await;

        // ASSERT
        assert_eq!(f.transport.sent_to("a"), 2);
        assert!(!f.detection.is_monitoring(&NodeId::from("a")));
        assert!(f.transport.sent_to("b") > 2);
        assert!(f.listener.failures().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_all_cycles() {
        let f = fixture(fd_settings(1_000, 500, 3), &["a", "b"]);
        f.reconcile_current();
        settle().await;
        let sent = f.transport.sent.lock().len();

        f.detection.stop();
        tokio::time::sleep(Duration::from_millis(5_000)).await;

        assert!(f.detection.monitored_nodes().is_empty());
        assert_eq!(f.transport.sent.lock().len(), sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_in_flight_ping() {
        let f = fixture(fd_settings(1_000, 500, 3), &["a"]);
        f.transport.set_reply("a", Reply::Hang);
        f.reconcile_current();
        settle().await;
        assert_eq!(f.transport.in_flight("a"), 1);

        f.detection.stop();
        settle().await;

        assert_eq!(f.transport.in_flight("a"), 0);
        assert_eq!(f.transport.sent_to("a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_membership_follower_tracks_published_snapshots() {
        // ARRANGE
        let f = fixture(fd_settings(1_000, 500, 3), &["a"]);
        let follower = f.detection.spawn_membership_follower();
        settle().await;
        assert!(f.detection.is_monitoring(&NodeId::from("a")));

        // ACT
        let next = f
            .cluster
            .current()
            .next()
            .with_node(node("b", 6100))
            .without_node(&NodeId::from("a"));
        f.cluster.publish(next).unwrap();
        settle().await;

        // ASSERT
        assert!(f.detection.is_monitoring(&NodeId::from("b")));
        assert!(!f.detection.is_monitoring(&NodeId::from("a")));

        f.cluster.close();
        follower.await.unwrap();
        assert!(f.detection.monitored_nodes().is_empty());
    }

    // ============================================================
    // PROBE CYCLE TESTS
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_ping_request_describes_local_view() {
        let f = fixture(fd_settings(1_000, 500, 3), &["a"]);
        f.reconcile_current();
        settle().await;

        let sent = f.transport.sent.lock().clone();
        let (request, _) = &sent[0];
        assert_eq!(request.target_node, NodeId::from("a"));
        assert_eq!(request.coordinator_node, f.local.id);
        assert_eq!(request.cluster_name, Some(ClusterName::new("test")));
        assert_eq!(request.cluster_state_version, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_ping_in_flight_per_node() {
        // ARRANGE
        let f = fixture(fd_settings(100, 500, 100), &["slow", "fast"]);
        f.transport.set_reply("slow", Reply::Hang);

        // ACT
        for _ in 0..3 {
            f.reconcile_current();
        }
        tokio::time::sleep(Duration::from_millis(2_900)).await;

        // ASSERT
        assert_eq!(f.transport.sent_to("slow"), 6);
        assert_eq!(f.transport.peak_in_flight("slow"), 1);
        assert_eq!(f.transport.peak_in_flight("fast"), 1);
        assert!(f.transport.sent_to("fast") > 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_failure_after_retries_exhausted() {
        // ARRANGE
        let f = fixture(fd_settings(1_000, 500, 3), &["a"]);
        f.transport.set_reply("a", Reply::Hang);

        // ACT
        f.reconcile_current();
        tokio::time::sleep(Duration::from_millis(5_000)).await;

        // ASSERT
        assert_eq!(
            f.listener.failures(),
            vec![(
                NodeId::from("a"),
                "failed to ping, tried [3] times, each with maximum [500ms] timeout".to_string()
            )]
        );
        assert_eq!(f.transport.sent_to("a"), 3);
        assert!(!f.detection.is_monitoring(&NodeId::from("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_error_counts_as_failed_attempt() {
        let f = fixture(fd_settings(1_000, 30_000, 2), &["a"]);
        f.transport.set_reply("a", Reply::Reject);

        f.reconcile_current();
        settle().await;

        assert_eq!(
            f.listener.failures(),
            vec![(
                NodeId::from("a"),
                "failed to ping, tried [2] times, each with maximum [30s] timeout".to_string()
            )]
        );
        assert_eq!(f.transport.sent_to("a"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_retry_count() {
        // ARRANGE: never three failures in a row
        let f = fixture(fd_settings(1_000, 500, 3), &["a"]);
        f.transport.script(
            "a",
            &[Reply::Reject, Reply::Reject, Reply::Ack, Reply::Hang, Reply::Reject, Reply::Ack],
        );

        // ACT
        f.reconcile_current();
        tokio::time::sleep(Duration::from_millis(5_000)).await;

        // ASSERT
        assert!(f.listener.failures().is_empty());
        assert!(f.detection.is_monitoring(&NodeId::from("a")));
        assert_eq!(f.detection.retry_count(&NodeId::from("a")), Some(0));
        assert_eq!(f.detection.probe_phase(&NodeId::from("a")), Some(ProbePhase::Backoff));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_node_fails_while_others_keep_being_pinged() {
        // ARRANGE
        let f = fixture(fd_settings(1_000, 500, 3), &["a", "b", "c"]);
        f.transport.set_reply("b", Reply::Hang);
        let start = Instant::now();

        // ACT
        f.reconcile_current();
        tokio::time::sleep(Duration::from_millis(3_500)).await;

        // ASSERT
        let failures = f.listener.failures.lock().clone();
        assert_eq!(failures.len(), 1);
        let (failed, _, at) = &failures[0];
        assert_eq!(failed, &NodeId::from("b"));
        let elapsed = at.duration_since(start);
        assert!(elapsed >= Duration::from_millis(1_500), "failed after {:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(1_600), "failed after {:?}", elapsed);

        assert_eq!(f.transport.sent_to("a"), 4);
        assert_eq!(f.transport.sent_to("c"), 4);
        assert_eq!(f.transport.sent_to("b"), 3);
    }

    // ============================================================
    // SUPERSEDED CYCLE TESTS
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_readded_node_reported_once_by_new_cycle() {
        // ARRANGE: the first cycle is on its last attempt when the node is re-added
        let f = fixture(fd_settings(1_000, 500, 3), &["a"]);
        f.transport.set_reply("a", Reply::Hang);
        let start = Instant::now();
        f.reconcile_current();
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        let first = f.detection.generation(&NodeId::from("a")).unwrap();

        // ACT
        let without_a = f.cluster.current().next().without_node(&NodeId::from("a"));
        f.detection.reconcile(&without_a);
        f.reconcile_current();
        let second = f.detection.generation(&NodeId::from("a")).unwrap();
        tokio::time::sleep(Duration::from_millis(5_000)).await;

        // ASSERT
        assert!(second > first);
        assert_eq!(f.transport.peak_in_flight("a"), 1);
        let failures = f.listener.failures.lock().clone();
        assert_eq!(failures.len(), 1);
        let (failed, reason, at) = &failures[0];
        assert_eq!(failed, &NodeId::from("a"));
        assert_eq!(reason, "failed to ping, tried [3] times, each with maximum [500ms] timeout");
        assert!(at.duration_since(start) >= Duration::from_millis(2_700));
        assert_eq!(f.transport.sent_to("a"), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_readded_node_keeps_being_monitored_when_it_recovers() {
        // ARRANGE
        let f = fixture(fd_settings(1_000, 500, 3), &["a"]);
        f.transport.set_reply("a", Reply::Hang);
        f.reconcile_current();
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert_eq!(f.detection.retry_count(&NodeId::from("a")), Some(2));

        // ACT
        let without_a = f.cluster.current().next().without_node(&NodeId::from("a"));
        f.detection.reconcile(&without_a);
        f.transport.set_reply("a", Reply::Ack);
        f.reconcile_current();
        tokio::time::sleep(Duration::from_millis(5_000)).await;

        // ASSERT
        assert!(f.listener.failures().is_empty());
        assert!(f.detection.is_monitoring(&NodeId::from("a")));
        assert_eq!(f.detection.retry_count(&NodeId::from("a")), Some(0));
        assert_eq!(f.transport.peak_in_flight("a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_for_superseded_cycle_changes_nothing() {
        // ARRANGE: the first cycle's ack would land at 800ms
        let f = fixture(fd_settings(1_000, 500, 3), &["a"]);
        f.transport.set_reply("a", Reply::Hang);
        f.transport.script("a", &[Reply::AckAfter(Duration::from_millis(800))]);
        f.reconcile_current();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // ACT
        let without_a = f.cluster.current().next().without_node(&NodeId::from("a"));
        f.detection.reconcile(&without_a);
        f.reconcile_current();
        tokio::time::sleep(Duration::from_millis(800)).await;

        // ASSERT: new cycle pinged at 100ms and 600ms, counted one timeout
        assert_eq!(f.detection.retry_count(&NodeId::from("a")), Some(1));
        assert_eq!(f.transport.sent_to("a"), 3);
        assert!(f.listener.failures().is_empty());

        tokio::time::sleep(Duration::from_millis(4_000)).await;
        assert_eq!(f.listener.failures().len(), 1);
        assert_eq!(f.transport.sent_to("a"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_detector_stops_pinging() {
        // ARRANGE
        let f = fixture(fd_settings(1_000, 500, 3), &["a"]);
        f.reconcile_current();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(f.transport.sent_to("a"), 2);
        let Fixture {
            detection,
            transport,
            local,
            ..
        } = f;

        // ACT
        drop(detection);
        tokio::time::sleep(Duration::from_millis(5_000)).await;

        // ASSERT
        assert_eq!(transport.sent_to("a"), 2);
        assert_eq!(
            transport.inbound(ping_for(&local.id, Some("test"))),
            Err(FaultDetectionError::DispatchRejected)
        );
    }

    // ============================================================
    // DISCONNECT TESTS
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_without_reconnect_reports_failure() {
        let f = fixture(fd_settings(1_000, 500, 3), &["a"]);
        f.transport.set_reply("a", Reply::Disconnect);

        f.reconcile_current();
        tokio::time::sleep(Duration::from_millis(3_000)).await;

        assert_eq!(
            f.listener.failures(),
            vec![(NodeId::from("a"), "transport disconnected".to_string())]
        );
        assert_eq!(f.transport.sent_to("a"), 1);
        assert_eq!(f.transport.connects.load(Ordering::SeqCst), 0);
        assert!(!f.detection.is_monitoring(&NodeId::from("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_with_reconnect_resumes_with_fresh_cycle() {
        // ARRANGE
        let mut settings = fd_settings(1_000, 500, 3);
        settings.connect_on_network_disconnect = true;
        let f = fixture(settings, &["a"]);
        f.transport.script("a", &[Reply::Disconnect]);

        // ACT
        f.reconcile_current();
        let first = f.detection.generation(&NodeId::from("a")).unwrap();
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        // ASSERT
        assert!(f.listener.failures().is_empty());
        assert_eq!(f.transport.connects.load(Ordering::SeqCst), 1);
        let resumed = f.detection.generation(&NodeId::from("a")).unwrap();
        assert!(resumed > first);
        assert!(f.transport.sent_to("a") >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_with_failed_reconnect_reports_failure() {
        let mut settings = fd_settings(1_000, 500, 3);
        settings.connect_on_network_disconnect = true;
        let f = fixture(settings, &["a"]);
        f.transport.set_reply("a", Reply::Disconnect);
        f.transport.refuse_connect.store(true, Ordering::SeqCst);

        f.reconcile_current();
        tokio::time::sleep(Duration::from_millis(3_000)).await;

        assert_eq!(
            f.listener.failures(),
            vec![(
                NodeId::from("a"),
                "transport disconnected (with verified connect)".to_string()
            )]
        );
        assert!(!f.detection.is_monitoring(&NodeId::from("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_of_unmonitored_node_is_ignored() {
        let f = fixture(fd_settings(1_000, 500, 3), &["a"]);

        f.detection.handle_transport_disconnect(node("stranger", 7000)).await;
        settle().await;

        assert!(f.listener.failures().is_empty());
        assert_eq!(f.transport.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_disconnect_event_reports_failure() {
        // ARRANGE
        let f = fixture(fd_settings(1_000, 500, 3), &["a"]);
        f.reconcile_current();
        settle().await;

        // ACT
        f.transport.disconnects.send(f.peer("a")).unwrap();
        settle().await;

        // ASSERT
        assert_eq!(
            f.listener.failures(),
            vec![(NodeId::from("a"), "transport disconnected".to_string())]
        );
        assert!(!f.detection.is_monitoring(&NodeId::from("a")));
    }

    #[tokio::test]
    async fn test_connection_listener_can_be_disabled() {
        let mut settings = fd_settings(1_000, 500, 3);
        settings.register_connection_listener = false;
        let f = fixture(settings, &["a"]);

        assert_eq!(f.transport.disconnects.receiver_count(), 0);
    }

    // ============================================================
    // INBOUND PING TESTS
    // ============================================================

    #[tokio::test]
    async fn test_handle_ping_acknowledges_and_notifies() {
        let f = fixture(fd_settings(1_000, 500, 3), &[]);
        let request = ping_for(&f.local.id, Some("test"));

        let result = f.transport.inbound(request.clone());
        settle().await;

        assert_eq!(result, Ok(PingResponse));
        assert_eq!(f.listener.pings.lock().clone(), vec![request]);
    }

    #[tokio::test]
    async fn test_handle_ping_rejects_wrong_target() {
        let f = fixture(fd_settings(1_000, 500, 3), &[]);

        let result = f.detection.handle_ping(ping_for(&NodeId::from("previous-owner"), Some("test")));

        let err = result.unwrap_err();
        assert!(err.is_protocol_mismatch());
        assert_eq!(
            err.to_string(),
            "Got pinged as node [previous-owner], but I am node [local]"
        );
        settle().await;
        assert!(f.listener.pings.lock().is_empty());
    }

    #[tokio::test]
    async fn test_handle_ping_rejects_foreign_cluster() {
        let f = fixture(fd_settings(1_000, 500, 3), &[]);

        let result = f.detection.handle_ping(ping_for(&f.local.id, Some("other")));

        assert_eq!(
            result,
            Err(FaultDetectionError::ClusterNameMismatch {
                received: ClusterName::new("other"),
                local: ClusterName::new("test"),
            })
        );
        assert_eq!(
            result.unwrap_err().to_string(),
            "Got pinged with cluster name [other], but I'm part of cluster [test]"
        );
    }

    #[tokio::test]
    async fn test_handle_ping_accepts_missing_cluster_name() {
        let f = fixture(fd_settings(1_000, 500, 3), &[]);

        assert_eq!(f.detection.handle_ping(ping_for(&f.local.id, None)), Ok(PingResponse));
        assert_eq!(f.detection.handle_ping(ping_for(&f.local.id, Some(""))), Ok(PingResponse));
    }

    #[tokio::test]
    async fn test_close_rejects_notifications() {
        let f = fixture(fd_settings(1_000, 500, 3), &["a"]);
        f.reconcile_current();

        f.detection.close();
        let result = f.detection.handle_ping(ping_for(&f.local.id, Some("test")));
        settle().await;

        assert_eq!(result, Ok(PingResponse));
        assert!(f.listener.pings.lock().is_empty());
        assert!(f.detection.monitored_nodes().is_empty());
    }

    // ============================================================
    // LISTENER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_listener_added_twice_is_notified_twice() {
        // ARRANGE
        let f = fixture(fd_settings(1_000, 500, 3), &["a", "b"]);
        let extra = Arc::new(RecordingListener::default());
        let as_listener: Arc<dyn FaultDetectionListener> = extra.clone();
        f.detection.add_listener(as_listener.clone());
        f.detection.add_listener(as_listener.clone());
        f.reconcile_current();

        // ACT
        f.detection.handle_transport_disconnect(f.peer("a")).await;
        settle().await;
        assert!(f.detection.remove_listener(&as_listener));
        f.detection.handle_transport_disconnect(f.peer("b")).await;
        settle().await;

        // ASSERT
        let failed: Vec<NodeId> = extra.failures().into_iter().map(|(id, _)| id).collect();
        assert_eq!(failed, vec![NodeId::from("a"), NodeId::from("a"), NodeId::from("b")]);
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_stop_delivery() {
        let f = fixture(fd_settings(1_000, 500, 3), &["a", "b"]);
        let faulty: Arc<dyn FaultDetectionListener> = Arc::new(PanickingListener);
        f.detection.add_listener(faulty.clone());
        f.detection.add_listener(Arc::new(RecordingListener::default()));
        f.reconcile_current();

        f.detection.handle_transport_disconnect(f.peer("a")).await;
        f.detection.handle_transport_disconnect(f.peer("b")).await;
        settle().await;

        assert_eq!(f.listener.failures().len(), 2);
    }

    #[test]
    fn test_removing_unknown_listener() {
        let registry = ListenerRegistry::new();
        let listener: Arc<dyn FaultDetectionListener> = Arc::new(RecordingListener::default());

        assert!(!registry.remove(&listener));

        registry.add(listener.clone());
        registry.add(listener.clone());
        assert_eq!(registry.len(), 2);
        assert!(registry.remove(&listener));
        assert_eq!(registry.len(), 1);
    }
}
