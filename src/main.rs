use cluster_liveness::cluster::service::ClusterStateService;
use cluster_liveness::cluster::state::ClusterSnapshot;
use cluster_liveness::fault_detection::listeners::FaultDetectionListener;
use cluster_liveness::fault_detection::service::NodesFaultDetection;
use cluster_liveness::fault_detection::types::PingRequest;
use cluster_liveness::membership::types::{Node, NodeId};
use cluster_liveness::settings::NodeSettings;
use cluster_liveness::transport::udp::UdpTransport;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

struct LoggingListener;

impl FaultDetectionListener for LoggingListener {
    fn on_node_failure(&self, node: &Node, reason: &str) {
        tracing::warn!("Node {} failed: {}", node, reason);
    }

    fn on_ping_received(&self, request: &PingRequest) {
        tracing::debug!(
            "Pinged by {} (cluster state version {})",
            request.coordinator_node,
            request.cluster_state_version
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        // .with_max_level(tracing::Level::DEBUG)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!(
            "Usage: {} --bind <addr:port> [--name <id>] [--peer <id>@<addr:port>]... [--cluster <name>] [--config <file.json>]",
            args[0]
        );
        eprintln!("Example: {} --bind 127.0.0.1:5000 --name a", args[0]);
        eprintln!(
            "Example: {} --bind 127.0.0.1:5001 --name b --peer a@127.0.0.1:5000",
            args[0]
        );

        std::process::exit(1);
    }

    let mut bind_addr: Option<SocketAddr> = None;
    let mut name: Option<String> = None;
    let mut cluster: Option<String> = None;
    let mut config: Option<String> = None;
    let mut peers: Vec<Node> = vec![];

    let mut i = 1;
    while i + 1 < args.len() {
        match args[i].as_str() {
            "--bind" => bind_addr = Some(args[i + 1].parse()?),
            "--name" => name = Some(args[i + 1].clone()),
            "--cluster" => cluster = Some(args[i + 1].clone()),
            "--config" => config = Some(args[i + 1].clone()),
            "--peer" => {
                let Some((id, addr)) = args[i + 1].split_once('@') else {
                    anyhow::bail!("invalid peer [{}], expected <id>@<addr:port>", args[i + 1]);
                };
                peers.push(Node::new(NodeId::from(id), addr.parse()?));
            }
            other => anyhow::bail!("unknown argument [{}]", other),
        }
        i += 2;
    }

    let bind_addr = bind_addr.ok_or_else(|| anyhow::anyhow!("--bind is required"))?;

    // 1. Settings:
    let mut settings = match config {
        Some(path) => NodeSettings::from_file(path)?,
        None => NodeSettings::default(),
    };
    if let Some(cluster) = cluster {
        settings.cluster_name = cluster;
    }
    settings.validate()?;
    let cluster_name = settings.cluster_name();

    // 2. Transport:
    let transport = UdpTransport::bind(bind_addr).await?;
    transport.start();

    let local_id = name.map(NodeId).unwrap_or_default();
    let local_node = Node::new(local_id.clone(), transport.local_addr()?);
    tracing::info!("Node {} listening on {}", local_node, bind_addr);

    // 3. Static cluster state from the command line:
    let mut snapshot = ClusterSnapshot::empty(cluster_name.clone())
        .next()
        .with_node(local_node.clone())
        .with_coordinator(local_id);
    for peer in peers {
        snapshot = snapshot.with_node(peer);
    }
    let cluster_state = ClusterStateService::new(local_node.clone(), snapshot);

    // 4. Fault detection:
    let detection = NodesFaultDetection::new(
        local_node,
        cluster_name,
        settings.fault_detection.clone(),
        transport.clone(),
        cluster_state.clone(),
    );
    detection.add_listener(Arc::new(LoggingListener));
    let follower = detection.spawn_membership_follower();

    // 5. Spawn stats reporter:
    let stats_detection = detection.clone();
    let stats_transport = transport.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;
            let monitored = stats_detection.monitored_nodes();
            tracing::info!(
                "Fault detection stats: {} monitored nodes, {} pings in flight",
                monitored.len(),
                stats_transport.pending_requests()
            );
            for node in monitored {
                tracing::info!(
                    "  - {} retries={:?} phase={:?}",
                    node,
                    stats_detection.retry_count(&node.id),
                    stats_detection.probe_phase(&node.id)
                );
            }
        }
    });

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    cluster_state.close();
    detection.close();
    follower.await?;

    Ok(())
}
