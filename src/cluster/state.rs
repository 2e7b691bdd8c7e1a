use std::collections::{BTreeMap, HashMap};

use crate::membership::types::{ClusterName, Node, NodeId};
use crate::readiness::active_shards::ActiveShardCount;

/// Version reported before any cluster state has been applied.
pub const UNKNOWN_VERSION: i64 = -1;

/// Started/total copies of one shard (primary plus replicas).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardCopies {
    pub primary_active: bool,
    /// Started copies, primary included.
    pub active: u32,
    /// All assigned and unassigned copies, primary included.
    pub total: u32,
}

impl ShardCopies {
    /// A shard whose primary is not started yet.
    pub fn unassigned(number_of_replicas: u32) -> Self {
        Self {
            primary_active: false,
            active: 0,
            total: number_of_replicas + 1,
        }
    }

    /// A shard with a started primary and `started_replicas` started replicas.
    pub fn started(number_of_replicas: u32, started_replicas: u32) -> Self {
        Self {
            primary_active: true,
            active: 1 + started_replicas.min(number_of_replicas),
            total: number_of_replicas + 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRoutingTable {
    pub number_of_replicas: u32,
    /// Index-level default applied when a caller asks for `ActiveShardCount::Default`.
    pub wait_for_active_shards: ActiveShardCount,
    pub shards: Vec<ShardCopies>,
}

impl IndexRoutingTable {
    /// An index with `number_of_shards` shards, none of them started.
    pub fn new(number_of_shards: usize, number_of_replicas: u32) -> Self {
        Self {
            number_of_replicas,
            wait_for_active_shards: ActiveShardCount::ONE,
            shards: vec![ShardCopies::unassigned(number_of_replicas); number_of_shards],
        }
    }

    pub fn with_wait_for_active_shards(mut self, count: ActiveShardCount) -> Self {
        self.wait_for_active_shards = count;
        self
    }

    /// Marks every shard's primary and `started_replicas` replicas as started.
    pub fn start_all(mut self, started_replicas: u32) -> Self {
        let replicas = self.number_of_replicas;
        for shard in self.shards.iter_mut() {
            *shard = ShardCopies::started(replicas, started_replicas);
        }
        self
    }

    pub fn all_primary_shards_active(&self) -> bool {
        self.shards.iter().all(|shard| shard.primary_active)
    }
}

/// Immutable, versioned view of membership and shard placement.
///
/// Produced by whoever owns the authoritative cluster state and handed out as
/// `Arc<ClusterSnapshot>`; nothing in this crate mutates a published snapshot.
#[derive(Debug, Clone)]
pub struct ClusterSnapshot {
    pub version: i64,
    pub cluster_name: ClusterName,
    /// Node currently coordinating the cluster, if one is known.
    pub coordinator: Option<NodeId>,
    pub nodes: BTreeMap<NodeId, Node>,
    pub routing: HashMap<String, IndexRoutingTable>,
}

impl ClusterSnapshot {
    pub fn empty(cluster_name: ClusterName) -> Self {
        Self {
            version: UNKNOWN_VERSION,
            cluster_name,
            coordinator: None,
            nodes: BTreeMap::new(),
            routing: HashMap::new(),
        }
    }

    /// Copy of this snapshot with the version bumped by one.
    pub fn next(&self) -> Self {
        let mut next = self.clone();
        next.version = self.version.max(0) + 1;
        next
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.insert(node.id.clone(), node);
        self
    }

    pub fn without_node(mut self, id: &NodeId) -> Self {
        self.nodes.remove(id);
        self
    }

    pub fn with_coordinator(mut self, id: NodeId) -> Self {
        self.coordinator = Some(id);
        self
    }

    pub fn with_index(mut self, name: impl Into<String>, table: IndexRoutingTable) -> Self {
        self.routing.insert(name.into(), table);
        self
    }

    pub fn node_exists(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn index(&self, name: &str) -> Option<&IndexRoutingTable> {
        self.routing.get(name)
    }
}
