//! Active shard count
//!
//! How many copies of every shard must be started before a write-like operation
//! reports success to its caller.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::cluster::state::{ClusterSnapshot, ShardCopies};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ActiveShardCount {
    /// Use the index's own `wait_for_active_shards` setting.
    #[default]
    Default,
    /// Every copy (primary and all replicas) must be started.
    All,
    /// At least this many copies must be started.
    Count(u32),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot parse active shard count [{0}]: expected `all`, `default` or a non-negative integer")]
pub struct ParseActiveShardCountError(pub String);

impl ActiveShardCount {
    /// Do not wait at all.
    pub const NONE: Self = Self::Count(0);
    /// Wait for the primary only.
    pub const ONE: Self = Self::Count(1);

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    /// Whether this count can ever be satisfied by an index with
    /// `number_of_replicas` replicas per shard.
    pub fn validate(&self, number_of_replicas: u32) -> bool {
        match self {
            Self::Default | Self::All => true,
            Self::Count(n) => *n <= number_of_replicas.saturating_add(1),
        }
    }

    /// Whether every listed index has enough started copies in `state`.
    ///
    /// An index missing from the state counts as satisfied: it was deleted while
    /// the caller was waiting, and there is nothing left to wait for.
    pub fn enough_shards_active<S: AsRef<str>>(&self, state: &ClusterSnapshot, indices: &[S]) -> bool {
        if self.is_none() {
            return true;
        }

        for index_name in indices {
            let Some(table) = state.index(index_name.as_ref()) else {
                continue;
            };

            if !table.all_primary_shards_active() {
                return false;
            }

            let required = match self {
                Self::Default => match table.wait_for_active_shards {
                    Self::Default => Self::ONE,
                    configured => configured,
                },
                explicit => *explicit,
            };

            if !table
                .shards
                .iter()
                .all(|shard| required.enough_copies_active(shard))
            {
                return false;
            }
        }

        true
    }

    fn enough_copies_active(&self, shard: &ShardCopies) -> bool {
        match self {
            Self::All => shard.active == shard.total,
            Self::Count(n) => *n <= shard.active,
            Self::Default => 1 <= shard.active,
        }
    }
}

impl FromStr for ActiveShardCount {
    type Err = ParseActiveShardCountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "default" => Ok(Self::Default),
            other => other
                .parse::<u32>()
                .map(Self::Count)
                .map_err(|_| ParseActiveShardCountError(s.to_string())),
        }
    }
}

impl fmt::Display for ActiveShardCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::All => f.write_str("all"),
            Self::Count(n) => write!(f, "{}", n),
        }
    }
}
