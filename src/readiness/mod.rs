//! Readiness Module
//!
//! Lets a coordinator wait, without blocking a thread, until the cluster state shows
//! enough started shard copies for the indices it just touched.
//!
//! ## Submodules
//! - **`active_shards`**: `ActiveShardCount` and the "enough shards active" predicate.
//! - **`waiter`**: `ActiveShardsObserver`, the single-fire wait with timeout and closure handling.

pub mod active_shards;
pub mod waiter;
