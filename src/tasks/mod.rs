//! Task Cancellation Module
//!
//! Cooperative cancellation for long-running work started in reaction to membership
//! or cluster state changes (for example a readiness wait on a departing coordinator).
//!
//! ## Submodules
//! - **`types`**: task identity (`TaskId`) and descriptive metadata (`Task`).
//! - **`cancellable`**: `CancellableTask`, the one-way cancellation state and hook.

pub mod cancellable;
pub mod types;
