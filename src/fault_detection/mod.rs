//! Fault Detection Module
//!
//! Detects unreachable cluster members by pinging them on a fixed interval and reports
//! failures to registered listeners.
//!
//! ## Submodules
//! - **`types`**: ping wire messages and the per-node probe cycle record.
//! - **`service`**: `NodesFaultDetection`, which owns the monitored set, drives one probe
//!   cycle per node and answers inbound pings.
//! - **`listeners`**: listener registry and the ordered notification dispatcher.
//! - **`error`**: receiver-side rejections and dispatch refusal.
//!
//! ## Guarantees
//! - At most one ping in flight per monitored node.
//! - A node is reported at most once per probe cycle, and never after it was removed
//!   from the monitored set.
//! - Listener callbacks never run on a probe cycle or transport task.

pub mod error;
pub mod listeners;
pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
