//! Node Settings
//!
//! Tunables for fault detection and readiness waits. Every field has a default, so an
//! empty JSON object is a valid configuration file.
//!
//! Durations are stored in milliseconds on the wire and exposed as [`Duration`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::membership::types::ClusterName;

pub const DEFAULT_CLUSTER_NAME: &str = "search-cluster";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("invalid setting [{name}]: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultDetectionSettings {
    /// Delay between successful pings to the same node.
    pub ping_interval_ms: u64,
    /// Upper bound for a single ping attempt.
    pub ping_timeout_ms: u64,
    /// Consecutive failed attempts before a node is declared failed.
    pub ping_retries: u32,
    /// Try to reconnect once on a transport disconnect before declaring failure.
    pub connect_on_network_disconnect: bool,
    /// Follow transport disconnect events instead of waiting for ping timeouts.
    pub register_connection_listener: bool,
}

impl Default for FaultDetectionSettings {
    fn default() -> Self {
        Self {
            ping_interval_ms: 1_000,
            ping_timeout_ms: 30_000,
            ping_retries: 3,
            connect_on_network_disconnect: false,
            register_connection_listener: true,
        }
    }
}

impl FaultDetectionSettings {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.ping_interval_ms == 0 {
            return Err(SettingsError::Invalid {
                name: "ping_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.ping_timeout_ms == 0 {
            return Err(SettingsError::Invalid {
                name: "ping_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.ping_retries == 0 {
            return Err(SettingsError::Invalid {
                name: "ping_retries",
                reason: "at least one attempt is required".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessSettings {
    /// Used when a caller waits for active shards without an explicit timeout.
    pub default_timeout_ms: u64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
        }
    }
}

impl ReadinessSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub cluster_name: String,
    pub fault_detection: FaultDetectionSettings,
    pub readiness: ReadinessSettings,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            fault_detection: FaultDetectionSettings::default(),
            readiness: ReadinessSettings::default(),
        }
    }
}

impl NodeSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: NodeSettings =
            serde_json::from_str(json).context("Failed to parse node settings")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        Self::from_json(&raw)
    }

    pub fn cluster_name(&self) -> ClusterName {
        ClusterName::new(self.cluster_name.clone())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.cluster_name.trim().is_empty() {
            return Err(SettingsError::Invalid {
                name: "cluster_name",
                reason: "must not be empty".to_string(),
            });
        }
        self.fault_detection.validate()
    }
}

/// Renders a duration the way operators write it in settings (`30s`, `500ms`).
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis != 0 && millis % 1_000 == 0 {
        format!("{}s", millis / 1_000)
    } else {
        format!("{}ms", millis)
    }
}
