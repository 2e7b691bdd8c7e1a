use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};
use thiserror::Error;

use crate::membership::types::NodeId;

/// Cluster-wide task identifier: the node that started the task plus a node-local id.
///
/// Rendered as `node:id`. [`TaskId::EMPTY`] marks a task without a parent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TaskId {
    pub node_id: String,
    pub id: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed task id [{0}], expected `node:id`")]
pub struct ParseTaskIdError(pub String);

impl TaskId {
    pub const EMPTY: TaskId = TaskId {
        node_id: String::new(),
        id: -1,
    };

    pub fn new(node_id: &NodeId, id: i64) -> Self {
        Self {
            node_id: node_id.0.clone(),
            id,
        }
    }

    pub fn is_set(&self) -> bool {
        self.id != -1
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_set() {
            write!(f, "{}:{}", self.node_id, self.id)
        } else {
            f.write_str("unset")
        }
    }
}

impl FromStr for TaskId {
    type Err = ParseTaskIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "unset" {
            return Ok(Self::EMPTY);
        }
        let (node, id) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseTaskIdError(s.to_string()))?;
        if node.is_empty() {
            return Err(ParseTaskIdError(s.to_string()));
        }
        let id = id.parse::<i64>().map_err(|_| ParseTaskIdError(s.to_string()))?;
        Ok(Self {
            node_id: node.to_string(),
            id,
        })
    }
}

/// Descriptive metadata of a unit of work registered on a node.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: i64,
    pub task_type: String,
    pub action: String,
    pub description: String,
    pub parent_task_id: TaskId,
    pub headers: HashMap<String, String>,
    pub start_time: SystemTime,
}

impl Task {
    pub fn new(
        id: i64,
        task_type: impl Into<String>,
        action: impl Into<String>,
        description: impl Into<String>,
        parent_task_id: TaskId,
    ) -> Self {
        Self {
            id,
            task_type: task_type.into(),
            action: action.into(),
            description: description.into(),
            parent_task_id,
            headers: HashMap::new(),
            start_time: SystemTime::now(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn task_id(&self, node_id: &NodeId) -> TaskId {
        TaskId::new(node_id, self.id)
    }

    pub fn running_time(&self) -> Duration {
        self.start_time.elapsed().unwrap_or_default()
    }
}
