//! Task bus message types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::BusError;

/// Which queue a task is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Search,
    Write,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Search => f.write_str("search"),
            TaskKind::Write => f.write_str("write"),
        }
    }
}

/// One unit of auxiliary work. Consumed once by its worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Correlates the task with its result.
    pub id: Uuid,
    pub content: String,
    pub metadata: Map<String, Value>,
}

impl Task {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// What a worker handed back for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub worker: TaskKind,
    /// `None` for workers that only acknowledge (e.g. writes).
    pub output: Option<String>,
}

/// Reply slot private to one submission.
pub(crate) type ReplySlot = oneshot::Sender<Result<TaskResult, BusError>>;

/// Items travelling on a worker queue.
pub(crate) enum WorkItem {
    Run {
        task: Task,
        reply: Option<ReplySlot>,
    },
    /// Sentinel: the worker exits its loop.
    Stop,
}
