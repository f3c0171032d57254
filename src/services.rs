use crate::models::{Batch, Point};
use crate::runtime::edge::Message;
use crate::runtime::task::TaskSnapshot;
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

// --- Collaborator contracts ---
//
// The engine neither owns nor configures these; embedders supply them.
// Implementations must be safe for concurrent use.

/// Persists task snapshots.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn save_snapshot(&self, task_name: &str, snapshot: &TaskSnapshot) -> Result<()>;
}

/// Outbound mail transport used by alert email handlers.
#[async_trait]
pub trait SmtpService: Send + Sync {
    async fn send_mail(&self, from: &str, to: &[String], subject: &str, body: &str) -> Result<()>;
}

/// Time-series database client: batch queries read from it, the write
/// output node writes back to it.
#[async_trait]
pub trait QueryService: Send + Sync {
    async fn query(&self, q: &str) -> Result<Vec<Batch>>;
    async fn write_points(&self, database: &str, retention_policy: &str, points: Vec<Point>)
        -> Result<()>;
}

/// A handler backing a `udf` pipeline node, registered by name on the
/// engine before tasks link.
#[async_trait]
pub trait UdfHandler: Send + Sync {
    async fn process(&self, msg: Message) -> Result<Vec<Message>>;
}

/// The collaborator bundle shared by all tasks of an engine.
#[derive(Default)]
pub struct Services {
    pub task_store: Option<Arc<dyn TaskStore>>,
    pub smtp: Option<Arc<dyn SmtpService>>,
    pub query: Option<Arc<dyn QueryService>>,
    pub udfs: HashMap<String, Arc<dyn UdfHandler>>,
}

// --- In-memory implementations ---

/// Keeps the latest snapshot per task in memory.
#[derive(Default)]
pub struct InMemoryTaskStore {
    snapshots: DashMap<String, TaskSnapshot>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, task_name: &str) -> Option<TaskSnapshot> {
        self.snapshots.get(task_name).map(|s| s.clone())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn save_snapshot(&self, task_name: &str, snapshot: &TaskSnapshot) -> Result<()> {
        self.snapshots
            .insert(task_name.to_string(), snapshot.clone());
        Ok(())
    }
}
