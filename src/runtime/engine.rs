use crate::dsl::parse_script;
use crate::errors::EngineError;
use crate::pipeline::EdgeType;
use crate::runtime::edge::{edge, EdgeReceiver, EdgeSender};
use crate::runtime::task::{Dbrp, ExecutingTask, Task, TaskSnapshot, TaskType};
use crate::services::{Services, UdfHandler};
use anyhow::{anyhow, Result};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Owns the collaborator services and the set of executing tasks.
///
/// Construct once, register udf handlers, then define and start tasks.
/// Services are shared read-only by every task after construction.
pub struct Engine {
    services: Arc<Services>,
    tasks: DashMap<String, ExecutingTask>,
}

impl Engine {
    pub fn new() -> Self {
        Engine::with_services(Services::default())
    }

    pub fn with_services(services: Services) -> Self {
        Engine {
            services: Arc::new(services),
            tasks: DashMap::new(),
        }
    }

    /// Register a udf handler. Must happen before any task using it
    /// links; the registry is read-only afterwards.
    pub fn register_udf(&mut self, name: &str, handler: Arc<dyn UdfHandler>) -> Result<()> {
        let services = Arc::get_mut(&mut self.services)
            .ok_or_else(|| anyhow!("udf handlers must be registered before tasks start"))?;
        services.udfs.insert(name.to_string(), handler);
        Ok(())
    }

    /// Parse a task definition script into a complete task.
    pub fn define_task(
        &self,
        name: &str,
        script: &str,
        task_type: TaskType,
        dbrps: Vec<Dbrp>,
        snapshot_interval: Duration,
    ) -> Result<Task> {
        let pipeline = parse_script(script, task_type)?;
        Ok(Task {
            name: name.to_string(),
            pipeline,
            task_type,
            dbrps,
            snapshot_interval,
        })
    }

    /// Link and start a task. Stream tasks consume the given external
    /// edges; batch tasks additionally need `start_batching`.
    pub fn start_task(
        &self,
        task: Task,
        ins: Vec<EdgeReceiver>,
        snapshot: Option<&TaskSnapshot>,
    ) -> Result<()> {
        let name = task.name.clone();
        if self.tasks.contains_key(&name) {
            return Err(EngineError::Config(format!("task {} is already executing", name)).into());
        }
        let mut et = ExecutingTask::new(self.services.clone(), task)?;
        et.start(ins, snapshot)?;
        self.tasks.insert(name, et);
        Ok(())
    }

    /// Stop an executing task and surface its terminal error.
    pub async fn stop_task(&self, name: &str) -> Result<()> {
        let (_, mut et) = self
            .tasks
            .remove(name)
            .ok_or_else(|| anyhow!("task {} is not executing", name))?;
        let res = et.stop().await;
        info!(task = %name, "task removed");
        res
    }

    pub fn is_executing(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// On-demand snapshot of an executing task.
    pub fn snapshot_task(&self, name: &str) -> Result<TaskSnapshot> {
        let et = self
            .tasks
            .get(name)
            .ok_or_else(|| anyhow!("task {} is not executing", name))?;
        et.snapshot()
    }

    /// Trigger batching for an executing batch task.
    pub fn start_batching(&self, name: &str) -> Result<()> {
        let et = self
            .tasks
            .get(name)
            .ok_or_else(|| anyhow!("task {} is not executing", name))?;
        et.start_batching()
    }

    /// Graphviz rendering of an executing task with execution counts.
    pub fn executing_dot(&self, name: &str) -> Result<String> {
        let et = self
            .tasks
            .get(name)
            .ok_or_else(|| anyhow!("task {} is not executing", name))?;
        Ok(et.edot())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

/// Create the external edge pair feeding a stream task's source.
pub fn stream_edge() -> (EdgeSender, EdgeReceiver) {
    edge(EdgeType::Stream, "stream")
}
