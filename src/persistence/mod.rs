//! Persistence layer for pipe execution history
//!
//! History is for inspection only; a stored snapshot is never fed back into
//! a run.

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteExecutionStore;

pub use crate::core::ExecutionStatus;
use crate::execution::PipeOutput;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of one pipe execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Code of the pipe that was run
    pub pipe_code: String,

    /// Execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: DateTime<Utc>,

    /// When execution completed (if complete)
    pub completed_at: Option<DateTime<Utc>>,

    /// Name the output was bound under, on success
    pub output_name: Option<String>,

    /// Error message, on failure
    pub error: Option<String>,

    /// Working memory at the end of the run, as JSON
    pub snapshot_json: Option<String>,
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save an execution, replacing any earlier record with the same ID
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()>;

    /// Load an execution by ID
    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>>;

    /// List every execution of a pipe, newest first
    async fn list_executions(&self, pipe_code: &str) -> Result<Vec<ExecutionSummary>>;

    /// Most recent execution of a pipe
    async fn latest_execution(&self, pipe_code: &str) -> Result<Option<ExecutionSummary>> {
        Ok(self.list_executions(pipe_code).await?.into_iter().next())
    }

    async fn delete_execution(&self, execution_id: Uuid) -> Result<()>;

    /// Codes of every pipe with recorded history
    async fn list_pipes(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    executions: RwLock<HashMap<Uuid, ExecutionSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        self.executions
            .write()
            .await
            .insert(execution.execution_id, execution.clone());
        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        Ok(self.executions.read().await.get(&execution_id).cloned())
    }

    async fn list_executions(&self, pipe_code: &str) -> Result<Vec<ExecutionSummary>> {
        let execs = self.executions.read().await;
        let mut result: Vec<ExecutionSummary> = execs
            .values()
            .filter(|e| e.pipe_code == pipe_code)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn delete_execution(&self, execution_id: Uuid) -> Result<()> {
        self.executions.write().await.remove(&execution_id);
        Ok(())
    }

    async fn list_pipes(&self) -> Result<Vec<String>> {
        let execs = self.executions.read().await;
        let mut codes: Vec<String> = execs.values().map(|e| e.pipe_code.clone()).collect();
        codes.sort();
        codes.dedup();
        Ok(codes)
    }
}

/// Create a summary from a finished run
pub fn create_summary(output: &PipeOutput) -> Result<ExecutionSummary> {
    let state = &output.state;
    Ok(ExecutionSummary {
        execution_id: state.execution_id,
        pipe_code: state.pipe_code.clone(),
        status: state.status,
        started_at: state.started_at.unwrap_or_else(Utc::now),
        completed_at: state.completed_at,
        output_name: output.outcome.as_ref().ok().cloned(),
        error: output.error().map(|e| e.to_string()),
        snapshot_json: Some(output.working_memory.snapshot().to_json()?),
    })
}
