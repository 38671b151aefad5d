//! Per-run context threaded through every pipe invocation

use crate::core::concept::ConceptRegistry;
use crate::core::error::{PipeError, PipeResult};
use crate::execution::engine::{EventHandler, ExecutionEvent};
use crate::worker::WorkerRegistry;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Engine-wide tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of operator calls in flight at once
    #[serde(default = "default_max_concurrent_operators")]
    pub max_concurrent_operators: usize,

    /// Deadline for one operator call when neither the pipe nor its domain sets one
    #[serde(default = "default_operator_timeout_secs")]
    pub operator_timeout_secs: u64,

    /// Number of items in placeholder lists built by dry runs
    #[serde(default = "default_dry_run_list_len")]
    pub dry_run_list_len: usize,
}

fn default_max_concurrent_operators() -> usize {
    8
}

fn default_operator_timeout_secs() -> u64 {
    300
}

fn default_dry_run_list_len() -> usize {
    2
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operators: default_max_concurrent_operators(),
            operator_timeout_secs: default_operator_timeout_secs(),
            dry_run_list_len: default_dry_run_list_len(),
        }
    }
}

impl EngineConfig {
    /// Load engine configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse engine configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_operators == 0 {
            anyhow::bail!("max_concurrent_operators must be at least 1");
        }
        if self.operator_timeout_secs == 0 {
            anyhow::bail!("operator_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn with_max_concurrent_operators(mut self, max: usize) -> Self {
        self.max_concurrent_operators = max;
        self
    }

    pub fn with_operator_timeout_secs(mut self, secs: u64) -> Self {
        self.operator_timeout_secs = secs;
        self
    }

    pub fn with_dry_run_list_len(mut self, len: usize) -> Self {
        self.dry_run_list_len = len;
        self
    }
}

/// Whether operators call their workers or synthesize placeholders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    Live,
    DryRun,
}

/// Everything a pipe needs besides its working memory
///
/// Cheap to clone; parallel branches each take their own copy.
#[derive(Clone)]
pub struct RunContext {
    execution_id: Uuid,
    mode: RunMode,
    registry: Arc<ConceptRegistry>,
    workers: Arc<dyn WorkerRegistry>,
    cancel: CancellationToken,
    operator_permits: Arc<Semaphore>,
    operator_timeout: Duration,
    dry_run_list_len: usize,
    events: Arc<[EventHandler]>,
}

impl RunContext {
    pub fn new(
        registry: Arc<ConceptRegistry>,
        workers: Arc<dyn WorkerRegistry>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            mode: RunMode::Live,
            registry,
            workers,
            cancel: CancellationToken::new(),
            operator_permits: Arc::new(Semaphore::new(config.max_concurrent_operators.max(1))),
            operator_timeout: Duration::from_secs(config.operator_timeout_secs),
            dry_run_list_len: config.dry_run_list_len,
            events: Arc::from(Vec::new()),
        }
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Share an operator semaphore with other runs
    pub fn with_permits(mut self, permits: Arc<Semaphore>) -> Self {
        self.operator_permits = permits;
        self
    }

    pub fn with_events(mut self, events: Vec<EventHandler>) -> Self {
        self.events = Arc::from(events);
        self
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn is_dry_run(&self) -> bool {
        self.mode == RunMode::DryRun
    }

    pub fn registry(&self) -> &ConceptRegistry {
        &self.registry
    }

    pub fn workers(&self) -> &dyn WorkerRegistry {
        self.workers.as_ref()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn dry_run_list_len(&self) -> usize {
        self.dry_run_list_len
    }

    /// Deadline for one operator call, preferring the pipe's own
    pub fn operator_timeout(&self, pipe_timeout: Option<Duration>) -> Duration {
        pipe_timeout.unwrap_or(self.operator_timeout)
    }

    /// Wait for an operator slot, giving up when the run is cancelled
    pub async fn acquire_operator_permit(&self, pipe: &str) -> PipeResult<OwnedSemaphorePermit> {
        let cancelled = || PipeError::Cancelled {
            pipe: pipe.to_string(),
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(cancelled()),
            permit = self.operator_permits.clone().acquire_owned() => permit.map_err(|_| cancelled()),
        }
    }

    /// Emit an event to all handlers
    pub fn emit(&self, event: ExecutionEvent) {
        for handler in self.events.iter() {
            handler(event.clone());
        }
    }
}
