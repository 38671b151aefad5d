//! Pipe engine - compiles pipes on demand and runs them against working memory

use crate::{
    core::{
        ConceptRegistry, ExecutionState, ExecutionStatus, PipeError, PipeLibrary, PipeResult, Stuff,
        WorkingMemory,
    },
    execution::{
        compiler::PipeCompiler,
        context::{EngineConfig, RunContext, RunMode},
        dry_run::{self, PipeDryRunOutput},
        pipe::Pipe,
    },
    worker::WorkerRegistry,
};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur while a pipe runs
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        execution_id: Uuid,
        pipe_code: String,
        mode: RunMode,
    },
    PipeStarted {
        pipe_code: String,
        kind: &'static str,
    },
    PipeCompleted {
        pipe_code: String,
        output_name: String,
    },
    PipeFailed {
        pipe_code: String,
        error: String,
    },
    BranchChosen {
        pipe_code: String,
        evaluated_expression: String,
        chosen_pipe_code: String,
    },
    ParallelMerged {
        pipe_code: String,
        results: Vec<String>,
    },
    RunFinished {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Result of one `run_pipe` call
#[derive(Debug)]
pub struct PipeOutput {
    /// Memory as the run left it
    pub working_memory: WorkingMemory,

    /// Name the pipe bound its output under, or why it failed
    pub outcome: PipeResult<String>,

    pub state: ExecutionState,
}

impl PipeOutput {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The stuff the pipe produced
    pub fn main_stuff(&self) -> Option<&Arc<Stuff>> {
        match &self.outcome {
            Ok(name) => self.working_memory.lookup(name),
            Err(_) => None,
        }
    }

    pub fn error(&self) -> Option<&PipeError> {
        self.outcome.as_ref().err()
    }

    pub fn into_result(self) -> PipeResult<(WorkingMemory, String)> {
        let PipeOutput {
            working_memory,
            outcome,
            ..
        } = self;
        outcome.map(|name| (working_memory, name))
    }
}

/// Main pipe execution engine
pub struct PipeEngine {
    library: Arc<PipeLibrary>,
    registry: Arc<ConceptRegistry>,
    workers: Arc<dyn WorkerRegistry>,
    config: EngineConfig,
    /// Shared by every run so the operator bound holds engine-wide
    operator_permits: Arc<Semaphore>,
    event_handlers: RwLock<Vec<EventHandler>>,
    compiled: Mutex<HashMap<String, Arc<Pipe>>>,
}

impl PipeEngine {
    pub fn new(
        library: PipeLibrary,
        workers: Arc<dyn WorkerRegistry>,
        config: EngineConfig,
    ) -> PipeResult<Self> {
        library.validate()?;
        let registry = Arc::new(library.registry().clone());
        let operator_permits = Arc::new(Semaphore::new(config.max_concurrent_operators.max(1)));

        Ok(Self {
            library: Arc::new(library),
            registry,
            workers,
            config,
            operator_permits,
            event_handlers: RwLock::new(Vec::new()),
            compiled: Mutex::new(HashMap::new()),
        })
    }

    pub fn library(&self) -> &PipeLibrary {
        &self.library
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(handler));
    }

    /// Compile one pipe, reusing an earlier compilation when there is one
    pub fn compile(&self, code: &str) -> PipeResult<Arc<Pipe>> {
        let mut compiled = self
            .compiled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(pipe) = compiled.get(code) {
            return Ok(pipe.clone());
        }
        let pipe = PipeCompiler::new(&self.library).compile(code)?;
        compiled.insert(code.to_string(), pipe.clone());
        Ok(pipe)
    }

    /// Compile every pipe of the library, failing on the first broken one
    pub fn compile_all(&self) -> PipeResult<IndexMap<String, Arc<Pipe>>> {
        let pipes = PipeCompiler::new(&self.library).compile_all()?;
        let mut compiled = self
            .compiled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (code, pipe) in &pipes {
            compiled.entry(code.clone()).or_insert_with(|| pipe.clone());
        }
        info!("Compiled {} pipes", pipes.len());
        Ok(pipes)
    }

    /// Run a pipe against an initial memory
    pub async fn run_pipe(&self, code: &str, memory: WorkingMemory) -> PipeOutput {
        self.run_pipe_with_cancel(code, memory, CancellationToken::new())
            .await
    }

    /// Run a pipe; cancelling `cancel` stops every operator still waiting
    pub async fn run_pipe_with_cancel(
        &self,
        code: &str,
        mut memory: WorkingMemory,
        cancel: CancellationToken,
    ) -> PipeOutput {
        let ctx = self.context(RunMode::Live).with_cancel(cancel);
        let execution_id = ctx.execution_id();
        let mut state = ExecutionState::new(execution_id, code);

        info!("Starting pipe execution: {} ({})", code, execution_id);
        state.start();
        ctx.emit(ExecutionEvent::RunStarted {
            execution_id,
            pipe_code: code.to_string(),
            mode: RunMode::Live,
        });

        let outcome = match self.compile(code) {
            Ok(pipe) => pipe.run(&ctx, &mut memory, None).await,
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(name) => {
                state.complete();
                info!("Pipe execution finished: {} -> '{}'", code, name);
            }
            Err(e) if e.is_cancelled() => {
                state.cancel();
                warn!("Pipe execution cancelled: {}", code);
            }
            Err(e) => {
                state.fail();
                error!("Pipe execution failed: {}: {}", code, e);
            }
        }
        ctx.emit(ExecutionEvent::RunFinished {
            execution_id,
            status: state.status,
        });

        PipeOutput {
            working_memory: memory,
            outcome,
            state,
        }
    }

    /// Dry-run every pipe of the library
    pub async fn dry_run_pipes(
        &self,
        raise_on_failure: bool,
    ) -> PipeResult<IndexMap<String, PipeDryRunOutput>> {
        self.dry_run_pipes_with_progress(raise_on_failure, |_, _| {})
            .await
    }

    /// Dry-run every pipe, reporting each result as soon as it is known
    pub async fn dry_run_pipes_with_progress(
        &self,
        raise_on_failure: bool,
        on_result: impl FnMut(&str, &PipeDryRunOutput),
    ) -> PipeResult<IndexMap<String, PipeDryRunOutput>> {
        let ctx = self.context(RunMode::DryRun);
        info!("Dry-running {} pipes", self.library.len());
        dry_run::dry_run_pipes(&self.library, &ctx, raise_on_failure, on_result).await
    }

    fn context(&self, mode: RunMode) -> RunContext {
        let handlers = self
            .event_handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        RunContext::new(self.registry.clone(), self.workers.clone(), &self.config)
            .with_mode(mode)
            .with_permits(self.operator_permits.clone())
            .with_events(handlers)
    }
}
