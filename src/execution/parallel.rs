//! Parallel controller - fans out over forked scopes and merges in order

use crate::core::error::{BranchFailure, PipeError, PipeResult};
use crate::core::memory::WorkingMemory;
use crate::core::stuff::{Stuff, StuffContent};
use crate::execution::context::RunContext;
use crate::execution::engine::ExecutionEvent;
use crate::execution::pipe::{bind_output, ChildCall, PipeHeader};
use crate::worker::WorkerError;
use indexmap::IndexMap;
use std::collections::HashMap;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

type BranchOutcome = (WorkingMemory, PipeResult<String>);

/// How the controller's own output is built
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParallelOutput {
    /// Re-bind the named branch result
    Primary { result: String },
    /// Collect every branch result into one structured record
    Aggregate,
}

#[derive(Debug, PartialEq)]
pub struct Parallel {
    pub(crate) header: PipeHeader,
    pub(crate) branches: Vec<ChildCall>,
    pub(crate) output: ParallelOutput,
}

impl Parallel {
    pub fn branches(&self) -> &[ChildCall] {
        &self.branches
    }

    pub fn output_mode(&self) -> &ParallelOutput {
        &self.output
    }

    pub(crate) async fn run(
        &self,
        ctx: &RunContext,
        memory: &mut WorkingMemory,
        output_name: Option<&str>,
    ) -> PipeResult<String> {
        let code = &self.header.code;
        info!("Parallel {} fanning out to {} branches", code, self.branches.len());

        let mut tasks = JoinSet::new();
        let mut slots = HashMap::with_capacity(self.branches.len());
        for (index, branch) in self.branches.iter().enumerate() {
            let mut scope = memory.fork();
            let ctx = ctx.clone();
            let pipe = branch.pipe.clone();
            let result = branch.result.clone();
            let handle = tasks.spawn(async move {
                let outcome = pipe.run(&ctx, &mut scope, Some(&result)).await;
                (scope, outcome)
            });
            slots.insert(handle.id(), index);
        }

        // Every branch is awaited, even after one fails. If this future is
        // dropped first, dropping the set aborts the branches still running.
        let mut joined: Vec<Option<Result<BranchOutcome, JoinError>>> =
            self.branches.iter().map(|_| None).collect();
        while let Some(next) = tasks.join_next_with_id().await {
            let (id, outcome) = match next {
                Ok((id, outcome)) => (id, Ok(outcome)),
                Err(join_error) => (join_error.id(), Err(join_error)),
            };
            if let Some(&index) = slots.get(&id) {
                joined[index] = Some(outcome);
            }
        }

        if ctx.is_cancelled() {
            warn!("Parallel {} cancelled; discarding every branch", code);
            return Err(PipeError::Cancelled { pipe: code.clone() });
        }

        let mut failures = Vec::new();
        let mut outputs = Vec::new();
        for (branch, joined) in self.branches.iter().zip(joined) {
            let branch_code = branch.pipe.code().to_string();
            match joined {
                Some(Ok((scope, Ok(name)))) => outputs.push((branch, scope, name)),
                Some(Ok((_, Err(error)))) => failures.push(BranchFailure {
                    pipe_code: branch_code,
                    error,
                }),
                Some(Err(join_error)) => {
                    failures.push(task_failure(branch_code, join_error.to_string()))
                }
                None => failures.push(task_failure(branch_code, "no result".to_string())),
            }
        }

        if !failures.is_empty() {
            error!(
                "Parallel {} failed in {} of {} branches",
                code,
                failures.len(),
                self.branches.len()
            );
            return Err(PipeError::AggregateParallel {
                pipe: code.clone(),
                failures,
            });
        }

        // Merge in declaration order, whatever order the branches finished in
        let mut merged = Vec::with_capacity(outputs.len());
        for (branch, scope, name) in outputs {
            let stuff = scope.lookup(&name).ok_or_else(|| PipeError::StuffNotFound {
                name: name.clone(),
            })?;
            memory.set_result(&branch.result, stuff.renamed(&branch.result));
            merged.push(branch.result.clone());
        }
        info!("Parallel {} merged {}", code, merged.join(", "));
        ctx.emit(ExecutionEvent::ParallelMerged {
            pipe_code: code.clone(),
            results: merged.clone(),
        });

        match &self.output {
            ParallelOutput::Primary { result } => bind_output(memory, result, output_name),
            ParallelOutput::Aggregate => {
                let name = output_name.unwrap_or(code);
                let registry = ctx.registry();
                let keys = match registry.structure_of(&self.header.output) {
                    Some(structure) => structure.keys().cloned().collect(),
                    None => merged,
                };
                let mut fields = IndexMap::new();
                for key in keys {
                    let stuff = memory
                        .lookup(&key)
                        .ok_or_else(|| PipeError::StuffNotFound { name: key.clone() })?;
                    fields.insert(key, stuff.content.clone());
                }
                let record = Stuff::new(
                    name,
                    &self.header.output,
                    StuffContent::Structured { fields },
                    registry,
                )?;
                memory.set_result(name, record);
                Ok(name.to_string())
            }
        }
    }
}

fn task_failure(pipe_code: String, reason: String) -> BranchFailure {
    BranchFailure {
        error: PipeError::OperatorExecution {
            pipe: pipe_code.clone(),
            source: WorkerError::Internal(format!("branch task failed: {}", reason)),
        },
        pipe_code,
    }
}
