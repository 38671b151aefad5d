//! Condition controller - picks exactly one branch from an expression

use crate::core::blueprint::CONTINUE_PIPE_CODE;
use crate::core::error::{PipeError, PipeResult};
use crate::core::expression::Expression;
use crate::core::memory::WorkingMemory;
use crate::execution::context::RunContext;
use crate::execution::engine::ExecutionEvent;
use crate::execution::pipe::{Pipe, PipeHeader};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Where a branch leads
#[derive(Debug, Clone, PartialEq)]
pub enum BranchTarget {
    /// Built-in pass-through: memory unchanged, main stuff is the output
    Continue,
    Pipe(Arc<Pipe>),
}

impl BranchTarget {
    pub fn code(&self) -> &str {
        match self {
            BranchTarget::Continue => CONTINUE_PIPE_CODE,
            BranchTarget::Pipe(pipe) => pipe.code(),
        }
    }

    pub fn pipe(&self) -> Option<&Arc<Pipe>> {
        match self {
            BranchTarget::Continue => None,
            BranchTarget::Pipe(pipe) => Some(pipe),
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct Condition {
    pub(crate) header: PipeHeader,
    pub(crate) expression: Expression,
    /// Expression value -> branch, in declaration order
    pub(crate) pipe_map: IndexMap<String, BranchTarget>,
    pub(crate) default: Option<BranchTarget>,
}

impl Condition {
    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    pub fn pipe_map(&self) -> &IndexMap<String, BranchTarget> {
        &self.pipe_map
    }

    pub fn default_target(&self) -> Option<&BranchTarget> {
        self.default.as_ref()
    }

    /// Every branch target, mapped ones first, then the default
    pub fn targets(&self) -> impl Iterator<Item = &BranchTarget> {
        self.pipe_map.values().chain(self.default.iter())
    }

    /// Branch for an evaluated expression: exact key first, then the default
    pub fn select(&self, evaluated: &str) -> Option<&BranchTarget> {
        self.pipe_map.get(evaluated).or(self.default.as_ref())
    }

    pub(crate) async fn run(
        &self,
        ctx: &RunContext,
        memory: &mut WorkingMemory,
        output_name: Option<&str>,
    ) -> PipeResult<String> {
        let code = &self.header.code;
        let evaluated = self.expression.evaluate(memory)?;

        let target = match self.select(&evaluated) {
            Some(target) => target,
            // Placeholder values rarely hit a real key; keep walking the graph
            None if ctx.is_dry_run() => self.targets().next().ok_or_else(|| {
                PipeError::NoMatchingBranch {
                    pipe: code.clone(),
                    evaluated: evaluated.clone(),
                }
            })?,
            None => {
                return Err(PipeError::NoMatchingBranch {
                    pipe: code.clone(),
                    evaluated,
                });
            }
        };

        info!(
            "Condition {} evaluated '{}' -> {}",
            code,
            evaluated,
            target.code()
        );
        ctx.emit(ExecutionEvent::BranchChosen {
            pipe_code: code.clone(),
            evaluated_expression: evaluated.clone(),
            chosen_pipe_code: target.code().to_string(),
        });

        if ctx.is_dry_run() {
            self.exercise_other_branches(ctx, memory, target, output_name)
                .await?;
        }

        match target {
            BranchTarget::Continue => memory
                .main_name()
                .map(str::to_string)
                .ok_or_else(|| PipeError::StuffNotFound {
                    name: "main stuff".to_string(),
                }),
            BranchTarget::Pipe(pipe) => pipe.run(ctx, memory, output_name).await,
        }
    }

    /// Dry runs also walk the branches that were not chosen, each in its own fork
    async fn exercise_other_branches(
        &self,
        ctx: &RunContext,
        memory: &WorkingMemory,
        chosen: &BranchTarget,
        output_name: Option<&str>,
    ) -> PipeResult<()> {
        let mut seen = vec![chosen.code()];
        for target in self.targets() {
            let BranchTarget::Pipe(pipe) = target else {
                continue;
            };
            if seen.contains(&pipe.code()) {
                continue;
            }
            seen.push(pipe.code());
            debug!("Dry run: exercising branch {} of {}", pipe.code(), self.header.code);
            let mut scope = memory.fork();
            pipe.run(ctx, &mut scope, output_name).await?;
        }
        Ok(())
    }
}
