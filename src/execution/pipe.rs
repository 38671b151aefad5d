//! Compiled, runnable pipes
//!
//! A [`Pipe`] is immutable once compiled and may be shared by any number of
//! concurrent runs. Running a pipe validates its declared inputs, does its
//! work against the caller's working memory, and returns the name under
//! which its output was bound.

use crate::core::concept::{Concept, ConceptRegistry};
use crate::core::error::{PipeError, PipeResult};
use crate::core::memory::WorkingMemory;
use crate::execution::condition::Condition;
use crate::execution::context::RunContext;
use crate::execution::engine::ExecutionEvent;
use crate::execution::operator::Operator;
use crate::execution::parallel::Parallel;
use crate::execution::sequence::Sequence;
use crate::execution::sub_pipe::SubPipe;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tracing::{debug, warn};

/// One declared input of a pipe
#[derive(Debug, Clone, PartialEq)]
pub struct InputRequirement {
    pub name: String,
    pub concept: Arc<Concept>,
    pub multiple: bool,
}

/// Fields shared by every pipe kind
#[derive(Debug, Clone, PartialEq)]
pub struct PipeHeader {
    pub code: String,
    pub domain: String,
    pub definition: Option<String>,
    pub inputs: Vec<InputRequirement>,
    pub output: Arc<Concept>,
    pub output_multiple: bool,
}

impl PipeHeader {
    /// Check every declared input is present with a compatible concept
    pub fn validate_inputs(
        &self,
        memory: &WorkingMemory,
        registry: &ConceptRegistry,
    ) -> PipeResult<()> {
        for input in &self.inputs {
            if input.multiple {
                memory.get_as_list(&input.name, &input.concept, registry)?;
            } else {
                let stuff = memory.get(&input.name, &input.concept, registry)?;
                if stuff.is_list() {
                    return Err(PipeError::TypeMismatch {
                        name: input.name.clone(),
                        expected: input.concept.code.clone(),
                        actual: format!("{}[]", stuff.concept),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A child invocation bound under a result name
#[derive(Debug, Clone, PartialEq)]
pub struct ChildCall {
    pub pipe: Arc<Pipe>,
    pub result: String,
}

/// The closed set of runnable pipe kinds
#[derive(Debug, PartialEq)]
pub enum Pipe {
    Operator(Operator),
    Sequence(Sequence),
    Parallel(Parallel),
    Condition(Condition),
    SubPipe(SubPipe),
}

impl Pipe {
    pub fn header(&self) -> &PipeHeader {
        match self {
            Pipe::Operator(p) => &p.header,
            Pipe::Sequence(p) => &p.header,
            Pipe::Parallel(p) => &p.header,
            Pipe::Condition(p) => &p.header,
            Pipe::SubPipe(p) => &p.header,
        }
    }

    pub fn code(&self) -> &str {
        &self.header().code
    }

    pub fn input_requirements(&self) -> &[InputRequirement] {
        &self.header().inputs
    }

    pub fn output_concept(&self) -> &Arc<Concept> {
        &self.header().output
    }

    pub fn output_multiple(&self) -> bool {
        self.header().output_multiple
    }

    /// Type tag used in logs and events
    pub fn kind_name(&self) -> &'static str {
        match self {
            Pipe::Operator(op) => op.kind.type_name(),
            Pipe::Sequence(_) => "PipeSequence",
            Pipe::Parallel(_) => "PipeParallel",
            Pipe::Condition(_) => "PipeCondition",
            Pipe::SubPipe(_) => "PipeSubPipe",
        }
    }

    pub fn is_controller(&self) -> bool {
        !matches!(self, Pipe::Operator(_))
    }

    /// Direct children, in declaration order
    pub fn children(&self) -> Vec<&Arc<Pipe>> {
        match self {
            Pipe::Operator(_) => Vec::new(),
            Pipe::Sequence(p) => p.steps.iter().map(|s| &s.pipe).collect(),
            Pipe::Parallel(p) => p.branches.iter().map(|b| &b.pipe).collect(),
            Pipe::Condition(p) => p.targets().filter_map(|t| t.pipe()).collect(),
            Pipe::SubPipe(p) => vec![&p.call.pipe],
        }
    }

    /// Run against `memory`, binding the output under `output_name`
    ///
    /// Without an output name, operators bind under their own code and
    /// controllers under the name their last child used.
    pub fn run<'a>(
        &'a self,
        ctx: &'a RunContext,
        memory: &'a mut WorkingMemory,
        output_name: Option<&'a str>,
    ) -> BoxFuture<'a, PipeResult<String>> {
        async move {
            let code = self.code();
            if ctx.is_cancelled() {
                warn!("Pipe {} not started: run cancelled", code);
                return Err(PipeError::Cancelled {
                    pipe: code.to_string(),
                });
            }

            debug!("Running {} {}", self.kind_name(), code);
            ctx.emit(ExecutionEvent::PipeStarted {
                pipe_code: code.to_string(),
                kind: self.kind_name(),
            });

            let result = match self.header().validate_inputs(memory, ctx.registry()) {
                Err(e) => Err(e),
                Ok(()) => match self {
                    Pipe::Operator(p) => p.run(ctx, memory, output_name).await,
                    Pipe::Sequence(p) => p.run(ctx, memory, output_name).await,
                    Pipe::Parallel(p) => p.run(ctx, memory, output_name).await,
                    Pipe::Condition(p) => p.run(ctx, memory, output_name).await,
                    Pipe::SubPipe(p) => p.run(ctx, memory, output_name).await,
                },
            };

            match &result {
                Ok(name) => {
                    debug!("Pipe {} produced '{}'", code, name);
                    ctx.emit(ExecutionEvent::PipeCompleted {
                        pipe_code: code.to_string(),
                        output_name: name.clone(),
                    });
                }
                Err(e) => {
                    debug!("Pipe {} failed: {}", code, e);
                    ctx.emit(ExecutionEvent::PipeFailed {
                        pipe_code: code.to_string(),
                        error: e.to_string(),
                    });
                }
            }
            result
        }
        .boxed()
    }
}

/// Re-bind a produced stuff under the caller's output name, if it differs
pub(crate) fn bind_output(
    memory: &mut WorkingMemory,
    produced: &str,
    output_name: Option<&str>,
) -> PipeResult<String> {
    match output_name {
        Some(name) if name != produced => {
            let stuff = memory
                .lookup(produced)
                .ok_or_else(|| PipeError::StuffNotFound {
                    name: produced.to_string(),
                })?
                .renamed(name);
            memory.set_result(name, stuff);
            Ok(name.to_string())
        }
        _ => Ok(produced.to_string()),
    }
}
