//! Sequence controller - runs steps in order in one scope

use crate::core::error::{PipeError, PipeResult};
use crate::core::memory::WorkingMemory;
use crate::execution::context::RunContext;
use crate::execution::pipe::{bind_output, ChildCall, PipeHeader};
use tracing::{debug, error};

#[derive(Debug, PartialEq)]
pub struct Sequence {
    pub(crate) header: PipeHeader,
    pub(crate) steps: Vec<ChildCall>,
}

impl Sequence {
    pub fn steps(&self) -> &[ChildCall] {
        &self.steps
    }

    /// Each step sees every earlier step's result; the first failure aborts
    /// the sequence and is returned unchanged
    pub(crate) async fn run(
        &self,
        ctx: &RunContext,
        memory: &mut WorkingMemory,
        output_name: Option<&str>,
    ) -> PipeResult<String> {
        let total = self.steps.len();
        let mut last = None;

        for (index, step) in self.steps.iter().enumerate() {
            debug!(
                "Sequence {} step {}/{}: {} -> '{}'",
                self.header.code,
                index + 1,
                total,
                step.pipe.code(),
                step.result
            );

            let produced = match step.pipe.run(ctx, memory, Some(&step.result)).await {
                Ok(name) => name,
                Err(e) => {
                    error!(
                        "Sequence {} aborted at step {} ({}): {}",
                        self.header.code,
                        index + 1,
                        step.pipe.code(),
                        e
                    );
                    return Err(e);
                }
            };
            last = Some(bind_output(memory, &produced, Some(&step.result))?);
        }

        let last = last.ok_or_else(|| PipeError::InvalidBlueprint {
            pipe: self.header.code.clone(),
            reason: "sequence has no steps".to_string(),
        })?;
        bind_output(memory, &last, output_name)
    }
}
