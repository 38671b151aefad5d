//! Sub-pipe controller - runs one child in a fresh scope

use crate::core::error::{PipeError, PipeResult};
use crate::core::memory::WorkingMemory;
use crate::execution::context::RunContext;
use crate::execution::pipe::{bind_output, ChildCall, PipeHeader};
use indexmap::IndexMap;
use tracing::debug;

#[derive(Debug, PartialEq)]
pub struct SubPipe {
    pub(crate) header: PipeHeader,
    pub(crate) call: ChildCall,
    /// Child input name -> caller memory name
    pub(crate) inputs_from: IndexMap<String, String>,
}

impl SubPipe {
    pub fn call(&self) -> &ChildCall {
        &self.call
    }

    /// Name in the caller's memory that feeds a child input
    pub fn source_of<'a>(&'a self, child_input: &'a str) -> &'a str {
        self.inputs_from
            .get(child_input)
            .map(String::as_str)
            .unwrap_or(child_input)
    }

    /// The child sees only its declared inputs; its intermediates are dropped
    /// and only its output comes back, under `result`
    pub(crate) async fn run(
        &self,
        ctx: &RunContext,
        memory: &mut WorkingMemory,
        output_name: Option<&str>,
    ) -> PipeResult<String> {
        let child = &self.call.pipe;
        let mut scope = WorkingMemory::new();
        for input in child.input_requirements() {
            let source = self.source_of(&input.name);
            let stuff = memory.lookup(source).ok_or_else(|| PipeError::StuffNotFound {
                name: source.to_string(),
            })?;
            scope.set(&input.name, stuff.renamed(&input.name))?;
        }
        debug!(
            "Sub-pipe {} running {} with {} input(s)",
            self.header.code,
            child.code(),
            scope.len()
        );

        let produced = child.run(ctx, &mut scope, Some(&self.call.result)).await?;
        let stuff = scope
            .lookup(&produced)
            .ok_or_else(|| PipeError::StuffNotFound {
                name: produced.clone(),
            })?
            .renamed(&self.call.result);
        memory.set_result(&self.call.result, stuff);

        bind_output(memory, &self.call.result, output_name)
    }
}
