//! Dry runs - walk every pipe with placeholder data and no worker calls

use crate::core::concept::{Concept, ConceptRegistry, NativeConcept};
use crate::core::error::{PipeError, PipeResult};
use crate::core::library::PipeLibrary;
use crate::core::memory::WorkingMemory;
use crate::core::stuff::{Stuff, StuffContent};
use crate::execution::compiler::PipeCompiler;
use crate::execution::context::{RunContext, RunMode};
use crate::execution::pipe::Pipe;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Outcome of a dry run for one pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DryRunStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeDryRunOutput {
    pub status: DryRunStatus,

    #[serde(default)]
    pub error_message: Option<String>,
}

impl PipeDryRunOutput {
    pub fn success() -> Self {
        Self {
            status: DryRunStatus::Success,
            error_message: None,
        }
    }

    pub fn failure(error: &PipeError) -> Self {
        Self {
            status: DryRunStatus::Failure,
            error_message: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DryRunStatus::Success
    }
}

/// Dry-run every pipe of the library, in declaration order
///
/// Each pipe is compiled and run on its own, so one broken pipe never
/// affects the report of another. With `raise_on_failure`, the full sweep
/// still completes before [`PipeError::DryRunFailed`] is returned.
pub async fn dry_run_pipes(
    library: &PipeLibrary,
    ctx: &RunContext,
    raise_on_failure: bool,
    mut on_result: impl FnMut(&str, &PipeDryRunOutput),
) -> PipeResult<IndexMap<String, PipeDryRunOutput>> {
    let ctx = ctx.clone().with_mode(RunMode::DryRun);
    let mut compiler = PipeCompiler::new(library);
    let mut report = IndexMap::new();

    for code in library.codes() {
        let outcome = match compiler.compile(code) {
            Ok(pipe) => dry_run_pipe(&pipe, &ctx).await,
            Err(e) => Err(e),
        };
        let output = match outcome {
            Ok(()) => {
                info!("Dry run of {} succeeded", code);
                PipeDryRunOutput::success()
            }
            Err(e) => {
                warn!("Dry run of {} failed: {}", code, e);
                PipeDryRunOutput::failure(&e)
            }
        };
        on_result(code, &output);
        report.insert(code.to_string(), output);
    }

    let failed: Vec<String> = report
        .iter()
        .filter(|(_, output)| !output.is_success())
        .map(|(code, _)| code.clone())
        .collect();
    info!(
        "Dry run complete: {} passed, {} failed",
        report.len() - failed.len(),
        failed.len()
    );

    if raise_on_failure && !failed.is_empty() {
        return Err(PipeError::DryRunFailed { failed });
    }
    Ok(report)
}

/// Dry-run one compiled pipe against placeholders for its declared inputs
pub async fn dry_run_pipe(pipe: &Pipe, ctx: &RunContext) -> PipeResult<()> {
    let ctx = ctx.clone().with_mode(RunMode::DryRun);
    let mut memory = placeholder_memory(pipe, ctx.registry(), ctx.dry_run_list_len())?;
    pipe.run(&ctx, &mut memory, None).await.map(|_| ())
}

/// Working memory holding one conformant placeholder per declared input
pub fn placeholder_memory(
    pipe: &Pipe,
    registry: &ConceptRegistry,
    list_len: usize,
) -> PipeResult<WorkingMemory> {
    let mut memory = WorkingMemory::new();
    for input in pipe.input_requirements() {
        let content = placeholder_content(&input.concept, input.multiple, registry, list_len)?;
        memory.set(
            &input.name,
            Stuff::new(&input.name, &input.concept, content, registry)?,
        )?;
    }
    Ok(memory)
}

/// Content that conforms to `concept`
pub fn placeholder_content(
    concept: &Concept,
    multiple: bool,
    registry: &ConceptRegistry,
    list_len: usize,
) -> PipeResult<StuffContent> {
    if multiple {
        let items = (0..list_len)
            .map(|_| placeholder_content(concept, false, registry, list_len))
            .collect::<PipeResult<Vec<_>>>()?;
        return Ok(StuffContent::list(concept.code.clone(), items));
    }

    if let Some(structure) = registry.structure_of(concept) {
        let mut fields = IndexMap::new();
        for (field, code) in &structure {
            let field_concept = registry.resolve(code)?;
            fields.insert(
                field.clone(),
                placeholder_content(&field_concept, false, registry, list_len)?,
            );
        }
        return Ok(StuffContent::Structured { fields });
    }

    match registry.native_root(concept) {
        Some(NativeConcept::Text) | Some(NativeConcept::Anything) => {
            Ok(StuffContent::text(format!("dry run {}", concept.name)))
        }
        Some(NativeConcept::Number) => Ok(StuffContent::number(0.0)),
        Some(NativeConcept::Boolean) => Ok(StuffContent::boolean(false)),
        Some(NativeConcept::Image) => Ok(StuffContent::image("dry-run://image.png")),
        Some(NativeConcept::Pdf) => Ok(StuffContent::Pdf {
            url: "dry-run://document.pdf".to_string(),
        }),
        None => Err(PipeError::InvalidContent {
            concept: concept.code.clone(),
            reason: "no native root or structure to build a placeholder from".to_string(),
        }),
    }
}
