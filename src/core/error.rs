//! Error taxonomy for compilation and execution

use crate::worker::WorkerError;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the engine
pub type PipeResult<T> = Result<T, PipeError>;

/// One failed branch of a parallel controller
#[derive(Debug)]
pub struct BranchFailure {
    /// Code of the branch pipe that failed
    pub pipe_code: String,

    /// The branch's error
    pub error: PipeError,
}

/// Errors raised while compiling or running pipes
#[derive(Debug, Error)]
pub enum PipeError {
    #[error("Unknown concept '{code}'")]
    UnknownConcept { code: String },

    #[error("Concept '{code}' is already registered")]
    DuplicateConcept { code: String },

    #[error("Content does not conform to concept '{concept}': {reason}")]
    InvalidContent { concept: String, reason: String },

    #[error("Stuff '{name}' not found in working memory")]
    StuffNotFound { name: String },

    #[error("Stuff '{name}' is a '{actual}' but '{expected}' was expected")]
    TypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Stuff '{name}' is already bound in this scope")]
    DuplicateStuff { name: String },

    #[error("Invalid blueprint for pipe '{pipe}': {reason}")]
    InvalidBlueprint { pipe: String, reason: String },

    #[error("Pipe '{from}' references unknown pipe '{code}'")]
    UnresolvedPipeReference { from: String, code: String },

    #[error("Cyclic pipe reference: {}", .path.join(" -> "))]
    CyclicPipeReference { path: Vec<String> },

    #[error("Invalid branch map in condition '{pipe}': {reason}")]
    InvalidBranchMap { pipe: String, reason: String },

    #[error("Invalid expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("Could not evaluate expression '{expression}': {reason}")]
    ExpressionEvaluation { expression: String, reason: String },

    #[error("Invalid template: {reason}")]
    InvalidTemplate { reason: String },

    #[error("Could not render template: {reason}")]
    TemplateRender { reason: String },

    #[error("Pipe '{pipe}' declares output '{output}' but no child produces a compatible concept")]
    UnsatisfiableOutput { pipe: String, output: String },

    #[error("Condition '{pipe}' has no branch for '{evaluated}' and no default")]
    NoMatchingBranch { pipe: String, evaluated: String },

    #[error("Operator '{pipe}' failed: {source}")]
    OperatorExecution {
        pipe: String,
        #[source]
        source: WorkerError,
    },

    #[error("Parallel '{pipe}' failed in {} branch(es): {}", .failures.len(), format_failures(.failures))]
    AggregateParallel {
        pipe: String,
        failures: Vec<BranchFailure>,
    },

    #[error("Execution of '{pipe}' was cancelled")]
    Cancelled { pipe: String },

    #[error("Operator '{pipe}' timed out after {}s", .after.as_secs())]
    Timeout { pipe: String, after: Duration },

    #[error("Dry run failed for {} pipe(s): {}", .failed.len(), .failed.join(", "))]
    DryRunFailed { failed: Vec<String> },
}

impl PipeError {
    /// Whether retrying the same invocation could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            PipeError::Timeout { .. } => true,
            PipeError::OperatorExecution { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Whether this error is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipeError::Cancelled { .. })
    }

    /// Codes of the failed branches, if this is a parallel aggregate
    pub fn failed_branches(&self) -> Vec<&str> {
        match self {
            PipeError::AggregateParallel { failures, .. } => {
                failures.iter().map(|f| f.pipe_code.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn format_failures(failures: &[BranchFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("[{}] {}", f.pipe_code, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}
