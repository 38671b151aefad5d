//! Pipe compilation and execution

pub mod compiler;
pub mod condition;
pub mod context;
pub mod dry_run;
pub mod engine;
pub mod operator;
pub mod parallel;
pub mod pipe;
pub mod sequence;
pub mod sub_pipe;

pub use compiler::PipeCompiler;
pub use condition::{BranchTarget, Condition};
pub use context::{EngineConfig, RunContext, RunMode};
pub use dry_run::{dry_run_pipe, dry_run_pipes, DryRunStatus, PipeDryRunOutput};
pub use engine::{EventHandler, ExecutionEvent, PipeEngine, PipeOutput};
pub use operator::{Operator, OperatorKind};
pub use parallel::{Parallel, ParallelOutput};
pub use pipe::{ChildCall, InputRequirement, Pipe, PipeHeader};
pub use sequence::Sequence;
pub use sub_pipe::SubPipe;
