//! pipeworks - a typed pipe execution engine with pluggable inference workers

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod worker;

// Re-export commonly used types
pub use core::{
    Concept, ConceptRegistry, ExecutionStatus, PipeError, PipeLibrary, PipeResult, Stuff,
    StuffContent, WorkingMemory,
};
pub use execution::{
    EngineConfig, ExecutionEvent, Pipe, PipeDryRunOutput, PipeEngine, PipeOutput, RunContext,
    RunMode,
};
pub use worker::{
    ImageWorker, LlmWorker, OcrWorker, StaticWorkerRegistry, Worker, WorkerError, WorkerRegistry,
};
