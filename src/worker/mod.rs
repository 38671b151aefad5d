//! Inference workers and the registry that hands them to operators

pub mod command;
pub mod response;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use command::CommandLlmWorker;
pub use response::{
    DocumentKind, GeneratedImage, ImageRequest, LlmRequest, LlmResponse, OcrRequest,
    OcrResponse, TokenUsage, WorkerError,
};

/// Language model backend
#[async_trait]
pub trait LlmWorker: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, WorkerError>;
}

/// Image generation backend
#[async_trait]
pub trait ImageWorker: Send + Sync {
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<GeneratedImage>, WorkerError>;
}

/// Text extraction backend
#[async_trait]
pub trait OcrWorker: Send + Sync {
    async fn extract(&self, request: &OcrRequest) -> Result<OcrResponse, WorkerError>;
}

/// A worker of one of the supported kinds
#[derive(Clone)]
pub enum Worker {
    Llm(Arc<dyn LlmWorker>),
    ImageGenerator(Arc<dyn ImageWorker>),
    Ocr(Arc<dyn OcrWorker>),
}

impl Worker {
    pub fn kind(&self) -> &'static str {
        match self {
            Worker::Llm(_) => "llm",
            Worker::ImageGenerator(_) => "image generation",
            Worker::Ocr(_) => "ocr",
        }
    }

    pub fn into_llm(self, handle: &str) -> Result<Arc<dyn LlmWorker>, WorkerError> {
        match self {
            Worker::Llm(worker) => Ok(worker),
            other => Err(wrong_kind(handle, "llm", &other)),
        }
    }

    pub fn into_image(self, handle: &str) -> Result<Arc<dyn ImageWorker>, WorkerError> {
        match self {
            Worker::ImageGenerator(worker) => Ok(worker),
            other => Err(wrong_kind(handle, "image generation", &other)),
        }
    }

    pub fn into_ocr(self, handle: &str) -> Result<Arc<dyn OcrWorker>, WorkerError> {
        match self {
            Worker::Ocr(worker) => Ok(worker),
            other => Err(wrong_kind(handle, "ocr", &other)),
        }
    }
}

fn wrong_kind(handle: &str, expected: &'static str, actual: &Worker) -> WorkerError {
    WorkerError::WrongKind {
        handle: handle.to_string(),
        expected,
        actual: actual.kind(),
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Worker::{}", self.kind())
    }
}

/// Source of workers, injected into every run
pub trait WorkerRegistry: Send + Sync {
    fn get_worker(&self, handle: &str) -> Result<Worker, WorkerError>;
}

/// Map-backed worker registry
#[derive(Debug, Clone, Default)]
pub struct StaticWorkerRegistry {
    workers: HashMap<String, Worker>,
}

impl StaticWorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: impl Into<String>, worker: Worker) {
        self.workers.insert(handle.into(), worker);
    }

    pub fn with_llm(mut self, handle: impl Into<String>, worker: Arc<dyn LlmWorker>) -> Self {
        self.register(handle, Worker::Llm(worker));
        self
    }

    pub fn with_image(mut self, handle: impl Into<String>, worker: Arc<dyn ImageWorker>) -> Self {
        self.register(handle, Worker::ImageGenerator(worker));
        self
    }

    pub fn with_ocr(mut self, handle: impl Into<String>, worker: Arc<dyn OcrWorker>) -> Self {
        self.register(handle, Worker::Ocr(worker));
        self
    }

    pub fn handles(&self) -> Vec<&str> {
        let mut handles: Vec<&str> = self.workers.keys().map(String::as_str).collect();
        handles.sort_unstable();
        handles
    }
}

impl WorkerRegistry for StaticWorkerRegistry {
    fn get_worker(&self, handle: &str) -> Result<Worker, WorkerError> {
        self.workers
            .get(handle)
            .cloned()
            .ok_or_else(|| WorkerError::UnknownWorker(handle.to_string()))
    }
}
