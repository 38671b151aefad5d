//! Worker request, response, and error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for worker calls
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Worker unavailable: {0}")]
    Unavailable(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Invalid worker output: {0}")]
    InvalidOutput(String),

    #[error("No worker registered under handle '{0}'")]
    UnknownWorker(String),

    #[error("Worker '{handle}' is a {actual} worker, not {expected}")]
    WrongKind {
        handle: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkerError {
    /// Transient failures a caller may retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkerError::RateLimited(_) | WorkerError::Unavailable(_) | WorkerError::Timeout(_)
        )
    }
}

/// Prompt sent to a language model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    /// Code of the operator making the call
    pub pipe_code: String,

    pub prompt: String,

    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Fully qualified code of the expected output concept
    pub output_concept: String,

    /// Whether the answer is expected to be a JSON document rather than text
    pub structured: bool,

    /// Whether a list of outputs is expected
    pub multiple: bool,
}

/// Response from a language model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    /// The response content
    pub content: String,

    /// Token usage information (if available)
    pub usage: Option<TokenUsage>,
}

impl LlmResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Image generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub pipe_code: String,
    pub prompt: String,

    /// Number of images wanted
    pub count: usize,
}

/// One generated image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,

    #[serde(default)]
    pub caption: Option<String>,
}

/// Kind of document handed to an OCR worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Image,
    Pdf,
}

/// OCR request for one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrRequest {
    pub pipe_code: String,
    pub document_url: String,
    pub kind: DocumentKind,
}

/// Text extracted from a document, one entry per page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrResponse {
    pub pages: Vec<String>,
}
