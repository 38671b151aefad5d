//! Language model worker backed by an external command

use crate::worker::{LlmRequest, LlmResponse, LlmWorker, WorkerError};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs `<program> <args...> <prompt>` and returns its stdout
///
/// The system prompt, when present, is passed through the
/// `PIPEWORKS_SYSTEM_PROMPT` environment variable.
#[derive(Debug, Clone)]
pub struct CommandLlmWorker {
    program: String,
    args: Vec<String>,
}

impl CommandLlmWorker {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a whitespace-separated command line (`"llm -m small"`)
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl LlmWorker for CommandLlmWorker {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, WorkerError> {
        debug!(
            "Spawning '{}' for pipe '{}' with prompt length: {}",
            self.program,
            request.pipe_code,
            request.prompt.len()
        );

        let mut command = Command::new(&self.program);
        command.args(&self.args).arg(&request.prompt).kill_on_drop(true);
        if let Some(system_prompt) = &request.system_prompt {
            command.env("PIPEWORKS_SYSTEM_PROMPT", system_prompt);
        }

        let output = command.output().await.map_err(|e| {
            WorkerError::Unavailable(format!("Failed to execute '{}': {}", self.program, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            warn!("{} exited with code {}: {}", self.program, exit_code, stderr.trim());
            return Err(WorkerError::Api(format!(
                "{} exited with code {}: {}",
                self.program,
                exit_code,
                stderr.trim()
            )));
        }

        let content = String::from_utf8(output.stdout)
            .map_err(|e| WorkerError::InvalidOutput(format!("Output is not UTF-8: {}", e)))?;

        debug!("{} returned {} bytes of output", self.program, content.len());

        Ok(LlmResponse::new(content.trim_end()))
    }
}
