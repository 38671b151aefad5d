//! Operators - leaf pipes that call one worker or render a template

use crate::core::concept::{Concept, ConceptRegistry, NativeConcept};
use crate::core::error::{PipeError, PipeResult};
use crate::core::memory::WorkingMemory;
use crate::core::stuff::{Stuff, StuffContent};
use crate::core::template::Template;
use crate::execution::context::RunContext;
use crate::execution::dry_run::placeholder_content;
use crate::execution::pipe::PipeHeader;
use crate::worker::{
    DocumentKind, ImageRequest, LlmRequest, OcrRequest, Worker, WorkerError,
};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What an operator does when it runs
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorKind {
    Llm {
        prompt: Template,
        system_prompt: Option<Template>,
        worker: String,
    },
    ImageGen {
        prompt: Template,
        worker: String,
        nb_images: usize,
    },
    Ocr {
        worker: String,
        /// Name of the input holding the document
        document: String,
    },
    Template {
        template: Template,
    },
}

impl OperatorKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            OperatorKind::Llm { .. } => "PipeLLM",
            OperatorKind::ImageGen { .. } => "PipeImgGen",
            OperatorKind::Ocr { .. } => "PipeOcr",
            OperatorKind::Template { .. } => "PipeJinja2",
        }
    }

    /// Handle of the worker this operator calls, if any
    pub fn worker_handle(&self) -> Option<&str> {
        match self {
            OperatorKind::Llm { worker, .. }
            | OperatorKind::ImageGen { worker, .. }
            | OperatorKind::Ocr { worker, .. } => Some(worker),
            OperatorKind::Template { .. } => None,
        }
    }
}

/// Leaf pipe
#[derive(Debug, PartialEq)]
pub struct Operator {
    pub(crate) header: PipeHeader,
    pub(crate) kind: OperatorKind,
    /// Per-pipe deadline for the worker call
    pub(crate) timeout: Option<Duration>,
}

impl Operator {
    pub fn kind(&self) -> &OperatorKind {
        &self.kind
    }

    pub(crate) async fn run(
        &self,
        ctx: &RunContext,
        memory: &mut WorkingMemory,
        output_name: Option<&str>,
    ) -> PipeResult<String> {
        let name = output_name.unwrap_or(&self.header.code).to_string();

        let content = if ctx.is_dry_run() {
            self.simulate(ctx, memory)?
        } else {
            self.execute(ctx, memory).await?
        };

        let stuff = Stuff::new(&name, &self.header.output, content, ctx.registry())?;
        memory.set(&name, stuff)?;
        Ok(name)
    }

    /// Dry-run path: render everything the live path would, call nothing
    fn simulate(&self, ctx: &RunContext, memory: &WorkingMemory) -> PipeResult<StuffContent> {
        match &self.kind {
            OperatorKind::Template { template } => {
                return Ok(StuffContent::text(template.render(memory)?));
            }
            OperatorKind::Llm {
                prompt,
                system_prompt,
                ..
            } => {
                prompt.render(memory)?;
                if let Some(system_prompt) = system_prompt {
                    system_prompt.render(memory)?;
                }
            }
            OperatorKind::ImageGen { prompt, .. } => {
                prompt.render(memory)?;
            }
            OperatorKind::Ocr { document, .. } => {
                self.document_of(memory, document)?;
            }
        }
        debug!("Dry run: synthesizing output of {}", self.header.code);
        placeholder_content(
            &self.header.output,
            self.header.output_multiple,
            ctx.registry(),
            ctx.dry_run_list_len(),
        )
    }

    async fn execute(&self, ctx: &RunContext, memory: &WorkingMemory) -> PipeResult<StuffContent> {
        let code = &self.header.code;
        match &self.kind {
            OperatorKind::Template { template } => Ok(StuffContent::text(template.render(memory)?)),

            OperatorKind::Llm {
                prompt,
                system_prompt,
                worker,
            } => {
                let request = LlmRequest {
                    pipe_code: code.clone(),
                    prompt: prompt.render(memory)?,
                    system_prompt: system_prompt
                        .as_ref()
                        .map(|t| t.render(memory))
                        .transpose()?,
                    output_concept: self.header.output.code.clone(),
                    structured: expects_json(&self.header.output, ctx.registry()),
                    multiple: self.header.output_multiple,
                };
                let llm = self.resolve_worker(ctx, worker, Worker::into_llm)?;
                let response = self.call_worker(ctx, llm.complete(&request)).await?;
                if let Some(usage) = response.usage {
                    debug!(
                        "Operator {} used {} tokens ({} prompt, {} completion)",
                        code, usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
                    );
                }
                self.content_from_llm(&response.content, ctx.registry())
            }

            OperatorKind::ImageGen {
                prompt,
                worker,
                nb_images,
            } => {
                let request = ImageRequest {
                    pipe_code: code.clone(),
                    prompt: prompt.render(memory)?,
                    count: *nb_images,
                };
                let generator = self.resolve_worker(ctx, worker, Worker::into_image)?;
                let images = self.call_worker(ctx, generator.generate(&request)).await?;
                if images.is_empty() {
                    return Err(self.invalid_output("no image was returned".to_string()));
                }
                let mut items: Vec<StuffContent> = images
                    .into_iter()
                    .map(|image| StuffContent::Image {
                        url: image.url,
                        caption: image.caption,
                    })
                    .collect();
                if self.header.output_multiple {
                    Ok(StuffContent::list(self.header.output.code.clone(), items))
                } else {
                    Ok(items.swap_remove(0))
                }
            }

            OperatorKind::Ocr { worker, document } => {
                let (document_url, kind) = self.document_of(memory, document)?;
                let request = OcrRequest {
                    pipe_code: code.clone(),
                    document_url,
                    kind,
                };
                let ocr = self.resolve_worker(ctx, worker, Worker::into_ocr)?;
                let response = self.call_worker(ctx, ocr.extract(&request)).await?;
                if self.header.output_multiple {
                    let pages = response.pages.into_iter().map(StuffContent::text).collect();
                    Ok(StuffContent::list(self.header.output.code.clone(), pages))
                } else {
                    Ok(StuffContent::text(response.pages.join("\n\n")))
                }
            }
        }
    }

    fn resolve_worker<W>(
        &self,
        ctx: &RunContext,
        handle: &str,
        pick: fn(Worker, &str) -> Result<W, WorkerError>,
    ) -> PipeResult<W> {
        ctx.workers()
            .get_worker(handle)
            .and_then(|worker| pick(worker, handle))
            .map_err(|source| PipeError::OperatorExecution {
                pipe: self.header.code.clone(),
                source,
            })
    }

    /// Await one worker call under the operator semaphore, the deadline, and
    /// the run's cancellation token
    async fn call_worker<T, F>(&self, ctx: &RunContext, call: F) -> PipeResult<T>
    where
        F: Future<Output = Result<T, WorkerError>>,
    {
        let code = &self.header.code;
        let _permit = ctx.acquire_operator_permit(code).await?;
        let deadline = ctx.operator_timeout(self.timeout);

        info!("Calling worker for operator {}", code);
        tokio::select! {
            biased;
            _ = ctx.cancel_token().cancelled() => {
                warn!("Operator {} cancelled while waiting on its worker", code);
                Err(PipeError::Cancelled { pipe: code.clone() })
            }
            result = tokio::time::timeout(deadline, call) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(source)) => {
                    error!("Worker error for operator {}: {}", code, source);
                    Err(PipeError::OperatorExecution {
                        pipe: code.clone(),
                        source,
                    })
                }
                Err(_) => {
                    error!("Timeout for operator {} after {}s", code, deadline.as_secs());
                    Err(PipeError::Timeout {
                        pipe: code.clone(),
                        after: deadline,
                    })
                }
            }
        }
    }

    /// Turn a model answer into content of the declared output
    fn content_from_llm(&self, answer: &str, registry: &ConceptRegistry) -> PipeResult<StuffContent> {
        let output = &self.header.output;
        if !self.header.output_multiple && !expects_json(output, registry) {
            return Ok(StuffContent::text(answer.trim()));
        }

        let value: serde_json::Value = serde_json::from_str(strip_code_fence(answer))
            .map_err(|e| self.invalid_output(format!("expected JSON for '{}': {}", output.code, e)))?;

        if self.header.output_multiple {
            let serde_json::Value::Array(items) = value else {
                return Err(self.invalid_output("expected a JSON array".to_string()));
            };
            let items = items
                .iter()
                .map(|item| StuffContent::from_json(item, output, registry))
                .collect::<PipeResult<Vec<_>>>()
                .map_err(|e| self.invalid_output(e.to_string()))?;
            Ok(StuffContent::list(output.code.clone(), items))
        } else {
            StuffContent::from_json(&value, output, registry)
                .map_err(|e| self.invalid_output(e.to_string()))
        }
    }

    fn document_of(&self, memory: &WorkingMemory, input: &str) -> PipeResult<(String, DocumentKind)> {
        let stuff = memory.lookup(input).ok_or_else(|| PipeError::StuffNotFound {
            name: input.to_string(),
        })?;
        match &stuff.content {
            StuffContent::Image { url, .. } => Ok((url.clone(), DocumentKind::Image)),
            StuffContent::Pdf { url } => Ok((url.clone(), DocumentKind::Pdf)),
            other => Err(PipeError::TypeMismatch {
                name: input.to_string(),
                expected: "native.Image or native.Pdf".to_string(),
                actual: format!("{} ({})", stuff.concept, other.kind()),
            }),
        }
    }

    fn invalid_output(&self, reason: String) -> PipeError {
        PipeError::OperatorExecution {
            pipe: self.header.code.clone(),
            source: WorkerError::InvalidOutput(reason),
        }
    }
}

/// Whether a model must answer with JSON rather than free text
fn expects_json(concept: &Concept, registry: &ConceptRegistry) -> bool {
    !matches!(
        registry.native_root(concept),
        Some(NativeConcept::Text) | Some(NativeConcept::Anything)
    )
}

/// Strip a surrounding markdown code fence (```json ... ```)
fn strip_code_fence(answer: &str) -> &str {
    let trimmed = answer.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
