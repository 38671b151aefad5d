//! Test utilities: mock workers and engine builders

use async_trait::async_trait;
use pipeworks::core::config::DomainConfig;
use pipeworks::core::{NativeConcept, PipeLibrary, Stuff, StuffContent, WorkingMemory};
use pipeworks::execution::{EngineConfig, ExecutionEvent, PipeEngine};
use pipeworks::worker::{
    GeneratedImage, ImageRequest, ImageWorker, LlmRequest, LlmResponse, LlmWorker, OcrRequest,
    OcrResponse, OcrWorker, StaticWorkerRegistry, WorkerError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock language model scripted per pipe code
///
/// Unscripted pipes answer `"<pipe_code> output"`.
#[derive(Default)]
pub struct MockLlm {
    responses: HashMap<String, String>,
    failures: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    /// Upper bound for a random per-call delay, in milliseconds
    random_delay_ms: Option<u64>,
    requests: Mutex<Vec<LlmRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, pipe_code: &str, answer: &str) -> Self {
        self.responses.insert(pipe_code.to_string(), answer.to_string());
        self
    }

    pub fn fail(mut self, pipe_code: &str, message: &str) -> Self {
        self.failures.insert(pipe_code.to_string(), message.to_string());
        self
    }

    pub fn delay(mut self, pipe_code: &str, delay: Duration) -> Self {
        self.delays.insert(pipe_code.to_string(), delay);
        self
    }

    pub fn random_delays(mut self, max_ms: u64) -> Self {
        self.random_delay_ms = Some(max_ms);
        self
    }

    /// Every request received, in arrival order
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn called_codes(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.pipe_code).collect()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Highest number of calls observed in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn delay_for(&self, pipe_code: &str) -> Option<Duration> {
        if let Some(delay) = self.delays.get(pipe_code) {
            return Some(*delay);
        }
        self.random_delay_ms.map(|max| {
            let noise = uuid::Uuid::new_v4().as_u128() as u64;
            Duration::from_millis(noise % (max + 1))
        })
    }
}

#[async_trait]
impl LlmWorker for MockLlm {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, WorkerError> {
        self.requests.lock().unwrap().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay_for(&request.pipe_code) {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(message) = self.failures.get(&request.pipe_code) {
            return Err(WorkerError::Api(message.clone()));
        }
        let answer = self
            .responses
            .get(&request.pipe_code)
            .cloned()
            .unwrap_or_else(|| format!("{} output", request.pipe_code));
        Ok(LlmResponse::new(answer))
    }
}

/// Image generator returning numbered fake urls
#[derive(Default)]
pub struct MockImages {
    requests: Mutex<Vec<ImageRequest>>,
}

impl MockImages {
    pub fn requests(&self) -> Vec<ImageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageWorker for MockImages {
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<GeneratedImage>, WorkerError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok((0..request.count)
            .map(|i| GeneratedImage {
                url: format!("mock://{}/{}.png", request.pipe_code, i),
                caption: Some(request.prompt.clone()),
            })
            .collect())
    }
}

/// OCR engine returning fixed pages
pub struct MockOcr {
    pub pages: Vec<String>,
}

#[async_trait]
impl OcrWorker for MockOcr {
    async fn extract(&self, _request: &OcrRequest) -> Result<OcrResponse, WorkerError> {
        Ok(OcrResponse {
            pages: self.pages.clone(),
        })
    }
}

/// Build an engine from one domain document
pub fn engine_from_yaml(
    yaml: &str,
    workers: StaticWorkerRegistry,
    config: EngineConfig,
) -> PipeEngine {
    let domain = DomainConfig::from_yaml(yaml).unwrap();
    let mut library = PipeLibrary::new();
    library.load_domain(&domain).unwrap();
    PipeEngine::new(library, Arc::new(workers), config).unwrap()
}

/// Engine whose default `llm` handle is the given mock
pub fn engine_with_llm(yaml: &str, llm: Arc<MockLlm>) -> PipeEngine {
    engine_from_yaml(
        yaml,
        StaticWorkerRegistry::new().with_llm("llm", llm),
        EngineConfig::default(),
    )
}

/// Collect every event the engine emits
pub fn record_events(engine: &PipeEngine) -> Arc<Mutex<Vec<ExecutionEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));
    events
}

pub fn text_stuff(engine: &PipeEngine, name: &str, text: &str) -> Stuff {
    let registry = engine.library().registry();
    Stuff::new(
        name,
        &registry.native(NativeConcept::Text),
        StuffContent::text(text),
        registry,
    )
    .unwrap()
}

pub fn number_stuff(engine: &PipeEngine, name: &str, value: f64) -> Stuff {
    let registry = engine.library().registry();
    Stuff::new(
        name,
        &registry.native(NativeConcept::Number),
        StuffContent::number(value),
        registry,
    )
    .unwrap()
}

pub fn memory_of(stuffs: Vec<Stuff>) -> WorkingMemory {
    WorkingMemory::from_stuffs(stuffs).unwrap()
}

/// Text content bound under `name`
pub fn text_of(memory: &WorkingMemory, name: &str) -> String {
    memory
        .lookup(name)
        .unwrap_or_else(|| panic!("'{}' is not in memory", name))
        .content
        .as_text()
        .unwrap_or_else(|| panic!("'{}' is not text", name))
        .to_string()
}
