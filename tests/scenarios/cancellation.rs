//! Test: deadlines and cooperative cancellation

use crate::helpers::*;
use pipeworks::core::{ExecutionStatus, PipeError};
use pipeworks::execution::EngineConfig;
use pipeworks::worker::StaticWorkerRegistry;
use pipeworks::WorkingMemory;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const SLOW: &str = r#"
domain: slow

pipes:
  ponder:
    type: PipeLLM
    output: Text
    prompt: "Think hard"
    timeout_secs: 1

  ramble:
    type: PipeLLM
    output: Text
    prompt: "Go on"

  quick:
    type: PipeLLM
    output: Text
    prompt: "Be brief"

  both:
    type: PipeParallel
    output: Text
    output_mode: primary
    primary_result: long
    parallels:
      - pipe: ramble
        result: long
      - pipe: quick
        result: short
"#;

#[tokio::test]
async fn test_operator_timeout_is_retryable() {
    let llm = Arc::new(MockLlm::new().delay("ponder", Duration::from_secs(3)));
    let engine = engine_with_llm(SLOW, llm);

    let started = Instant::now();
    let output = engine.run_pipe("ponder", WorkingMemory::new()).await;

    let error = output.error().expect("run should time out");
    assert!(matches!(
        error,
        PipeError::Timeout { pipe, after } if pipe == "ponder" && *after == Duration::from_secs(1)
    ));
    assert!(error.is_retryable());
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(output.state.status, ExecutionStatus::Failed);
    assert!(output.working_memory.is_empty());
}

#[tokio::test]
async fn test_engine_default_timeout_applies() {
    let llm = Arc::new(MockLlm::new().delay("ramble", Duration::from_secs(3)));
    let engine = engine_from_yaml(
        SLOW,
        StaticWorkerRegistry::new().with_llm("llm", llm),
        EngineConfig::default().with_operator_timeout_secs(1),
    );

    let output = engine.run_pipe("ramble", WorkingMemory::new()).await;

    assert!(matches!(
        output.error(),
        Some(PipeError::Timeout { pipe, .. }) if pipe == "ramble"
    ));
}

#[tokio::test]
async fn test_cancel_stops_a_waiting_operator() {
    let llm = Arc::new(MockLlm::new().delay("ramble", Duration::from_secs(5)));
    let engine = engine_with_llm(SLOW, llm);

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let output = engine
        .run_pipe_with_cancel("ramble", WorkingMemory::new(), token)
        .await;

    assert!(output.error().unwrap().is_cancelled());
    assert_eq!(output.state.status, ExecutionStatus::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
}

/// Cancelling mid fan-out discards every branch, finished or not
#[tokio::test]
async fn test_cancel_during_parallel_merges_nothing() {
    let llm = Arc::new(MockLlm::new().delay("ramble", Duration::from_secs(5)));
    let engine = engine_with_llm(SLOW, llm.clone());

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let output = engine
        .run_pipe_with_cancel("both", WorkingMemory::new(), token)
        .await;

    assert!(matches!(
        output.error(),
        Some(PipeError::Cancelled { pipe }) if pipe == "both"
    ));
    assert_eq!(output.state.status, ExecutionStatus::Cancelled);
    assert!(output.working_memory.is_empty());
    assert_eq!(llm.call_count(), 2);
}

#[tokio::test]
async fn test_cancelled_before_start_calls_nothing() {
    let llm = Arc::new(MockLlm::new());
    let engine = engine_with_llm(SLOW, llm.clone());

    let token = CancellationToken::new();
    token.cancel();
    let output = engine
        .run_pipe_with_cancel("quick", WorkingMemory::new(), token)
        .await;

    assert_eq!(output.state.status, ExecutionStatus::Cancelled);
    assert_eq!(llm.call_count(), 0);
}
