//! Test: Parallel - forked branches, ordered merge, aggregated failures

use crate::helpers::*;
use pipeworks::core::{PipeError, StuffContent};
use pipeworks::execution::{EngineConfig, ExecutionEvent};
use pipeworks::worker::StaticWorkerRegistry;
use pipeworks::WorkingMemory;
use std::sync::Arc;
use std::time::Duration;

const REVIEW: &str = r#"
domain: review

concepts:
  Verdicts:
    description: "Both reviews side by side"
    structure:
      left: Text
      right: Text

pipes:
  left_writer:
    type: PipeLLM
    inputs:
      topic: Text
    output: Text
    prompt: "Left take on {{ topic }}"

  right_writer:
    type: PipeLLM
    inputs:
      topic: Text
    output: Text
    prompt: "Right take on {{ topic }}"

  both_sides:
    type: PipeParallel
    inputs:
      topic: Text
    output: Text
    output_mode: primary
    primary_result: left
    parallels:
      - pipe: left_writer
        result: left
      - pipe: right_writer
        result: right

  verdicts:
    type: PipeParallel
    inputs:
      topic: Text
    output: Verdicts
    output_mode: aggregate
    parallels:
      - pipe: left_writer
        result: left
      - pipe: right_writer
        result: right
"#;

fn wide_domain(branches: usize) -> String {
    let mut yaml = String::from("domain: wide\npipes:\n");
    for i in 0..branches {
        yaml.push_str(&format!(
            "  writer_{i}:\n    type: PipeLLM\n    output: Text\n    prompt: \"branch {i}\"\n"
        ));
    }
    yaml.push_str("  fan:\n    type: PipeParallel\n    output: Anything\n    output_mode: aggregate\n    parallels:\n");
    for i in 0..branches {
        yaml.push_str(&format!("      - pipe: writer_{i}\n        result: out_{i}\n"));
    }
    yaml
}

#[tokio::test]
async fn test_primary_output_and_merge() {
    let llm = Arc::new(
        MockLlm::new()
            .respond("left_writer", "from the left")
            .respond("right_writer", "from the right"),
    );
    let engine = engine_with_llm(REVIEW, llm.clone());
    let memory = memory_of(vec![text_stuff(&engine, "topic", "tabs")]);

    let output = engine.run_pipe("both_sides", memory).await;

    assert!(output.is_success(), "{:?}", output.error());
    assert_eq!(output.outcome.as_ref().unwrap(), "left");
    assert_eq!(text_of(&output.working_memory, "left"), "from the left");
    assert_eq!(text_of(&output.working_memory, "right"), "from the right");
    assert_eq!(output.working_memory.names(), vec!["topic", "left", "right"]);
    assert_eq!(llm.call_count(), 2);
}

/// Merge order is declaration order whatever order the branches finish in
#[tokio::test]
async fn test_merge_order_under_random_delays() {
    let yaml = wide_domain(6);
    let expected: Vec<String> = (0..6).map(|i| format!("out_{}", i)).collect();

    for _ in 0..5 {
        let llm = Arc::new(MockLlm::new().random_delays(30));
        let engine = engine_with_llm(&yaml, llm);
        let events = record_events(&engine);

        let output = engine.run_pipe("fan", WorkingMemory::new()).await;
        assert!(output.is_success(), "{:?}", output.error());

        let mut names = output.working_memory.names();
        names.retain(|n| n.starts_with("out_"));
        assert_eq!(names, expected);

        let merged: Vec<Vec<String>> = events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::ParallelMerged { results, .. } => Some(results.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(merged, vec![expected.clone()]);

        let StuffContent::Structured { fields } = &output.main_stuff().unwrap().content else {
            panic!("Expected an aggregated record");
        };
        let keys: Vec<&String> = fields.keys().collect();
        assert_eq!(keys, expected.iter().collect::<Vec<_>>());
    }
}

/// One failing branch: the error names only that branch and nothing is merged
#[tokio::test]
async fn test_failing_branch_aggregates_and_merges_nothing() {
    let llm = Arc::new(
        MockLlm::new()
            .respond("left_writer", "fine")
            .fail("right_writer", "boom")
            .delay("left_writer", Duration::from_millis(20)),
    );
    let engine = engine_with_llm(REVIEW, llm.clone());
    let memory = memory_of(vec![text_stuff(&engine, "topic", "tabs")]);

    let output = engine.run_pipe("both_sides", memory).await;

    let error = output.error().expect("run should fail");
    assert!(matches!(error, PipeError::AggregateParallel { pipe, .. } if pipe == "both_sides"));
    assert_eq!(error.failed_branches(), vec!["right_writer"]);
    assert!(error.to_string().contains("boom"));

    // The succeeding branch still ran to completion, but its write stayed in its fork
    assert_eq!(llm.call_count(), 2);
    assert!(!output.working_memory.contains("left"));
    assert!(!output.working_memory.contains("right"));
    assert_eq!(output.working_memory.names(), vec!["topic"]);
}

#[tokio::test]
async fn test_every_failure_is_reported() {
    let llm = Arc::new(
        MockLlm::new()
            .fail("left_writer", "left down")
            .fail("right_writer", "right down"),
    );
    let engine = engine_with_llm(REVIEW, llm);
    let memory = memory_of(vec![text_stuff(&engine, "topic", "tabs")]);

    let output = engine.run_pipe("verdicts", memory).await;

    let error = output.error().expect("run should fail");
    assert_eq!(error.failed_branches(), vec!["left_writer", "right_writer"]);
}

#[tokio::test]
async fn test_aggregate_output_builds_structured_record() {
    let llm = Arc::new(
        MockLlm::new()
            .respond("left_writer", "yes")
            .respond("right_writer", "no"),
    );
    let engine = engine_with_llm(REVIEW, llm);
    let memory = memory_of(vec![text_stuff(&engine, "topic", "tabs")]);

    let output = engine.run_pipe("verdicts", memory).await;

    assert!(output.is_success(), "{:?}", output.error());
    let record = output.main_stuff().unwrap();
    assert_eq!(record.name, "verdicts");
    assert_eq!(record.concept, "review.Verdicts");
    assert_eq!(
        record.content.field(&["left"]),
        Some(&StuffContent::text("yes"))
    );
    assert_eq!(
        record.content.field(&["right"]),
        Some(&StuffContent::text("no"))
    );
}

/// The operator semaphore bounds in-flight worker calls across branches
#[tokio::test]
async fn test_operator_concurrency_is_bounded() {
    let yaml = wide_domain(5);

    let llm = Arc::new(MockLlm::new().random_delays(10));
    let engine = engine_from_yaml(
        &yaml,
        StaticWorkerRegistry::new().with_llm("llm", llm.clone()),
        EngineConfig::default().with_max_concurrent_operators(2),
    );
    let output = engine.run_pipe("fan", WorkingMemory::new()).await;
    assert!(output.is_success(), "{:?}", output.error());
    assert_eq!(llm.call_count(), 5);
    assert!(llm.max_in_flight() <= 2, "saw {} calls in flight", llm.max_in_flight());

    // Every branch sleeps long enough for the others to start
    let llm = Arc::new((0..5).fold(MockLlm::new(), |mock, i| {
        mock.delay(&format!("writer_{}", i), Duration::from_millis(50))
    }));
    let engine = engine_from_yaml(
        &yaml,
        StaticWorkerRegistry::new().with_llm("llm", llm.clone()),
        EngineConfig::default().with_max_concurrent_operators(8),
    );
    let output = engine.run_pipe("fan", WorkingMemory::new()).await;
    assert!(output.is_success(), "{:?}", output.error());
    assert!(llm.max_in_flight() > 1);
}

/// Dropping a run mid fan-out stops the branches it started
#[tokio::test]
async fn test_dropped_run_stops_its_branches() {
    let yaml = wide_domain(3);
    let llm = Arc::new((0..3).fold(MockLlm::new(), |mock, i| {
        mock.delay(&format!("writer_{}", i), Duration::from_millis(100))
    }));
    let engine = engine_from_yaml(
        &yaml,
        StaticWorkerRegistry::new().with_llm("llm", llm.clone()),
        EngineConfig::default().with_max_concurrent_operators(1),
    );

    let run = engine.run_pipe("fan", WorkingMemory::new());
    assert!(tokio::time::timeout(Duration::from_millis(50), run)
        .await
        .is_err());
    let started = llm.call_count();
    assert_eq!(started, 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(llm.call_count(), started);
}
