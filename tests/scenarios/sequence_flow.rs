//! Test: Sequence - steps share one scope and run in order

use crate::helpers::*;
use pipeworks::core::{ExecutionStatus, PipeError};
use pipeworks::execution::ExecutionEvent;
use pipeworks::worker::WorkerError;
use pipeworks::WorkingMemory;
use std::sync::Arc;

const WRITING: &str = r#"
domain: writing

concepts:
  Draft: "A first version of a text"

pipes:
  write:
    type: PipeLLM
    output: Draft
    prompt: "Write a short paragraph about pipes."

  polish:
    type: PipeLLM
    inputs:
      draft: Draft
    output: Text
    system_prompt: "You are a careful editor."
    prompt: "Polish this: {{ draft }}"

  shout:
    type: PipeJinja2
    inputs:
      final: Text
    output: Text
    jinja2: "{{ final }}!"

  write_and_polish:
    type: PipeSequence
    output: Text
    steps:
      - pipe: write
        result: draft
      - pipe: polish
        result: final

  three_steps:
    type: PipeSequence
    output: Text
    steps:
      - pipe: write
        result: draft
      - pipe: polish
        result: final
      - pipe: shout
        result: loud
"#;

/// Two operators, no pre-seeded memory: memory ends with exactly draft and final
#[tokio::test]
async fn test_sequence_of_two_operators() {
    let llm = Arc::new(
        MockLlm::new()
            .respond("write", "pipes carry water")
            .respond("polish", "Pipes carry water."),
    );
    let engine = engine_with_llm(WRITING, llm.clone());

    let output = engine
        .run_pipe("write_and_polish", WorkingMemory::new())
        .await;

    assert!(output.is_success(), "{:?}", output.error());
    assert_eq!(output.outcome.as_ref().unwrap(), "final");
    assert_eq!(output.working_memory.names(), vec!["draft", "final"]);
    assert_eq!(text_of(&output.working_memory, "draft"), "pipes carry water");
    assert_eq!(text_of(&output.working_memory, "final"), "Pipes carry water.");
    assert_eq!(
        output.working_memory.lookup("draft").unwrap().concept,
        "writing.Draft"
    );

    // The second prompt saw the first step's output
    let requests = llm.requests();
    assert_eq!(llm.called_codes(), vec!["write", "polish"]);
    assert_eq!(requests[1].prompt, "Polish this: pipes carry water");
    assert_eq!(
        requests[1].system_prompt.as_deref(),
        Some("You are a careful editor.")
    );
    assert!(!requests[1].structured);
}

#[tokio::test]
async fn test_sequence_fails_fast_with_the_step_error() {
    let llm = Arc::new(MockLlm::new().fail("polish", "model overloaded"));
    let engine = engine_with_llm(WRITING, llm.clone());
    let events = record_events(&engine);

    let output = engine.run_pipe("three_steps", WorkingMemory::new()).await;

    match output.error() {
        Some(PipeError::OperatorExecution { pipe, source }) => {
            assert_eq!(pipe, "polish");
            assert!(matches!(source, WorkerError::Api(message) if message == "model overloaded"));
        }
        other => panic!("Expected operator error, got {:?}", other),
    }
    assert_eq!(output.state.status, ExecutionStatus::Failed);

    // The third step never ran; the first step's output stays visible
    assert_eq!(llm.called_codes(), vec!["write", "polish"]);
    assert!(output.working_memory.contains("draft"));
    assert!(!output.working_memory.contains("loud"));

    let events = events.lock().unwrap();
    assert!(!events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::PipeStarted { pipe_code, .. } if pipe_code == "shout")));
    assert!(events.iter().any(
        |e| matches!(e, ExecutionEvent::PipeFailed { pipe_code, .. } if pipe_code == "three_steps")
    ));
}

#[tokio::test]
async fn test_sequence_mixes_operators_and_templates() {
    let llm = Arc::new(MockLlm::new().respond("polish", "done"));
    let engine = engine_with_llm(WRITING, llm);

    let output = engine.run_pipe("three_steps", WorkingMemory::new()).await;

    assert!(output.is_success(), "{:?}", output.error());
    assert_eq!(output.outcome.as_ref().unwrap(), "loud");
    assert_eq!(text_of(&output.working_memory, "loud"), "done!");
    assert_eq!(output.main_stuff().unwrap().name, "loud");
}

#[tokio::test]
async fn test_preseeded_name_collision_is_a_duplicate() {
    let llm = Arc::new(MockLlm::new());
    let engine = engine_with_llm(WRITING, llm);
    let memory = memory_of(vec![text_stuff(&engine, "final", "already here")]);

    let output = engine.run_pipe("write_and_polish", memory).await;

    assert!(matches!(
        output.error(),
        Some(PipeError::DuplicateStuff { name }) if name == "final"
    ));
    assert_eq!(text_of(&output.working_memory, "final"), "already here");
}
