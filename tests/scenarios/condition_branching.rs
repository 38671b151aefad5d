//! Test: Condition - exactly one branch, exact key before default

use crate::helpers::*;
use pipeworks::core::PipeError;
use pipeworks::execution::ExecutionEvent;
use std::sync::Arc;

const ROUTING: &str = r#"
domain: routing

pipes:
  positive:
    type: PipeJinja2
    inputs:
      x: Number
    output: Text
    jinja2: "{{ x }} is positive"

  non_positive:
    type: PipeJinja2
    inputs:
      x: Number
    output: Text
    jinja2: "{{ x }} is not positive"

  sign_check:
    type: PipeCondition
    inputs:
      x: Number
    output: Text
    expression: "x > 0"
    pipe_map:
      "true": positive

  sign_or_continue:
    type: PipeCondition
    inputs:
      x: Number
    output: Anything
    expression: "x > 0"
    pipe_map:
      "true": positive
      "false": continue

  news_desk:
    type: PipeLLM
    inputs:
      category: Text
    output: Text
    prompt: "News about {{ category }}"

  sports_desk:
    type: PipeLLM
    inputs:
      category: Text
    output: Text
    prompt: "Sports about {{ category }}"

  general_desk:
    type: PipeLLM
    inputs:
      category: Text
    output: Text
    prompt: "Anything about {{ category }}"

  dispatch:
    type: PipeCondition
    inputs:
      category: Text
    output: Text
    expression: "{{ category }}"
    pipe_map:
      news: news_desk
      sports: sports_desk
    default_pipe_code: general_desk
"#;

#[tokio::test]
async fn test_true_branch_runs() {
    let engine = engine_with_llm(ROUTING, Arc::new(MockLlm::new()));
    let events = record_events(&engine);
    let memory = memory_of(vec![number_stuff(&engine, "x", 5.0)]);

    let output = engine.run_pipe("sign_check", memory).await;

    assert!(output.is_success(), "{:?}", output.error());
    assert_eq!(output.outcome.as_ref().unwrap(), "positive");
    assert_eq!(text_of(&output.working_memory, "positive"), "5 is positive");

    let events = events.lock().unwrap();
    let chosen: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::BranchChosen {
                pipe_code,
                evaluated_expression,
                chosen_pipe_code,
            } => Some((
                pipe_code.as_str(),
                evaluated_expression.as_str(),
                chosen_pipe_code.as_str(),
            )),
            _ => None,
        })
        .collect();
    assert_eq!(chosen, vec![("sign_check", "true", "positive")]);
}

#[tokio::test]
async fn test_no_key_and_no_default_is_an_error() {
    let engine = engine_with_llm(ROUTING, Arc::new(MockLlm::new()));
    let memory = memory_of(vec![number_stuff(&engine, "x", -1.0)]);

    let output = engine.run_pipe("sign_check", memory).await;

    assert!(matches!(
        output.error(),
        Some(PipeError::NoMatchingBranch { pipe, evaluated })
            if pipe == "sign_check" && evaluated == "false"
    ));
    assert_eq!(output.working_memory.names(), vec!["x"]);
}

#[tokio::test]
async fn test_exact_key_wins_over_default() {
    let llm = Arc::new(MockLlm::new());
    let engine = engine_with_llm(ROUTING, llm.clone());
    let memory = memory_of(vec![text_stuff(&engine, "category", "sports")]);

    let output = engine.run_pipe("dispatch", memory).await;

    assert!(output.is_success(), "{:?}", output.error());
    assert_eq!(llm.called_codes(), vec!["sports_desk"]);
    assert_eq!(llm.requests()[0].prompt, "Sports about sports");
}

#[tokio::test]
async fn test_default_when_no_key_matches() {
    let llm = Arc::new(MockLlm::new().respond("general_desk", "sunny"));
    let engine = engine_with_llm(ROUTING, llm.clone());
    let memory = memory_of(vec![text_stuff(&engine, "category", "weather")]);

    let output = engine.run_pipe("dispatch", memory).await;

    assert!(output.is_success(), "{:?}", output.error());
    assert_eq!(llm.called_codes(), vec!["general_desk"]);
    assert_eq!(text_of(&output.working_memory, "general_desk"), "sunny");
}

/// `continue` leaves memory alone and passes the main stuff through
#[tokio::test]
async fn test_continue_target_passes_through() {
    let engine = engine_with_llm(ROUTING, Arc::new(MockLlm::new()));
    let events = record_events(&engine);
    let memory = memory_of(vec![number_stuff(&engine, "x", 0.0)]);

    let output = engine.run_pipe("sign_or_continue", memory).await;

    assert!(output.is_success(), "{:?}", output.error());
    assert_eq!(output.outcome.as_ref().unwrap(), "x");
    assert_eq!(output.working_memory.names(), vec!["x"]);
    assert!(events.lock().unwrap().iter().any(|e| matches!(
        e,
        ExecutionEvent::BranchChosen { chosen_pipe_code, .. } if chosen_pipe_code == "continue"
    )));
}

#[tokio::test]
async fn test_missing_expression_input() {
    let engine = engine_with_llm(ROUTING, Arc::new(MockLlm::new()));

    let output = engine
        .run_pipe("dispatch", pipeworks::WorkingMemory::new())
        .await;

    assert!(matches!(
        output.error(),
        Some(PipeError::StuffNotFound { name }) if name == "category"
    ));
}
