//! Test: dry runs - placeholder data, every branch walked, no worker calls

use crate::helpers::*;
use pipeworks::core::PipeError;
use pipeworks::execution::DryRunStatus;
use std::sync::Arc;

const NEWSROOM: &str = r#"
domain: newsroom

concepts:
  Story:
    description: "A news story"
    structure:
      title: Text
      words: Number

pipes:
  write:
    type: PipeLLM
    inputs:
      category: Text
    output: Story
    prompt: "Write a {{ category }} story"

  headline:
    type: PipeJinja2
    inputs:
      story: Story
    output: Text
    jinja2: "{{ story.title }} ({{ story.words }} words)"

  publish:
    type: PipeSequence
    inputs:
      category: Text
    output: Text
    steps:
      - pipe: write
        result: story
      - pipe: headline
        result: title

  needs_extra:
    type: PipeLLM
    inputs:
      extra: Text
    output: Text
    prompt: "Use {{ extra }}"

  picky:
    type: PipeCondition
    inputs:
      category: Text
    output: Text
    expression: "category"
    pipe_map:
      sports: publish
      politics: needs_extra

  route:
    type: PipeCondition
    inputs:
      category: Text
    output: Text
    expression: "category"
    pipe_map:
      sports: publish
      weather: ghost
"#;

#[tokio::test]
async fn test_dry_run_reports_each_pipe_without_calling_workers() {
    let llm = Arc::new(MockLlm::new());
    let engine = engine_with_llm(NEWSROOM, llm.clone());

    let mut seen = Vec::new();
    let report = engine
        .dry_run_pipes_with_progress(false, |code, _| seen.push(code.to_string()))
        .await
        .unwrap();

    let codes: Vec<&String> = report.keys().collect();
    assert_eq!(
        codes,
        vec!["write", "headline", "publish", "needs_extra", "picky", "route"]
    );
    assert_eq!(seen, vec!["write", "headline", "publish", "needs_extra", "picky", "route"]);

    for code in ["write", "headline", "publish", "needs_extra"] {
        assert_eq!(report[code].status, DryRunStatus::Success, "{}", code);
        assert!(report[code].error_message.is_none());
    }
    assert_eq!(llm.call_count(), 0);
}

/// A dangling branch fails only the condition that names it
#[tokio::test]
async fn test_dangling_branch_fails_only_its_condition() {
    let engine = engine_with_llm(NEWSROOM, Arc::new(MockLlm::new()));

    let report = engine.dry_run_pipes(false).await.unwrap();

    let route = &report["route"];
    assert_eq!(route.status, DryRunStatus::Failure);
    assert!(route.error_message.as_deref().unwrap().contains("ghost"));
    assert!(report["publish"].is_success());
}

/// Branches that were not chosen are still exercised
#[tokio::test]
async fn test_unchosen_branches_are_exercised() {
    let engine = engine_with_llm(NEWSROOM, Arc::new(MockLlm::new()));

    let report = engine.dry_run_pipes(false).await.unwrap();

    let picky = &report["picky"];
    assert_eq!(picky.status, DryRunStatus::Failure);
    assert!(picky.error_message.as_deref().unwrap().contains("extra"));
}

#[tokio::test]
async fn test_raise_on_failure_lists_failed_pipes() {
    let llm = Arc::new(MockLlm::new());
    let engine = engine_with_llm(NEWSROOM, llm.clone());

    let result = engine.dry_run_pipes(true).await;

    match result {
        Err(PipeError::DryRunFailed { failed }) => assert_eq!(failed, vec!["picky", "route"]),
        other => panic!("Expected DryRunFailed, got {:?}", other),
    }
    assert_eq!(llm.call_count(), 0);
}

/// A live run of the same condition takes the matching branch only
#[tokio::test]
async fn test_live_run_of_dry_run_failure_can_succeed() {
    let llm = Arc::new(MockLlm::new().respond("write", r#"{"title": "Derby day", "words": 300}"#));
    let engine = engine_with_llm(NEWSROOM, llm.clone());
    let memory = memory_of(vec![text_stuff(&engine, "category", "sports")]);

    let output = engine.run_pipe("picky", memory).await;

    assert!(output.is_success(), "{:?}", output.error());
    assert_eq!(text_of(&output.working_memory, "title"), "Derby day (300 words)");
    assert_eq!(llm.called_codes(), vec!["write"]);
    assert!(llm.requests()[0].structured);
}
