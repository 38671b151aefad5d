//! Test: SubPipe - isolated child scope, renamed inputs, single result

use crate::helpers::*;
use pipeworks::core::PipeError;
use std::sync::Arc;

const ARTICLES: &str = r#"
domain: articles

pipes:
  outline:
    type: PipeLLM
    inputs:
      subject: Text
    output: Text
    prompt: "Outline about {{ subject }}"

  write_article:
    type: PipeLLM
    inputs:
      outline: Text
    output: Text
    prompt: "Expand: {{ outline }}"

  outline_then_write:
    type: PipeSequence
    inputs:
      subject: Text
    output: Text
    steps:
      - pipe: outline
        result: outline
      - pipe: write_article
        result: article

  article_for:
    type: PipeSubPipe
    inputs:
      topic: Text
    output: Text
    pipe: outline_then_write
    result: article
    inputs_from:
      subject: topic

  article_then_title:
    type: PipeSequence
    inputs:
      topic: Text
    output: Text
    steps:
      - pipe: article_for
        result: body
      - pipe: title
        result: headline

  title:
    type: PipeJinja2
    inputs:
      body: Text
    output: Text
    jinja2: "Title of {{ body }}"
"#;

/// Only the child's result comes back; its intermediates are discarded
#[tokio::test]
async fn test_child_intermediates_are_discarded() {
    let llm = Arc::new(
        MockLlm::new()
            .respond("outline", "1. pipes 2. fittings")
            .respond("write_article", "A long article"),
    );
    let engine = engine_with_llm(ARTICLES, llm.clone());
    let memory = memory_of(vec![text_stuff(&engine, "topic", "plumbing")]);

    let output = engine.run_pipe("article_for", memory).await;

    assert!(output.is_success(), "{:?}", output.error());
    assert_eq!(output.outcome.as_ref().unwrap(), "article");
    assert_eq!(output.working_memory.names(), vec!["topic", "article"]);
    assert_eq!(text_of(&output.working_memory, "article"), "A long article");
    assert!(!output.working_memory.contains("outline"));
    assert!(!output.working_memory.contains("subject"));

    // The caller's topic reached the child as its `subject` input
    assert_eq!(llm.requests()[0].prompt, "Outline about plumbing");
    assert_eq!(llm.called_codes(), vec!["outline", "write_article"]);
}

#[tokio::test]
async fn test_sub_pipe_result_feeds_later_steps() {
    let llm = Arc::new(MockLlm::new().respond("write_article", "pipes"));
    let engine = engine_with_llm(ARTICLES, llm);
    let memory = memory_of(vec![text_stuff(&engine, "topic", "plumbing")]);

    let output = engine.run_pipe("article_then_title", memory).await;

    assert!(output.is_success(), "{:?}", output.error());
    assert_eq!(output.outcome.as_ref().unwrap(), "headline");
    assert_eq!(text_of(&output.working_memory, "body"), "pipes");
    assert_eq!(text_of(&output.working_memory, "headline"), "Title of pipes");
    assert!(!output.working_memory.contains("outline"));
}

#[tokio::test]
async fn test_child_failure_propagates() {
    let llm = Arc::new(MockLlm::new().fail("write_article", "no tokens left"));
    let engine = engine_with_llm(ARTICLES, llm);
    let memory = memory_of(vec![text_stuff(&engine, "topic", "plumbing")]);

    let output = engine.run_pipe("article_for", memory).await;

    assert!(matches!(
        output.error(),
        Some(PipeError::OperatorExecution { pipe, .. }) if pipe == "write_article"
    ));
    assert_eq!(output.working_memory.names(), vec!["topic"]);
}

#[tokio::test]
async fn test_missing_caller_input() {
    let engine = engine_with_llm(ARTICLES, Arc::new(MockLlm::new()));
    let memory = memory_of(vec![text_stuff(&engine, "subject", "plumbing")]);

    let output = engine.run_pipe("article_for", memory).await;

    assert!(matches!(
        output.error(),
        Some(PipeError::StuffNotFound { name }) if name == "topic"
    ));
}
