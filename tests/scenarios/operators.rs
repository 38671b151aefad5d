//! Test: operators - structured answers, images, OCR, worker lookup

use crate::helpers::*;
use pipeworks::core::{NativeConcept, PipeError, Stuff, StuffContent};
use pipeworks::execution::EngineConfig;
use pipeworks::worker::{StaticWorkerRegistry, WorkerError};
use pipeworks::{PipeEngine, WorkingMemory};
use std::sync::Arc;

const KITCHEN: &str = r#"
domain: kitchen

concepts:
  Dish: "Name of a dish"
  Recipe:
    description: "A recipe card"
    structure:
      name: Text
      servings: Number

pipes:
  recipe:
    type: PipeLLM
    inputs:
      dish: Dish
    output: Recipe
    prompt: "Recipe for {{ dish }}"

  ideas:
    type: PipeLLM
    output: Dish[]
    prompt: "Suggest dishes"

  cover:
    type: PipeImgGen
    inputs:
      dish: Dish
    output: Image[]
    prompt: "A photo of {{ dish }}"
    nb_images: 3

  read_menu:
    type: PipeOcr
    inputs:
      scan: Image
    output: Text

  ask_elsewhere:
    type: PipeLLM
    output: Text
    prompt: "Hello"
    llm: somewhere_else

  ask_painter:
    type: PipeLLM
    output: Text
    prompt: "Hello"
    llm: img_gen
"#;

fn kitchen_engine(llm: Arc<MockLlm>, images: Arc<MockImages>) -> PipeEngine {
    engine_from_yaml(
        KITCHEN,
        StaticWorkerRegistry::new()
            .with_llm("llm", llm)
            .with_image("img_gen", images)
            .with_ocr(
                "ocr",
                Arc::new(MockOcr {
                    pages: vec!["Soup 4.50".to_string(), "Bread 2.00".to_string()],
                }),
            ),
        EngineConfig::default(),
    )
}

fn dish(engine: &PipeEngine, value: &str) -> Stuff {
    let registry = engine.library().registry();
    let concept = registry.resolve("kitchen.Dish").unwrap();
    Stuff::new("dish", &concept, StuffContent::text(value), registry).unwrap()
}

#[tokio::test]
async fn test_structured_answer_in_code_fence() {
    let llm = Arc::new(MockLlm::new().respond(
        "recipe",
        "```json\n{\"name\": \"Leek soup\", \"servings\": 4}\n```",
    ));
    let engine = kitchen_engine(llm.clone(), Arc::default());
    let memory = memory_of(vec![dish(&engine, "leek soup")]);

    let output = engine.run_pipe("recipe", memory).await;

    assert!(output.is_success(), "{:?}", output.error());
    let recipe = output.main_stuff().unwrap();
    assert_eq!(recipe.concept, "kitchen.Recipe");
    assert_eq!(recipe.content.field(&["name"]), Some(&StuffContent::text("Leek soup")));
    assert_eq!(recipe.content.field(&["servings"]), Some(&StuffContent::number(4.0)));

    let request = &llm.requests()[0];
    assert!(request.structured);
    assert!(!request.multiple);
    assert_eq!(request.output_concept, "kitchen.Recipe");
    assert_eq!(request.prompt, "Recipe for leek soup");
}

#[tokio::test]
async fn test_answer_missing_a_field_is_invalid_output() {
    let llm = Arc::new(MockLlm::new().respond("recipe", "{\"name\": \"Leek soup\"}"));
    let engine = kitchen_engine(llm, Arc::default());
    let memory = memory_of(vec![dish(&engine, "leek soup")]);

    let output = engine.run_pipe("recipe", memory).await;

    match output.error() {
        Some(PipeError::OperatorExecution { pipe, source }) => {
            assert_eq!(pipe, "recipe");
            assert!(matches!(source, WorkerError::InvalidOutput(reason) if reason.contains("servings")));
        }
        other => panic!("Expected invalid output, got {:?}", other),
    }
    assert!(!output.working_memory.contains("recipe"));
}

#[tokio::test]
async fn test_list_output_from_json_array() {
    let llm = Arc::new(MockLlm::new().respond("ideas", r#"["soup", "stew", "pie"]"#));
    let engine = kitchen_engine(llm.clone(), Arc::default());

    let output = engine.run_pipe("ideas", WorkingMemory::new()).await;

    assert!(output.is_success(), "{:?}", output.error());
    let ideas = output.main_stuff().unwrap();
    assert!(ideas.is_list());
    assert_eq!(ideas.concept, "kitchen.Dish");
    let items: Vec<String> = ideas
        .items()
        .unwrap()
        .iter()
        .map(|item| item.content.render())
        .collect();
    assert_eq!(items, vec!["soup", "stew", "pie"]);
    assert!(llm.requests()[0].multiple);
}

#[tokio::test]
async fn test_image_generation_fills_a_list() {
    let images = Arc::new(MockImages::default());
    let engine = kitchen_engine(Arc::new(MockLlm::new()), images.clone());
    let memory = memory_of(vec![dish(&engine, "pie")]);

    let output = engine.run_pipe("cover", memory).await;

    assert!(output.is_success(), "{:?}", output.error());
    let cover = output.main_stuff().unwrap();
    let StuffContent::List { items, .. } = &cover.content else {
        panic!("Expected a list of images, got {:?}", cover.content);
    };
    assert_eq!(items.len(), 3);
    assert_eq!(
        items[0],
        StuffContent::Image {
            url: "mock://cover/0.png".to_string(),
            caption: Some("A photo of pie".to_string()),
        }
    );

    let requests = images.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].count, 3);
}

#[tokio::test]
async fn test_ocr_joins_pages() {
    let engine = kitchen_engine(Arc::new(MockLlm::new()), Arc::default());
    let registry = engine.library().registry();
    let scan = Stuff::new(
        "scan",
        &registry.native(NativeConcept::Image),
        StuffContent::image("file:///menu.png"),
        registry,
    )
    .unwrap();

    let output = engine.run_pipe("read_menu", memory_of(vec![scan])).await;

    assert!(output.is_success(), "{:?}", output.error());
    assert_eq!(
        text_of(&output.working_memory, "read_menu"),
        "Soup 4.50\n\nBread 2.00"
    );
}

#[tokio::test]
async fn test_unknown_worker_handle() {
    let llm = Arc::new(MockLlm::new());
    let engine = kitchen_engine(llm.clone(), Arc::default());

    let output = engine.run_pipe("ask_elsewhere", WorkingMemory::new()).await;

    match output.error() {
        Some(PipeError::OperatorExecution { pipe, source }) => {
            assert_eq!(pipe, "ask_elsewhere");
            assert!(matches!(source, WorkerError::UnknownWorker(handle) if handle == "somewhere_else"));
        }
        other => panic!("Expected unknown worker, got {:?}", other),
    }
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn test_worker_of_the_wrong_kind() {
    let engine = kitchen_engine(Arc::new(MockLlm::new()), Arc::default());

    let output = engine.run_pipe("ask_painter", WorkingMemory::new()).await;

    assert!(matches!(
        output.error(),
        Some(PipeError::OperatorExecution {
            source: WorkerError::WrongKind { .. },
            ..
        })
    ));
    assert!(!output.error().unwrap().is_retryable());
}
