use super::*;
use crate::indicator::IndicatorRegistry;
use crate::interp::MinirInterpreter;
use crate::page::{StaticDocument, ValueStore};
use crate::runtime::WorkerRuntime;
use serde_json::json;

async fn instance() -> Arc<EnvironmentInstance> {
    let runtime = WorkerRuntime::spawn(MinirInterpreter::new).await.unwrap();
    Arc::new(EnvironmentInstance::new(runtime))
}

fn options(value: serde_json::Value) -> EvaluateOptions {
    EvaluateOptions::default().with_overrides(&value).unwrap()
}

#[test]
fn blanks_need_six_underscores() {
    assert!(contains_blank("x <- ______"));
    assert!(contains_blank("f(__________)"));
    assert!(!contains_blank("my_long_name <- 1"));
    assert!(!contains_blank("_____"));
}

#[tokio::test]
async fn echo_interleaves_source_and_output() {
    let values = Arc::new(ValueStore::new());
    let services = PageServices::default().with_values(values.clone());
    let evaluator = Evaluator::new(
        instance().await,
        EvaluateContext::new("x <- 1 + 1\nx", options(json!({"echo": true, "define": "x"}))),
        services,
    );

    let evaluation = evaluator.process(Vec::new()).await.unwrap();
    assert_eq!(evaluation.state, EvaluationState::Completed);

    let children = evaluation.display.children();
    assert_eq!(children.len(), 2);
    assert!(children[0].has_class("sourceCode"));
    assert_eq!(children[0].text_content(), "x <- 1 + 1\nx\n");
    assert!(children[1].text_content().contains("[1] 2"));

    assert_eq!(evaluation.result, Some(HostValue::Number(2.0)));
    assert_eq!(evaluation.exported, vec!["x".to_string()]);
    assert_eq!(values.get("x"), Some(HostValue::Number(2.0)));
    assert!(evaluator.last_value().await.is_some());
}

#[tokio::test]
async fn eval_off_shows_source_only() {
    let evaluator = Evaluator::new(
        instance().await,
        EvaluateContext::new("stop('never')", options(json!({"eval": false}))),
        PageServices::default(),
    );
    let evaluation = evaluator.process(Vec::new()).await.unwrap();
    assert_eq!(evaluation.state, EvaluationState::SourceOnly);
    assert!(evaluation.display.has_class("sourceCode"));
    assert!(evaluation.capture.is_none());
}

#[tokio::test]
async fn blanks_block_exercise_code() {
    let instance = instance().await;
    let evaluator = Evaluator::new(
        instance.clone(),
        EvaluateContext::new("y <- ______", options(json!({"exercise": "ex1", "envir": "ex1"}))),
        PageServices::default(),
    );
    let evaluation = evaluator.process(Vec::new()).await.unwrap();
    assert_eq!(evaluation.state, EvaluationState::Blocked);
    assert!(evaluation.display.children().is_empty());
    assert!(!instance.contains("ex1-result"));
}

#[tokio::test]
async fn inputs_and_setup_land_in_prep() {
    let document = StaticDocument::new().with_setup("ex1", "offset <- 10");
    let services = PageServices::default().with_document(Arc::new(document));
    let evaluator = Evaluator::new(
        instance().await,
        EvaluateContext::new(
            "n + offset",
            options(json!({"exercise": "ex1", "envir": "ex1"})),
        ),
        services,
    );

    let evaluation = evaluator
        .process(vec![("n".to_string(), BindValue::from(json!(5)))])
        .await
        .unwrap();
    assert_eq!(evaluation.result, Some(HostValue::Number(15.0)));

    let manager = evaluator.manager();
    assert!(manager.lookup("offset", EnvRole::Prep).await.is_ok());
    assert!(matches!(
        manager.lookup("offset", EnvRole::Global).await,
        Err(LiveError::NotFound(_))
    ));
}

#[tokio::test]
async fn user_errors_render_as_callouts() {
    let evaluator = Evaluator::new(
        instance().await,
        EvaluateContext::new("stop('boom')\n1", EvaluateOptions::default()),
        PageServices::default(),
    );
    let evaluation = evaluator.process(Vec::new()).await.unwrap();
    assert_eq!(evaluation.display.find_by_class("callout-important").len(), 1);
    assert!(evaluation.capture.unwrap().first_error().is_some());
}

#[tokio::test]
async fn include_off_skips_evaluation() {
    let evaluator = Evaluator::new(
        instance().await,
        EvaluateContext::new("1", options(json!({"include": false}))),
        PageServices::default(),
    );
    let evaluation = evaluator.process(Vec::new()).await.unwrap();
    assert_eq!(evaluation.state, EvaluationState::Skipped);
    assert!(evaluator.last_value().await.is_none());
}

#[tokio::test]
async fn asis_output_is_raw() {
    let evaluator = Evaluator::new(
        instance().await,
        EvaluateContext::new("\"<b>bold</b>\"", options(json!({"output": "asis"}))),
        PageServices::default(),
    );
    let evaluation = evaluator.process(Vec::new()).await.unwrap();
    assert_eq!(evaluation.display.to_html(), "<div><b>bold</b></div>");
}

#[tokio::test]
async fn missing_exports_are_skipped() {
    let values = Arc::new(ValueStore::new());
    let evaluator = Evaluator::new(
        instance().await,
        EvaluateContext::new("a <- 1", options(json!({"define": ["a", "b"]}))),
        PageServices::default().with_values(values.clone()),
    );
    let evaluation = evaluator.process(Vec::new()).await.unwrap();
    assert_eq!(evaluation.exported, vec!["a".to_string()]);
    assert_eq!(values.names(), vec!["a".to_string()]);
}

#[tokio::test]
async fn indicator_is_released_after_each_call() {
    let registry = IndicatorRegistry::new();
    let services = PageServices { indicators: registry.clone(), ..PageServices::default() };
    let evaluator = Evaluator::new(
        instance().await,
        EvaluateContext::new("stop('x')", options(json!({"error": false}))),
        services,
    );
    assert!(matches!(
        evaluator.process(Vec::new()).await,
        Err(LiveError::Evaluation(_))
    ));
    assert!(!registry.is_busy());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn rerun_replaces_retained_value() {
    let instance = instance().await;
    let evaluator = Evaluator::new(instance.clone(), EvaluateContext::new("3", EvaluateOptions::default()), PageServices::default());
    evaluator.process(Vec::new()).await.unwrap();
    let first = evaluator.last_value().await.unwrap();
    evaluator.process(Vec::new()).await.unwrap();
    let second = evaluator.last_value().await.unwrap();
    assert_ne!(first, second);
    assert!(matches!(
        instance.runtime().describe(first).await,
        Err(RuntimeError::AlreadyReleased(_))
    ));
    evaluator.close().await.unwrap();
    assert!(evaluator.last_value().await.is_none());
}
