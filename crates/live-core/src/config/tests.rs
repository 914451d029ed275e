use super::*;
use crate::environment::DiscardPolicy;
use crate::evaluator::OutputMode;
use crate::runtime::RuntimeKind;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn empty_config_uses_defaults() {
    let config = ConfigLoader::from_str("{}").unwrap();
    assert_eq!(config, LiveConfig::default());
    assert_eq!(config.runtime.kind, RuntimeKind::R);
    assert_eq!(config.evaluation.defaults.timelimit, 30.0);
    assert_eq!(config.evaluation.defaults.envir, "global");
    assert_eq!(config.evaluation.figure.dpi, 72.0);
    assert_eq!(config.grading.timelimit, 600.0);
    assert_eq!(config.scopes.discard, DiscardPolicy::Exercise);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn sections_override_defaults() {
    let yaml = r#"
runtime:
  kind: python
evaluation:
  echo: true
  output: asis
  timelimit: 5
  figure:
    width: 4
grading:
  timelimit: 120
scopes:
  discard: never
logging:
  level: debug
"#;
    let config = ConfigLoader::from_str(yaml).unwrap();
    assert_eq!(config.runtime.kind, RuntimeKind::Python);
    assert!(config.evaluation.defaults.echo);
    assert_eq!(config.evaluation.defaults.output, OutputMode::Asis);
    assert_eq!(config.evaluation.defaults.timelimit, 5.0);
    assert_eq!(config.evaluation.figure.width, 4.0);
    assert_eq!(config.evaluation.figure.height, 5.0);
    assert_eq!(config.grading.timelimit, 120.0);
    assert_eq!(config.scopes.discard, DiscardPolicy::Never);
    assert_eq!(config.logging.level_filter().unwrap(), log::LevelFilter::Debug);
}

#[test]
fn invalid_values_are_rejected() {
    for yaml in [
        "evaluation:\n  timelimit: 0\n",
        "grading:\n  timelimit: -1\n",
        "evaluation:\n  figure:\n    dpi: 0\n",
        "evaluation:\n  define: x\n",
        "logging:\n  level: loud\n",
        "scopes:\n  discard: sometimes\n",
    ] {
        let err = ConfigLoader::from_str(yaml).unwrap_err();
        assert!(matches!(err, crate::errors::LiveError::ConfigError(_)), "{}", yaml);
    }
}

#[tokio::test]
async fn loads_page_files() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
config:
  evaluation:
    echo: true
cells:
  - code: "x <- 1"
  - code: "x + n"
    options:
      exercise: ex1
      envir: ex1
      define: [y]
    inputs:
      n: 2
    grade: true
exercises:
  ex1:
    setup: ["n <- 0"]
    check: ["feedback('ok', TRUE)"]
"#
    )
    .unwrap();

    let page = ConfigLoader::page_from_file(file.path()).await.unwrap();
    assert!(page.config.evaluation.defaults.echo);
    assert_eq!(page.cells.len(), 2);
    assert!(page.cells[1].grade);
    assert_eq!(page.cells[1].inputs["n"], serde_json::json!(2));
    assert_eq!(page.exercises["ex1"].check.len(), 1);
    assert!(page.exercises["ex1"].solution.is_empty());
}

#[test]
fn grading_cells_need_an_exercise() {
    let yaml = "cells:\n  - code: \"1\"\n    grade: true\n";
    assert!(ConfigLoader::page_from_str(yaml).is_err());
}

#[tokio::test]
async fn missing_files_are_config_errors() {
    let err = load_config("/nonexistent/live.yaml").await.unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
