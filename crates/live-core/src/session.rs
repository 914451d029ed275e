//! One page's worth of pipeline state.
//!
//! A `LiveSession` owns the environment instance of its runtime connection
//! and the page services, hands out evaluators and graders configured from
//! `LiveConfig`, and tears every scope down on `close`.

use serde::Serialize;
use std::sync::Arc;

use crate::config::{CellSpec, LiveConfig, PageFile};
use crate::convert::HostValue;
use crate::environment::EnvironmentInstance;
use crate::errors::LiveError;
use crate::evaluator::{EvaluateContext, EvaluationState, Evaluator};
use crate::grader::{Feedback, GradeOutcome, Grader};
use crate::interp::MinirInterpreter;
use crate::page::{PageDocument, PageServices, StaticDocument, ValueStore};
use crate::runtime::{BindValue, Runtime, RuntimeKind, WorkerRuntime};

/// Outcome of one cell, ready for printing.
#[derive(Debug, Clone, Serialize)]
pub struct CellReport {
    pub index: usize,
    pub state: EvaluationState,
    pub html: String,
    pub result: Option<HostValue>,
    pub exported: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade_html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct LiveSession {
    config: LiveConfig,
    instance: Arc<EnvironmentInstance>,
    services: PageServices,
    values: Arc<ValueStore>,
}

impl LiveSession {
    /// Starts the bundled interpreter for the configured runtime kind.
    pub async fn start(config: LiveConfig) -> Result<Self, LiveError> {
        config.validate()?;
        let runtime: Arc<dyn Runtime> = match config.runtime.kind {
            RuntimeKind::R => WorkerRuntime::spawn(MinirInterpreter::new).await?,
            RuntimeKind::Python => {
                return Err(LiveError::ConfigError(
                    "no bundled python interpreter; use LiveSession::with_runtime".to_string(),
                ))
            }
        };
        Ok(Self::with_runtime(config, runtime))
    }

    pub fn with_runtime(config: LiveConfig, runtime: Arc<dyn Runtime>) -> Self {
        let values = Arc::new(ValueStore::new());
        let services = PageServices {
            figure: config.evaluation.figure,
            discard: config.scopes.discard,
            grading_timelimit: config.grading.timelimit,
            ..PageServices::default()
        }
        .with_values(values.clone());

        log::info!("Started {} session", runtime.kind().display_name());
        Self {
            config,
            instance: Arc::new(EnvironmentInstance::new(runtime)),
            services,
            values,
        }
    }

    pub fn with_document(mut self, document: Arc<dyn PageDocument>) -> Self {
        self.services = self.services.with_document(document);
        self
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    pub fn instance(&self) -> &Arc<EnvironmentInstance> {
        &self.instance
    }

    pub fn services(&self) -> &PageServices {
        &self.services
    }

    pub fn values(&self) -> &Arc<ValueStore> {
        &self.values
    }

    /// Evaluator for `code`, with `overrides` applied on top of the
    /// configured option defaults.
    pub fn evaluator(&self, code: &str, overrides: &serde_json::Value) -> Result<Arc<Evaluator>, LiveError> {
        let options = self.config.evaluation.defaults.with_overrides(overrides)?;
        Ok(Arc::new(Evaluator::new(
            self.instance.clone(),
            EvaluateContext::new(code, options),
            self.services.clone(),
        )))
    }

    pub fn grader(&self, evaluator: Arc<Evaluator>) -> Grader {
        Grader::new(evaluator)
    }

    /// Explicit inputs of a cell, then the page values its `input` option
    /// names.
    fn cell_inputs(&self, cell: &CellSpec, evaluator: &Evaluator) -> Vec<(String, BindValue)> {
        let mut inputs: Vec<(String, BindValue)> = cell
            .inputs
            .iter()
            .map(|(k, v)| (k.clone(), BindValue::Json(v.clone())))
            .collect();
        for name in &evaluator.options().input {
            match self.values.get(name) {
                Some(value) => inputs.push((name.clone(), value.to_bind_value())),
                None => log::warn!("Input `{}` is not defined on this page", name),
            }
        }
        inputs
    }

    /// Evaluates one cell and grades it when asked to. Non-fatal failures are
    /// reported in the cell instead of aborting the page.
    pub async fn run_cell(&self, index: usize, cell: &CellSpec) -> Result<CellReport, LiveError> {
        let evaluator = self.evaluator(&cell.code, &cell.options)?;
        let inputs = self.cell_inputs(cell, &evaluator);

        let mut report = CellReport {
            index,
            state: EvaluationState::Completed,
            html: String::new(),
            result: None,
            exported: Vec::new(),
            feedback: None,
            grade_html: None,
            error: None,
        };

        match evaluator.process(inputs.clone()).await {
            Ok(evaluation) => {
                report.state = evaluation.state;
                report.html = evaluation.display.to_html();
                report.result = evaluation.result;
                report.exported = evaluation.exported;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                log::warn!("Cell {} failed: {}", index, e);
                report.error = Some(e.to_string());
            }
        }

        if cell.grade {
            let outcome = self.grader(evaluator.clone()).grade_exercise(inputs).await?;
            report.grade_html = outcome.to_display().map(|node| node.to_html());
            if let GradeOutcome::Feedback(feedback) = outcome {
                report.feedback = Some(feedback);
            }
        }

        evaluator.close().await?;
        Ok(report)
    }

    /// Runs every cell of `page` in order.
    pub async fn run_page(&self, page: &PageFile) -> Result<Vec<CellReport>, LiveError> {
        let mut reports = Vec::with_capacity(page.cells.len());
        for (i, cell) in page.cells.iter().enumerate() {
            reports.push(self.run_cell(i + 1, cell).await?);
        }
        Ok(reports)
    }

    /// Session for a loaded page: its configuration, with its exercises as
    /// the page document.
    pub async fn for_page(page: &PageFile) -> Result<Self, LiveError> {
        let document = StaticDocument::from_exercises(page.exercises.clone());
        Ok(Self::start(page.config.clone()).await?.with_document(Arc::new(document)))
    }

    /// Releases every scope created during the session.
    pub async fn close(&self) -> Result<(), LiveError> {
        for id in self.instance.scope_ids() {
            self.instance.destroy(&id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;

    const PAGE: &str = r#"
cells:
  - code: "df <- data.frame(a = c(1, 2), b = c(3, 4))"
    options:
      define: df
  - code: "nrow(df) + k"
    options:
      exercise: ex1
      envir: ex1
      input: df
    inputs:
      k: 10
    grade: true
exercises:
  ex1:
    check: ["feedback('Right', identical(result, 12))"]
"#;

    #[tokio::test]
    async fn pages_run_cell_by_cell() {
        let page = ConfigLoader::page_from_str(PAGE).unwrap();
        let session = LiveSession::for_page(&page).await.unwrap();
        let reports = session.run_page(&page).await.unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].exported, vec!["df".to_string()]);
        assert_eq!(session.values().get("df").and_then(|v| v.shape()), Some((2, 2)));

        assert_eq!(reports[1].result, Some(HostValue::Number(12.0)));
        let feedback = reports[1].feedback.as_ref().unwrap();
        assert!(feedback.correct);
        assert!(reports[1].grade_html.as_ref().unwrap().contains("alert-success"));

        assert!(!session.instance().scope_ids().is_empty());
        session.close().await.unwrap();
        assert!(session.instance().scope_ids().is_empty());
    }

    #[tokio::test]
    async fn python_needs_an_external_interpreter() {
        let config = ConfigLoader::from_str("runtime:\n  kind: python\n").unwrap();
        assert!(matches!(
            LiveSession::start(config).await,
            Err(LiveError::ConfigError(_))
        ));
    }
}
