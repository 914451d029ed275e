//! Exercise checking on top of an `Evaluator`.
//!
//! `grade_exercise` screens the attempt (empty code, unfilled blanks, parse
//! failures) without running it, makes sure the attempt has been evaluated,
//! then runs the exercise's check code in a fresh `grading` scope derived from
//! `result`. The check code sees the grading bag as plain variables and as
//! one record named `.checker_env`.

pub mod feedback;

use std::sync::Arc;

use crate::convert::{to_host, HostValue};
use crate::environment::EnvRole;
use crate::errors::{LiveError, RuntimeError};
use crate::evaluator::{contains_blank, Evaluator};
use crate::page::first_block;
use crate::render::DisplayNode;
use crate::runtime::{BindValue, Condition, NativeValue, ObjectRef};
use crate::shelter::Shelter;

pub use feedback::{Feedback, FeedbackError};

/// Name of the record holding the whole grading bag.
pub const CHECKER_ENV: &str = ".checker_env";

#[derive(Debug, Clone, PartialEq)]
pub enum GradeOutcome {
    /// Nothing to show: no code yet, or no check code for the exercise.
    Nothing,
    Feedback(Feedback),
    /// The check code returned something other than feedback; its rendered
    /// output is shown instead.
    Output(DisplayNode),
}

impl GradeOutcome {
    pub fn feedback(&self) -> Option<&Feedback> {
        match self {
            GradeOutcome::Feedback(fb) => Some(fb),
            _ => None,
        }
    }

    pub fn to_display(&self) -> Option<DisplayNode> {
        match self {
            GradeOutcome::Nothing => None,
            GradeOutcome::Feedback(fb) => Some(fb.to_display()),
            GradeOutcome::Output(node) => Some(node.clone()),
        }
    }
}

struct Solution {
    code: String,
    envir: ObjectRef,
    value: Option<ObjectRef>,
}

pub struct Grader {
    evaluator: Arc<Evaluator>,
}

impl Grader {
    pub fn new(evaluator: Arc<Evaluator>) -> Self {
        Self { evaluator }
    }

    pub fn evaluator(&self) -> &Arc<Evaluator> {
        &self.evaluator
    }

    fn label(&self) -> Option<&str> {
        self.evaluator.options().exercise.as_deref()
    }

    fn check_code(&self) -> Option<String> {
        let exercise = self.label()?;
        first_block("check", exercise, self.evaluator.services().document.check_blocks(exercise))
    }

    fn solution_code(&self) -> Option<String> {
        let exercise = self.label()?;
        first_block(
            "solution",
            exercise,
            self.evaluator.services().document.solution_blocks(exercise),
        )
    }

    /// Grades the evaluator's code. Only connection failures and other fatal
    /// errors escape; everything raised by user or check code ends up as
    /// feedback.
    pub async fn grade_exercise(&self, inputs: Vec<(String, BindValue)>) -> Result<GradeOutcome, LiveError> {
        let code = self.evaluator.context().code.as_str();
        if code.is_empty() {
            return Ok(GradeOutcome::Nothing);
        }
        if contains_blank(code) {
            return Ok(GradeOutcome::Feedback(Feedback::blank()));
        }

        let runtime = self.evaluator.runtime();
        match runtime.parse(code).await {
            Ok(()) => {}
            Err(RuntimeError::Parse(message)) => {
                log::debug!("Attempt for {:?} does not parse: {}", self.label(), message);
                return Ok(GradeOutcome::Feedback(Feedback::parse_failure(runtime.kind())));
            }
            Err(e) => return Err(e.into()),
        }

        if self.evaluator.last_value().await.is_none() {
            match self.evaluator.process(inputs).await {
                Ok(_) => {}
                Err(e) if !e.is_fatal() => log::debug!("Attempt for {:?} failed: {}", self.label(), e),
                Err(e) => return Err(e),
            }
        }

        let (indicator, owned) = self.evaluator.acquire_indicator();
        indicator.running();

        let shelter = Shelter::new(runtime.clone());
        let outcome = self.check(&shelter).await;
        let purged = shelter.purge().await;

        indicator.finished();
        if owned {
            indicator.destroy();
        }

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(LiveError::Evaluation(condition)) => {
                GradeOutcome::Feedback(Feedback::checker_error(self.label(), &condition))
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                let condition = Condition::error(e.to_string(), None);
                GradeOutcome::Feedback(Feedback::checker_error(self.label(), &condition))
            }
        };
        purged?;
        Ok(outcome)
    }

    async fn check(&self, shelter: &Shelter) -> Result<GradeOutcome, LiveError> {
        let manager = self.evaluator.manager();
        let options = self
            .evaluator
            .options()
            .for_grading(self.evaluator.services().grading_timelimit);

        manager.create(EnvRole::Grading, EnvRole::Result).await?;
        let solution = self.evaluate_solution(shelter).await?;

        let check_code = self.check_code();
        let bag = self.grading_bag(check_code.as_deref(), solution).await?;
        for (key, value) in &bag {
            manager.bind(key, value.clone(), EnvRole::Grading).await?;
        }
        manager
            .bind(CHECKER_ENV, BindValue::Record(bag), EnvRole::Grading)
            .await?;

        let Some(check_code) = check_code else {
            log::debug!("No check code for {:?}", self.label());
            return Ok(GradeOutcome::Nothing);
        };

        let Some(capture) = self
            .evaluator
            .evaluate(&check_code, EnvRole::Grading, &options, shelter)
            .await?
        else {
            return Ok(GradeOutcome::Nothing);
        };

        if let Some(handle) = capture.last_value() {
            let described = self.evaluator.runtime().describe(handle).await?;
            shelter.track_all(described.handles().iter().copied());
            if let NativeValue::List { .. } = described {
                let figure = self.evaluator.figure_size(&options);
                let value = to_host(self.evaluator.runtime(), handle, shelter, figure).await?;
                if let Some(feedback) = Feedback::from_host(&value) {
                    return Ok(GradeOutcome::Feedback(feedback));
                }
            }
        }

        let display = self.evaluator.render(&capture, &options, shelter).await?;
        Ok(GradeOutcome::Output(display))
    }

    async fn evaluate_solution(&self, shelter: &Shelter) -> Result<Option<Solution>, LiveError> {
        let Some(code) = self.solution_code() else {
            return Ok(None);
        };
        let manager = self.evaluator.manager();
        manager.create(EnvRole::Solution, EnvRole::Prep).await?;
        let envir = manager.get(EnvRole::Solution).await?;

        let options = self
            .evaluator
            .options()
            .for_grading(self.evaluator.services().grading_timelimit);
        let value = self
            .evaluator
            .evaluate(&code, EnvRole::Solution, &options, shelter)
            .await?
            .and_then(|capture| capture.last_value());

        Ok(Some(Solution { code, envir, value }))
    }

    async fn grading_bag(
        &self,
        check_code: Option<&str>,
        solution: Option<Solution>,
    ) -> Result<Vec<(String, BindValue)>, LiveError> {
        let manager = self.evaluator.manager();
        let engine = self.evaluator.runtime().kind().engine();
        let null = || BindValue::Json(serde_json::Value::Null);
        let text = |s: Option<&str>| s.map_or_else(null, BindValue::from);
        let last_value = match self.evaluator.last_value().await {
            Some(handle) => BindValue::Native(handle),
            None => null(),
        };

        let mut bag = vec![
            ("user_code".to_string(), BindValue::from(self.evaluator.context().code.as_str())),
            ("stage".to_string(), BindValue::from("check")),
            ("engine".to_string(), BindValue::from(engine)),
            ("label".to_string(), text(self.label())),
            ("check_code".to_string(), text(check_code)),
            ("envir_result".to_string(), BindValue::Native(manager.get(EnvRole::Result).await?)),
            ("envir_prep".to_string(), BindValue::Native(manager.get(EnvRole::Prep).await?)),
            ("last_value".to_string(), last_value.clone()),
            ("result".to_string(), last_value),
        ];

        let solution_entries = match solution {
            Some(solution) => [
                BindValue::from(solution.code.as_str()),
                BindValue::Json(serde_json::json!([solution.code])),
                BindValue::Native(solution.envir),
                solution.value.map_or_else(null, BindValue::Native),
            ],
            None => [null(), null(), null(), null()],
        };
        let names = ["solution_code", "solution_code_all", "envir_solution", "solution"];
        bag.extend(names.iter().map(|n| n.to_string()).zip(solution_entries));
        Ok(bag)
    }

    /// Host view of the grading bag as currently bound in the grading scope.
    pub async fn checker_env(&self) -> Result<HostValue, LiveError> {
        let shelter = Shelter::new(self.evaluator.runtime().clone());
        let outcome = async {
            let handle = self
                .evaluator
                .manager()
                .lookup(CHECKER_ENV, EnvRole::Grading)
                .await?;
            shelter.track(handle);
            let figure = self.evaluator.figure_size(self.evaluator.options());
            to_host(self.evaluator.runtime(), handle, &shelter, figure).await
        }
        .await;
        let purged = shelter.purge().await;
        let value = outcome?;
        purged?;
        Ok(value)
    }
}
