//! Drives one evaluation request end to end.
//!
//! `process` binds page inputs into the `prep` scope, runs the exercise
//! setup code there, derives `result` from `prep`, evaluates the user code in
//! `result`, renders the capture and exports the `define`d names. Every
//! interpreter handle created along the way lives in a per-call `Shelter`
//! that is purged on every exit path.

pub mod options;
mod render;

use futures_util::future::try_join_all;
use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, OnceLock};

use crate::convert::{to_host, HostValue};
use crate::environment::{EnvRole, EnvironmentInstance, EnvironmentManager};
use crate::errors::{LiveError, RuntimeError};
use crate::indicator::Indicator;
use crate::page::{first_block, PageServices};
use crate::render::{source_block, DisplayNode};
use crate::runtime::{BindValue, Capture, GraphicsSize, NativeValue, ObjectRef, Runtime};
use crate::shelter::{release_detached, Shelter};

pub use options::{EvaluateContext, EvaluateOptions, FigureDefaults, OutputMode};
pub(crate) use render::CaptureRenderer;

/// Six or more underscores: an unfilled exercise blank.
pub fn contains_blank(code: &str) -> bool {
    static BLANK: OnceLock<Option<Regex>> = OnceLock::new();
    BLANK
        .get_or_init(|| Regex::new("_{6}_*").ok())
        .as_ref()
        .map_or_else(|| code.contains("______"), |re| re.is_match(code))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationState {
    /// `eval` was off; the display is the raw source.
    SourceOnly,
    /// Exercise code still contains blanks; nothing ran.
    Blocked,
    /// `include` was off; nothing ran.
    Skipped,
    Completed,
}

/// Outcome of one `process` call.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub state: EvaluationState,
    pub display: DisplayNode,
    /// Host rendition of the last captured value.
    pub result: Option<HostValue>,
    /// Raw capture. Its handles were released with the call's shelter.
    pub capture: Option<Capture>,
    /// Names published to the page's value registry, in `define` order.
    pub exported: Vec<String>,
}

impl Evaluation {
    fn empty(state: EvaluationState, display: DisplayNode) -> Self {
        Self {
            state,
            display,
            result: None,
            capture: None,
            exported: Vec::new(),
        }
    }
}

pub struct Evaluator {
    context: EvaluateContext,
    manager: EnvironmentManager,
    services: PageServices,
    /// Last value of the most recent run, retained beyond its shelter so a
    /// grader can inspect it without evaluating again.
    retained: tokio::sync::Mutex<Option<ObjectRef>>,
}

impl Evaluator {
    pub fn new(instance: Arc<EnvironmentInstance>, context: EvaluateContext, services: PageServices) -> Self {
        let manager = EnvironmentManager::new(
            instance,
            context.options.exercise.as_deref(),
            &context.options.envir,
            services.discard,
        );
        Self {
            context,
            manager,
            services,
            retained: tokio::sync::Mutex::new(None),
        }
    }

    pub fn context(&self) -> &EvaluateContext {
        &self.context
    }

    pub fn options(&self) -> &EvaluateOptions {
        &self.context.options
    }

    pub fn manager(&self) -> &EnvironmentManager {
        &self.manager
    }

    pub fn services(&self) -> &PageServices {
        &self.services
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        self.manager.instance().runtime()
    }

    pub fn figure_size(&self, options: &EvaluateOptions) -> GraphicsSize {
        self.services.figure.size_for(options)
    }

    /// Retained last value of the most recent completed run.
    pub async fn last_value(&self) -> Option<ObjectRef> {
        *self.retained.lock().await
    }

    /// Indicator for one call: the context's, or a throwaway one that is
    /// destroyed afterwards.
    pub(crate) fn acquire_indicator(&self) -> (Indicator, bool) {
        match &self.context.indicator {
            Some(indicator) => (indicator.clone(), false),
            None => (Indicator::new(&self.services.indicators), true),
        }
    }

    fn setup_code(&self) -> Option<String> {
        let exercise = self.context.options.exercise.as_deref()?;
        first_block("setup", exercise, self.services.document.setup_blocks(exercise))
    }

    pub async fn process(&self, inputs: Vec<(String, BindValue)>) -> Result<Evaluation, LiveError> {
        let options = &self.context.options;
        if !options.eval {
            let language = self.runtime().kind().engine();
            return Ok(Evaluation::empty(
                EvaluationState::SourceOnly,
                source_block(&self.context.code, language),
            ));
        }

        if options.exercise.is_some() && contains_blank(&self.context.code) {
            log::debug!("Code for exercise {:?} still has blanks", options.exercise);
            return Ok(Evaluation::empty(EvaluationState::Blocked, DisplayNode::div()));
        }

        let (indicator, owned) = self.acquire_indicator();
        indicator.running();

        let shelter = Shelter::new(self.runtime().clone());
        let outcome = self.run(inputs, &shelter).await;
        let purged = shelter.purge().await;

        indicator.finished();
        if owned {
            indicator.destroy();
        }

        let evaluation = outcome?;
        purged?;
        Ok(evaluation)
    }

    async fn run(&self, inputs: Vec<(String, BindValue)>, shelter: &Shelter) -> Result<Evaluation, LiveError> {
        let options = &self.context.options;

        try_join_all(
            inputs
                .into_iter()
                .map(|(key, value)| async move { self.manager.bind(&key, value, EnvRole::Prep).await }),
        )
        .await?;

        if let Some(setup) = self.setup_code() {
            self.evaluate(&setup, EnvRole::Prep, options, shelter).await?;
        }
        self.manager.create(EnvRole::Result, EnvRole::Prep).await?;

        let Some(capture) = self.evaluate(&self.context.code, EnvRole::Result, options, shelter).await? else {
            return Ok(Evaluation::empty(EvaluationState::Skipped, DisplayNode::div()));
        };

        let display = match options.output {
            OutputMode::Hide => DisplayNode::div(),
            OutputMode::Asis => self.render_asis(&capture, shelter).await?,
            OutputMode::Show => self.render(&capture, options, shelter).await?,
        };

        let figure = self.figure_size(options);
        let last = capture.last_value();
        let result = match last {
            Some(handle) => Some(to_host(self.runtime(), handle, shelter, figure).await?),
            None => None,
        };
        self.retain(last).await?;

        let exported = self.export(shelter, figure).await?;

        Ok(Evaluation {
            state: EvaluationState::Completed,
            display,
            result,
            capture: Some(capture),
            exported,
        })
    }

    /// Evaluates `code` in the scope for `role`. Returns `None` when
    /// `include` is off. With `error` off, a user error propagates as
    /// `LiveError::Evaluation`; otherwise it is part of the capture.
    pub async fn evaluate(
        &self,
        code: &str,
        role: EnvRole,
        options: &EvaluateOptions,
        shelter: &Shelter,
    ) -> Result<Option<Capture>, LiveError> {
        if !options.include {
            return Ok(None);
        }
        let scope = self.manager.get(role).await?;
        log::debug!("Evaluating {} byte(s) in '{}'", code.len(), self.manager.scope_id(role));
        let capture = self
            .runtime()
            .evaluate(scope, code, &options.eval_request())
            .await?;
        shelter.track_all(capture.handles());
        Ok(Some(capture))
    }

    /// Structured rendering of a capture.
    pub async fn render(
        &self,
        capture: &Capture,
        options: &EvaluateOptions,
        shelter: &Shelter,
    ) -> Result<DisplayNode, LiveError> {
        CaptureRenderer {
            runtime: self.runtime().as_ref(),
            shelter,
            dependencies: &self.services.dependencies,
            options,
            figure: self.figure_size(options),
        }
        .render(capture)
        .await
    }

    async fn render_asis(&self, capture: &Capture, shelter: &Shelter) -> Result<DisplayNode, LiveError> {
        let text = match capture.last_value() {
            Some(handle) => {
                let described = self.runtime().describe(handle).await?;
                shelter.track_all(described.handles().iter().copied());
                if let NativeValue::Html { dependencies, .. } = &described {
                    self.services.dependencies.load_all(dependencies).await?;
                }
                described.as_text()
            }
            None => None,
        };
        let html = text.unwrap_or_else(|| capture.stdout.clone());
        Ok(DisplayNode::div().child(DisplayNode::raw(html)))
    }

    async fn retain(&self, value: Option<ObjectRef>) -> Result<(), LiveError> {
        let mut retained = self.retained.lock().await;
        if let Some(previous) = retained.take() {
            match self.runtime().release(&[previous]).await {
                Ok(()) | Err(RuntimeError::AlreadyReleased(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        if let Some(value) = value {
            *retained = Some(self.runtime().retain(value).await?);
        }
        Ok(())
    }

    async fn export(&self, shelter: &Shelter, figure: GraphicsSize) -> Result<Vec<String>, LiveError> {
        let mut exported = Vec::new();
        for name in &self.context.options.define {
            let handle = match self.manager.lookup(name, EnvRole::Result).await {
                Ok(handle) => shelter.track(handle),
                Err(LiveError::NotFound(_)) => {
                    log::warn!("Cannot export `{}`: no such binding", name);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let value = to_host(self.runtime(), handle, shelter, figure).await?;
            self.services.values.publish(name, value);
            exported.push(name.clone());
        }
        Ok(exported)
    }

    /// Releases the retained last value.
    pub async fn close(&self) -> Result<(), LiveError> {
        self.retain(None).await
    }
}

impl Drop for Evaluator {
    fn drop(&mut self) {
        if let Some(handle) = self.retained.get_mut().take() {
            release_detached(self.runtime().clone(), vec![handle], "retained evaluator value".to_string());
        }
    }
}

#[cfg(test)]
mod tests;
