//! Capture to display tree.

use crate::errors::LiveError;
use crate::render::{
    condition_block, html_block, image_block, output_block, source_block, DependencyRegistry,
    DisplayNode, Stream,
};
use crate::runtime::{Capture, CaptureItem, GraphicsSize, NativeValue, Runtime};
use crate::shelter::Shelter;

use super::options::{EvaluateOptions, OutputMode};

pub(crate) struct CaptureRenderer<'a> {
    pub runtime: &'a dyn Runtime,
    pub shelter: &'a Shelter,
    pub dependencies: &'a DependencyRegistry,
    pub options: &'a EvaluateOptions,
    pub figure: GraphicsSize,
}

/// Builds the container, holding back source fragments so consecutive ones
/// coalesce into a single block placed right before the next output.
struct Assembler<'o> {
    container: DisplayNode,
    sources: Vec<String>,
    language: &'static str,
    options: &'o EvaluateOptions,
}

impl Assembler<'_> {
    fn flush_source(&mut self) {
        if self.options.echo && self.options.output != OutputMode::Hide && !self.sources.is_empty() {
            let code = self.sources.concat();
            self.container.push(source_block(&code, self.language));
        }
        self.sources.clear();
    }

    fn emit(&mut self, node: DisplayNode) {
        if self.options.output == OutputMode::Hide {
            return;
        }
        self.flush_source();
        self.container.push(node);
    }
}

impl CaptureRenderer<'_> {
    pub async fn render(&self, capture: &Capture) -> Result<DisplayNode, LiveError> {
        let kind = self.runtime.kind();
        let mut out = Assembler {
            container: DisplayNode::div(),
            sources: Vec::new(),
            language: kind.engine(),
            options: self.options,
        };

        for item in &capture.items {
            match item {
                CaptureItem::Text { text } => out.emit(output_block(text, Stream::Stdout)),
                CaptureItem::Warning { condition } => out.emit(condition_block(
                    kind.display_name(),
                    "warning",
                    "Warning",
                    &condition.message,
                    condition.call.as_deref(),
                )),
                CaptureItem::Error { condition } => out.emit(condition_block(
                    kind.display_name(),
                    "important",
                    "Error",
                    &condition.message,
                    condition.call.as_deref(),
                )),
                CaptureItem::Message { condition } => {
                    out.emit(output_block(&condition.message, Stream::Stderr))
                }
                CaptureItem::Source { src } => out.sources.push(src.clone()),
                CaptureItem::Result { value, visible, asis } => {
                    if !(*visible && *asis) || self.options.output == OutputMode::Hide {
                        continue;
                    }
                    let described = self.runtime.describe(*value).await?;
                    self.shelter.track_all(described.handles().iter().copied());
                    match described {
                        NativeValue::Html { html, dependencies } => {
                            self.dependencies.load_all(&dependencies).await?;
                            out.emit(html_block(&html));
                        }
                        other => match other.as_text() {
                            Some(text) => out.emit(html_block(&text)),
                            None => log::debug!("Skipping as-is result of type {}", other.type_name()),
                        },
                    }
                }
                CaptureItem::Plot { plot } => {
                    if self.options.output == OutputMode::Hide {
                        continue;
                    }
                    let bitmap = self.runtime.replay_plot(*plot, self.figure).await?;
                    out.emit(image_block(&bitmap));
                }
            }
        }
        out.flush_source();
        Ok(out.container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::MinirInterpreter;
    use crate::runtime::{Condition, WorkerRuntime};
    use std::sync::Arc;

    const FIGURE: GraphicsSize = GraphicsSize { width: 70, height: 50 };

    async fn render_with(capture: &Capture, options: &EvaluateOptions) -> DisplayNode {
        let runtime: Arc<dyn Runtime> = WorkerRuntime::spawn(MinirInterpreter::new).await.unwrap();
        let shelter = Shelter::new(runtime.clone());
        let dependencies = DependencyRegistry::default();
        let renderer = CaptureRenderer {
            runtime: runtime.as_ref(),
            shelter: &shelter,
            dependencies: &dependencies,
            options,
            figure: FIGURE,
        };
        let node = renderer.render(capture).await.unwrap();
        shelter.purge().await.unwrap();
        node
    }

    fn echo() -> EvaluateOptions {
        EvaluateOptions { echo: true, ..Default::default() }
    }

    #[tokio::test]
    async fn consecutive_sources_coalesce() {
        let capture = Capture {
            items: vec![
                CaptureItem::source("x<-1"),
                CaptureItem::source("y<-2"),
                CaptureItem::text("3"),
            ],
            ..Default::default()
        };
        let node = render_with(&capture, &echo()).await;
        let children = node.children();
        assert_eq!(children.len(), 2);
        assert!(children[0].has_class("sourceCode"));
        assert_eq!(children[0].text_content(), "x<-1y<-2");
        assert!(children[1].has_class("cell-output-stdout"));
        assert_eq!(children[1].text_content(), "3");
    }

    #[tokio::test]
    async fn trailing_source_is_flushed() {
        let capture = Capture {
            items: vec![CaptureItem::text("a"), CaptureItem::source("x <- 1\n")],
            ..Default::default()
        };
        let node = render_with(&capture, &echo()).await;
        assert_eq!(node.children().len(), 2);
        assert!(node.children()[1].has_class("sourceCode"));
    }

    #[tokio::test]
    async fn source_is_dropped_without_echo() {
        let capture = Capture {
            items: vec![CaptureItem::source("x\n"), CaptureItem::text("[1] 1\n")],
            ..Default::default()
        };
        let node = render_with(&capture, &EvaluateOptions::default()).await;
        assert_eq!(node.children().len(), 1);
        assert!(node.find_by_class("sourceCode").is_empty());
    }

    #[tokio::test]
    async fn conditions_render_as_callouts() {
        let capture = Capture {
            items: vec![
                CaptureItem::Warning { condition: Condition::warning("careful", None) },
                CaptureItem::Error { condition: Condition::error("boom", Some("f(x)".into())) },
                CaptureItem::Message { condition: Condition::message("note\n") },
            ],
            ..Default::default()
        };
        let node = render_with(&capture, &EvaluateOptions::default()).await;
        assert_eq!(node.find_by_class("callout-warning").len(), 1);
        let error = node.find_by_class("callout-important");
        assert_eq!(error.len(), 1);
        assert!(error[0].text_content().contains("R Error in `f(x)`"));
        assert_eq!(node.find_by_class("cell-output-stderr")[0].text_content(), "note\n");
    }

    #[tokio::test]
    async fn hidden_output_renders_nothing() {
        let capture = Capture {
            items: vec![CaptureItem::source("x\n"), CaptureItem::text("[1] 1\n")],
            ..Default::default()
        };
        let options = EvaluateOptions { echo: true, output: OutputMode::Hide, ..Default::default() };
        let node = render_with(&capture, &options).await;
        assert!(node.children().is_empty());
    }
}
