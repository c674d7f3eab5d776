//! Render results and failure diagnostics.

use std::fmt;

use handlebars::{RenderError, RenderErrorReason};
use serde_json::Value;
use stk_config::Context;
use thiserror::Error;

use crate::error::HelperFailure;

/// Origin name of the document template itself.
pub const TEMPLATE_ORIGIN: &str = "<template>";

/// Lines of context shown before an error line.
pub const ERROR_CONTEXT_LINES: usize = 3;

/// One step of the chain that led to a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub origin: String,
    pub line: Option<usize>,
}

impl Frame {
    pub fn new(origin: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            origin: origin.into(),
            line,
        }
    }
}

/// The captured error of a failed render: the innermost message and the
/// frames leading to it, outermost first.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct RenderFailure {
    pub message: String,
    pub frames: Vec<Frame>,
}

impl RenderFailure {
    pub fn new(message: impl Into<String>, frames: Vec<Frame>) -> Self {
        Self {
            message: message.into(),
            frames,
        }
    }

    /// Rebuild the frame chain of a Handlebars error raised while rendering
    /// `origin`.
    pub fn from_render_error(error: &RenderError, origin: &str) -> Self {
        let mut frames = vec![Frame::new(origin, error.line_no)];

        let message = match error.reason() {
            RenderErrorReason::NestedError(inner) => match inner.downcast_ref::<HelperFailure>() {
                Some(failure) => {
                    frames.push(Frame::new(format!("helper:{}", failure.helper), None));
                    frames.extend(failure.frames.iter().cloned());
                    failure.message.clone()
                }
                None => inner.to_string(),
            },
            RenderErrorReason::TemplateError(compile) => {
                if let Some((line, _)) = compile.pos() {
                    frames[0].line = Some(line);
                }
                compile.reason().to_string()
            }
            other => other.to_string(),
        };

        Self { message, frames }
    }

    /// The frame a diagnostic should point at: the innermost frame inside the
    /// document template that carries a line number.
    pub fn template_frame(&self) -> Option<(&Frame, usize)> {
        self.frames
            .iter()
            .rev()
            .filter(|f| f.origin == TEMPLATE_ORIGIN)
            .find_map(|f| f.line.map(|line| (f, line)))
    }
}

/// A successfully rendered document.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedTemplate {
    content: String,
    document: Context,
}

impl RenderedTemplate {
    pub(crate) fn new(content: String, document: Context) -> Self {
        Self { content, document }
    }

    /// The rendered text.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// The parsed document; empty when the text held no document.
    pub fn document(&self) -> &Context {
        &self.document
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.document.get(key)
    }
}

impl fmt::Display for RenderedTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.content)
    }
}

/// A render that failed, kept as data so callers decide what to do with it.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedTemplate {
    /// Rendered text when rendering got that far, otherwise the raw template.
    pub source: String,
    pub location: String,
    pub error: RenderFailure,
}

impl FailedTemplate {
    pub fn new(source: impl Into<String>, location: impl Into<String>, error: RenderFailure) -> Self {
        Self {
            source: source.into(),
            location: location.into(),
            error,
        }
    }

    /// Line the error is attributed to within the template, if any.
    pub fn line(&self) -> Option<usize> {
        self.error.template_frame().map(|(_, line)| line)
    }

    /// Numbered source lines around `line_no`.
    pub fn source_context(&self, line_no: usize) -> String {
        let lines: Vec<&str> = self.source.split('\n').collect();
        let from = line_no.saturating_sub(ERROR_CONTEXT_LINES).max(1);
        let to = (line_no + ERROR_CONTEXT_LINES - 1).min(lines.len());

        (from..=to)
            .map(|i| format!("{:4} : {}", i, lines[i - 1]))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for FailedTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(line) = self.line() {
            return write!(
                f,
                "{}\n{} at line {}:\n\n{}\n\n",
                self.error.message,
                self.location,
                line,
                self.source_context(line)
            );
        }

        let (origin, line) = match self.error.frames.last() {
            Some(frame) => (
                frame.origin.as_str(),
                frame.line.map_or_else(|| "?".to_string(), |l| l.to_string()),
            ),
            None => ("?", "?".to_string()),
        };
        write!(
            f,
            "Error occurred outside of template\n{}\n{}:{}",
            self.error.message, origin, line
        )
    }
}

/// What a render produced.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    Rendered(RenderedTemplate),
    Failed(FailedTemplate),
}

impl RenderOutcome {
    pub fn rendered(&self) -> Option<&RenderedTemplate> {
        match self {
            RenderOutcome::Rendered(t) => Some(t),
            RenderOutcome::Failed(_) => None,
        }
    }

    pub fn failed(&self) -> Option<&FailedTemplate> {
        match self {
            RenderOutcome::Rendered(_) => None,
            RenderOutcome::Failed(t) => Some(t),
        }
    }
}
