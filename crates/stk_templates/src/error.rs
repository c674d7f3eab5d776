//! Error types for templates.

use thiserror::Error;

use crate::rendered::{FailedTemplate, Frame};

/// Result type alias for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Errors that can occur during template operations.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Template could not be rendered:\n{0}")]
    RenderingFailed(Box<FailedTemplate>),

    #[error("Unknown helper '{name}' - only {available} are registered")]
    UnknownHelper { name: String, available: String },

    #[error("Template source {0} is not supported")]
    UnsupportedSource(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Config error: {0}")]
    Config(#[from] stk_config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A helper call that failed while rendering.
///
/// Carried through Handlebars as a nested error so the renderer can rebuild
/// the chain of frames that led to it.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct HelperFailure {
    pub helper: String,
    pub message: String,
    /// Frames of renders the helper performed itself, outermost first.
    pub frames: Vec<Frame>,
}
