//! Error types for configuration loading.

use std::fmt;
use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while building a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid '{section}' section: {message}")]
    InvalidSection { section: String, message: String },

    #[error("Unable to process {key}, value={value} : {message}")]
    InterpolatedValue {
        key: String,
        value: String,
        message: String,
    },

    #[error("An error occurred processing vars:\n{0}")]
    Interpolation(InterpolationFailure),

    #[error("Attempt to access stack {name}, but it's not defined in config.refs - only {available} are defined")]
    UnknownReference { name: String, available: String },

    #[error("{name} is not a valid stack reference definition ({spec}): {message}")]
    InvalidReference {
        name: String,
        spec: String,
        message: String,
    },

    #[error("Stack config.refs[{name}] ({target}) does not exist, but is required")]
    ReferenceMissing { name: String, target: String },

    #[error("'{output}' not in outputs of {target} - only {available} are published")]
    OutputNotFound {
        output: String,
        target: String,
        available: String,
    },

    #[error("Unable to describe stack {target}: {message}")]
    StackState { target: String, message: String },

    #[error("Incorrect AWS Account - expected {expected}, but appear to be using {actual}")]
    AccountMismatch { expected: String, actual: String },

    #[error("Unable to resolve credentials: {0}")]
    Credentials(String),

    #[error("Environment {environment} is not a valid environment for {config}. Only {allowed} permitted.")]
    InvalidEnvironment {
        environment: String,
        config: String,
        allowed: String,
    },

    #[error("Stack name {0} is invalid. Can contain only alphanumeric characters and hyphens")]
    InvalidStackName(String),

    #[error("Variable '{0}' is reserved and has already been resolved")]
    ReservedVariable(String),

    #[error("Configuration file {name} not found in {dir}")]
    ConfigNotFound { name: String, dir: PathBuf },

    #[error("Include cycle detected: {0}")]
    IncludeCycle(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A single key that could not be interpolated.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolationError {
    pub key: String,
    pub value: Value,
    pub error: String,
}

/// Every key that never resolved, with its last error.
///
/// `stalled` is set when a pass made no progress before the pass limit was
/// reached; `iterations` is then the number of passes actually run.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolationFailure {
    pub errors: Vec<InterpolationError>,
    pub iterations: usize,
    pub stalled: bool,
}

impl InterpolationFailure {
    /// Unresolved keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.key.as_str()).collect()
    }

    pub fn get(&self, key: &str) -> Option<&InterpolationError> {
        self.errors.iter().find(|e| e.key == key)
    }
}

impl fmt::Display for InterpolationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: Vec<(String, String, String)> = self
            .errors
            .iter()
            .map(|e| (e.key.clone(), display_raw(&e.value), e.error.clone()))
            .collect();

        let key_width = rows.iter().map(|r| r.0.len()).max().unwrap_or(0).max(3);
        let value_width = rows.iter().map(|r| r.1.len()).max().unwrap_or(0).max(5);

        writeln!(f, "{:key_width$} | {:value_width$} | Error", "Key", "Value")?;
        writeln!(f, "{}-+-{}-+------", "-".repeat(key_width), "-".repeat(value_width))?;
        for (key, value, error) in rows {
            writeln!(f, "{key:key_width$} | {value:value_width$} | {error}")?;
        }
        if self.stalled {
            write!(
                f,
                "({} unresolved after {} iterations, no further progress possible)",
                self.errors.len(),
                self.iterations
            )
        } else {
            write!(
                f,
                "({} unresolved after {} iterations, limit reached)",
                self.errors.len(),
                self.iterations
            )
        }
    }
}

/// Render a raw value for error messages, without the quotes JSON puts around strings.
pub(crate) fn display_raw(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
