//! # stk_config
//!
//! Configuration loading and interpolation for stk.
//!
//! A configuration is a set of YAML sections whose values are Handlebars
//! expressions. This crate resolves them, in dependency order, into the
//! variables, parameters and tags a template is rendered with.
//!
//! # Architecture
//!
//! - **Expressions**: render one raw value and re-parse the output as YAML
//! - **Interpolated maps**: single-pass rendering of flat sections
//! - **Variable resolver**: fixed-point iteration over mutually referencing vars
//! - **Stack references**: lazily described deployed stacks and their outputs
//! - **Config**: the orchestrator that runs the pipeline
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stk_config::{Collaborators, Config, LoadOptions, StaticCredentials, StaticStackState};
//!
//! let collaborators = Collaborators::new(
//!     Arc::new(StaticCredentials::new("111122223333")),
//!     Arc::new(StaticStackState::new()),
//! );
//! let config = Config::load(LoadOptions::new("app", "dev", "config"), &collaborators)?;
//! println!("{:?}", config.var("stack_name"));
//! ```

pub mod aws;
pub mod config;
pub mod engine;
pub mod error;
pub mod expression;
pub mod interpolated;
pub mod loader;
pub mod metadata;
pub mod offline;
pub mod refs;
pub mod settings;
pub mod value;
pub mod vars;

// Re-export main types for convenience
pub use aws::{AwsSettings, CredentialProvider, ServiceClient};
pub use config::{Collaborators, Config, LoadOptions};
pub use engine::{render_template, render_value, strict_registry};
pub use error::{ConfigError, ConfigResult, InterpolationError, InterpolationFailure};
pub use expression::{ExpressionError, ExpressionRenderer};
pub use interpolated::{InterpolatedMap, Tags};
pub use loader::{ConfigFile, Includes, SectionLoader};
pub use metadata::DeployMetadata;
pub use offline::{StaticCredentials, StaticStackState};
pub use refs::{StackDescription, StackHandle, StackRefs, StackStateProvider};
pub use settings::{CoreSettings, TemplateSource};
pub use value::{parse_document, Context};
pub use vars::{VariableResolver, MAX_INTERPOLATION_DEPTH};
