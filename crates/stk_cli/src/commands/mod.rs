//! CLI command definitions.
//!
//! Every command loads a configuration first; the arguments for that are
//! shared through [`ConfigArgs`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use stk_config::{Collaborators, Config, LoadOptions, StaticCredentials, StaticStackState};

pub mod render;
pub mod vars;

/// stk - render CloudFormation documents from layered configuration
#[derive(Parser)]
#[command(name = "stk")]
#[command(version, about = "Render CloudFormation documents from layered configuration")]
#[command(long_about = r#"
stk resolves a layered YAML configuration (vars, params, tags, stack
references) for one environment and renders a Handlebars document template
with it.

COMMANDS:
  render  → Resolve configuration and render the document template
  vars    → Resolve configuration and print the resulting variables

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Configuration error
  4 - Template error
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render the document template for a configuration
    Render(render::RenderArgs),

    /// Print the resolved variables of a configuration
    Vars(vars::VarsArgs),
}

/// Which configuration to load, and the offline collaborators to load it with.
#[derive(Args)]
pub struct ConfigArgs {
    /// Configuration name (relative to the config path, extension optional)
    pub name: String,

    /// Environment to resolve
    #[arg(short, long, env = "STK_ENVIRONMENT")]
    pub environment: String,

    /// Directory holding configuration files
    #[arg(long, env = "STK_CONFIG_PATH", default_value = "config")]
    pub config_path: PathBuf,

    /// Directory holding templates, used when the config sets no root
    #[arg(long, env = "STK_TEMPLATE_PATH")]
    pub template_path: Option<String>,

    /// Account the active credentials belong to
    #[arg(long, env = "STK_ACCOUNT_ID")]
    pub account_id: String,

    /// YAML file of deployed stacks and their outputs
    #[arg(long)]
    pub stack_state: Option<PathBuf>,

    /// Override a variable (repeatable)
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub vars: Vec<(String, String)>,

    /// Override a parameter (repeatable)
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,
}

impl ConfigArgs {
    /// Run the configuration pipeline.
    pub fn load(&self) -> Result<Config> {
        let stacks = match &self.stack_state {
            Some(path) => StaticStackState::from_file(path)?,
            None => StaticStackState::new(),
        };
        let collaborators = Collaborators::new(
            Arc::new(StaticCredentials::new(self.account_id.clone())),
            Arc::new(stacks),
        );

        let mut options = LoadOptions::new(&self.name, &self.environment, &self.config_path);
        if let Some(path) = &self.template_path {
            options = options.with_template_path(path.clone());
        }
        for (key, value) in &self.vars {
            options = options.with_var(key.clone(), Value::String(value.clone()));
        }
        for (key, value) in &self.params {
            options = options.with_param(key.clone(), Value::String(value.clone()));
        }

        info!("Loading {} ({})", self.name, self.environment);
        let config = Config::load(options, &collaborators)
            .with_context(|| format!("Unable to load configuration {}", self.name))?;
        Ok(config)
    }
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("invalid KEY=VALUE argument: '{}'", s)),
    }
}
