//! Configuration file loading.
//!
//! A configuration is a YAML file in the config directory. It declares the
//! environments it may be deployed to, optionally includes other files, and
//! holds the raw sections the pipeline interpolates:
//!
//! ```yaml
//! environments: [dev, prod]
//! includes: [common/network]
//! aws:
//!   region: eu-west-1
//!   cfn_bucket: "{{environment}}-templates"
//! vars:
//!   instance_type: t3.small
//! helpers: [naming]
//! environment:
//!   prod:
//!     vars:
//!       instance_type: m5.large
//! ```
//!
//! Per section, values merge shallowly in order: caller defaults, included
//! files (depth first, in declaration order), the file itself, then the
//! file's override for the selected environment. Set sections are unions.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::value::{parse_document, Context};

/// Supplies merged raw sections to the pipeline.
pub trait SectionLoader {
    /// Merged mapping for `section` in `environment`, on top of `defaults`.
    ///
    /// Returns `Value::Null` when no layer defines the section and there are no
    /// defaults; a layer that defines it as something other than a mapping is
    /// returned as-is so the caller can report the shape error.
    fn fetch_section(
        &self,
        section: &str,
        environment: &str,
        defaults: &Context,
    ) -> ConfigResult<Value>;

    /// Union of list-valued `section` across all layers.
    fn fetch_set(&self, section: &str, environment: &str) -> ConfigResult<BTreeSet<String>>;

    /// Environments this configuration may be deployed to.
    fn environments(&self) -> BTreeSet<String>;
}

/// One parsed configuration file.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub name: String,
    pub path: PathBuf,
    content: Context,
}

impl ConfigFile {
    /// Open `<config_dir>/<name>.yaml` (or `.yml`).
    pub fn open(name: &str, config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref();
        let path = ["yaml", "yml"]
            .iter()
            .map(|ext| config_dir.join(format!("{}.{}", name, ext)))
            .find(|p| p.is_file())
            .ok_or_else(|| ConfigError::ConfigNotFound {
                name: name.to_string(),
                dir: config_dir.to_path_buf(),
            })?;

        debug!("Loading configuration from {:?}", path);
        let text = fs::read_to_string(&path)?;
        Self::parse(name, path, &text)
    }

    /// Parse configuration text; an empty file is an empty configuration.
    pub fn parse(name: &str, path: PathBuf, text: &str) -> ConfigResult<Self> {
        let content = match parse_document(text)? {
            Value::Null => Context::new(),
            Value::Object(map) => map,
            other => {
                return Err(ConfigError::InvalidSection {
                    section: name.to_string(),
                    message: format!("configuration file must be a mapping, found {}", other),
                })
            }
        };
        Ok(Self {
            name: name.to_string(),
            path,
            content,
        })
    }

    /// Environments declared at the top level.
    pub fn environments(&self) -> BTreeSet<String> {
        string_list(self.content.get("environments"))
    }

    fn include_order(&self) -> Vec<String> {
        match self.content.get("includes") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    fn section(&self, section: &str, environment: Option<&str>) -> Option<&Value> {
        match environment {
            None => self.content.get(section),
            Some(env) => self
                .content
                .get("environment")
                .and_then(|e| e.get(env))
                .and_then(|e| e.get(section)),
        }
    }

    /// Load this file and everything it includes, depth first.
    pub fn load_includes(self, config_dir: impl AsRef<Path>) -> ConfigResult<Includes> {
        let config_dir = config_dir.as_ref();
        let environments = self.environments();
        let mut layers = Vec::new();
        let mut stack = vec![self.name.clone()];
        collect_layers(self, config_dir, &mut stack, &mut layers)?;
        info!(
            "Loaded {} configuration file(s): {}",
            layers.len(),
            layers.iter().map(|l| l.name.as_str()).collect::<Vec<_>>().join(", ")
        );
        Ok(Includes {
            layers,
            environments,
        })
    }
}

fn collect_layers(
    file: ConfigFile,
    config_dir: &Path,
    stack: &mut Vec<String>,
    layers: &mut Vec<ConfigFile>,
) -> ConfigResult<()> {
    for include in file.include_order() {
        if stack.contains(&include) {
            stack.push(include);
            return Err(ConfigError::IncludeCycle(stack.join(" -> ")));
        }
        if layers.iter().any(|l| l.name == include) {
            continue;
        }
        let included = ConfigFile::open(&include, config_dir)?;
        stack.push(include);
        collect_layers(included, config_dir, stack, layers)?;
        stack.pop();
    }
    layers.push(file);
    Ok(())
}

fn string_list(value: Option<&Value>) -> BTreeSet<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Some(Value::String(s)) => BTreeSet::from([s.clone()]),
        _ => BTreeSet::new(),
    }
}

/// A configuration file together with its includes.
#[derive(Debug, Clone)]
pub struct Includes {
    layers: Vec<ConfigFile>,
    environments: BTreeSet<String>,
}

impl Includes {
    /// A single in-memory configuration without includes.
    pub fn from_yaml(text: &str) -> ConfigResult<Self> {
        let file = ConfigFile::parse("<inline>", PathBuf::new(), text)?;
        Ok(Self {
            environments: file.environments(),
            layers: vec![file],
        })
    }
}

impl SectionLoader for Includes {
    fn fetch_section(
        &self,
        section: &str,
        environment: &str,
        defaults: &Context,
    ) -> ConfigResult<Value> {
        let mut merged = defaults.clone();
        let mut defined = !defaults.is_empty();

        for layer in &self.layers {
            for scope in [None, Some(environment)] {
                match layer.section(section, scope) {
                    None | Some(Value::Null) => {}
                    Some(Value::Object(values)) => {
                        defined = true;
                        for (k, v) in values {
                            merged.insert(k.clone(), v.clone());
                        }
                    }
                    Some(other) => return Ok(other.clone()),
                }
            }
        }

        Ok(if defined {
            Value::Object(merged)
        } else {
            Value::Null
        })
    }

    fn fetch_set(&self, section: &str, environment: &str) -> ConfigResult<BTreeSet<String>> {
        let mut set = BTreeSet::new();
        for layer in &self.layers {
            set.extend(string_list(layer.section(section, None)));
            set.extend(string_list(layer.section(section, Some(environment))));
        }
        Ok(set)
    }

    fn environments(&self) -> BTreeSet<String> {
        self.environments.clone()
    }
}
