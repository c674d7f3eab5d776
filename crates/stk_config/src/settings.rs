//! Typed settings sections.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ConfigError, ConfigResult};
use crate::interpolated::InterpolatedMap;
use crate::value::Context;

fn valid_stack_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9-]+$").expect("static pattern"))
        .is_match(name)
}

/// Settings that change how the tool itself behaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoreSettings {
    pub stack_name: String,
    #[serde(default)]
    pub environments: Option<Vec<String>>,
}

impl CoreSettings {
    /// Pre-interpolation defaults for the `core` section.
    pub fn defaults() -> Context {
        let mut defaults = Context::new();
        defaults.insert(
            "stack_name".to_string(),
            json!("{{environment}}-{{replace name \"/\" \"-\"}}"),
        );
        defaults
    }

    /// Build from an interpolated `core` section, validating the stack name.
    pub fn from_map(values: InterpolatedMap) -> ConfigResult<Self> {
        let core: CoreSettings =
            serde_json::from_value(Value::Object(values.into_inner())).map_err(|e| {
                ConfigError::InvalidSection {
                    section: "core".to_string(),
                    message: e.to_string(),
                }
            })?;

        if !valid_stack_name(&core.stack_name) {
            return Err(ConfigError::InvalidStackName(core.stack_name));
        }
        Ok(core)
    }
}

/// Where the document template comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateSource {
    pub name: String,
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl TemplateSource {
    /// Pre-interpolation defaults for the `template` section.
    pub fn defaults(config_name: &str) -> Context {
        let mut defaults = Context::new();
        defaults.insert("name".to_string(), json!(config_name.replace('/', "-")));
        defaults.insert("root".to_string(), Value::Null);
        defaults
    }

    /// Build from an interpolated `template` section.
    ///
    /// An unset root means the repository root for repo sources, and the
    /// caller-supplied template path otherwise.
    pub fn from_map(values: InterpolatedMap, template_path: Option<&str>) -> ConfigResult<Self> {
        let mut source: TemplateSource = serde_json::from_value(Value::Object(values.into_inner()))
            .map_err(|e| ConfigError::InvalidSection {
                section: "template".to_string(),
                message: e.to_string(),
            })?;

        if source.root.is_none() {
            source.root = if source.repo.as_deref().is_some_and(|r| !r.is_empty()) {
                Some("/".to_string())
            } else {
                template_path.map(String::from)
            };
        }
        Ok(source)
    }

    /// Human-readable location, e.g. `templates/app` or `repo/root/app`.
    pub fn location(&self) -> String {
        let mut parts = Vec::new();
        if let Some(repo) = self.repo.as_deref().filter(|r| !r.is_empty()) {
            parts.push(repo);
        }
        if let Some(root) = self.root.as_deref() {
            parts.push(root);
        }
        parts.push(&self.name);
        parts.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(value: Value) -> InterpolatedMap {
        InterpolatedMap::from_values(value.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn test_stack_name_validation() {
        assert!(CoreSettings::from_map(values(json!({"stack_name": "dev-app-1"}))).is_ok());

        let err = CoreSettings::from_map(values(json!({"stack_name": "dev_app"}))).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Stack name dev_app is invalid. Can contain only alphanumeric characters and hyphens"
        );
    }

    #[test]
    fn test_core_rejects_unknown_keys() {
        let err = CoreSettings::from_map(values(json!({"stack_name": "a", "colour": "blue"}))).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSection { ref section, .. } if section == "core"));
    }

    #[test]
    fn test_template_root_defaults() {
        let fs = TemplateSource::from_map(values(json!({"name": "app", "root": null})), Some("templates")).unwrap();
        assert_eq!(fs.root.as_deref(), Some("templates"));
        assert_eq!(fs.location(), "templates/app");

        let git = TemplateSource::from_map(
            values(json!({"name": "app", "root": null, "repo": "git@example.com:t.git"})),
            Some("templates"),
        )
        .unwrap();
        assert_eq!(git.root.as_deref(), Some("/"));
    }

    #[test]
    fn test_template_defaults_flatten_name() {
        let defaults = TemplateSource::defaults("team/app");
        assert_eq!(defaults["name"], json!("team-app"));
        assert_eq!(defaults["root"], Value::Null);
    }
}
