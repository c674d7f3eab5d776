//! Expression rendering.
//!
//! A raw configuration value is rendered as a Handlebars expression against a
//! fixed context and the output is parsed back as YAML, so `"{{count}}"`
//! yields a number and `"[{{a}}, {{b}}]"` yields a list.

use std::sync::Arc;

use handlebars::Handlebars;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::trace;

use crate::engine::{render_template, strict_registry};
use crate::refs::StackRefs;
use crate::value::{parse_document, Context};

/// Why a single expression could not be rendered.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("{0}")]
    Render(String),

    #[error("rendered text {text:?} is not valid YAML: {message}")]
    Parse { text: String, message: String },
}

/// Renders raw values against a context.
pub struct ExpressionRenderer {
    registry: Handlebars<'static>,
}

impl Default for ExpressionRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionRenderer {
    /// Renderer with the standard filters only.
    pub fn new() -> Self {
        Self {
            registry: strict_registry(),
        }
    }

    /// Renderer that can also look up stack references.
    pub fn with_refs(refs: Arc<StackRefs>) -> Self {
        let mut registry = strict_registry();
        StackRefs::register_helpers(&refs, &mut registry);
        Self { registry }
    }

    /// Render one raw value.
    ///
    /// Strings are expressions. Lists and mappings are rendered element by
    /// element. Booleans, numbers and null are returned unchanged.
    pub fn render(&self, context: &Context, raw: &Value) -> Result<Value, ExpressionError> {
        match raw {
            Value::String(expression) => self.render_str(context, expression),
            Value::Array(items) => items
                .iter()
                .map(|item| self.render(context, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(entries) => {
                let mut rendered = Map::new();
                for (key, value) in entries {
                    rendered.insert(key.clone(), self.render(context, value)?);
                }
                Ok(Value::Object(rendered))
            }
            other => Ok(other.clone()),
        }
    }

    /// Render a string expression and parse the output.
    pub fn render_str(&self, context: &Context, expression: &str) -> Result<Value, ExpressionError> {
        let text = render_template(&self.registry, expression, context)
            .map_err(|e| ExpressionError::Render(e.reason().to_string()))?;

        trace!("rendered {:?} -> {:?}", expression, text);

        parse_document(&text).map_err(|e| ExpressionError::Parse {
            text,
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Context {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_recovers_types() {
        let renderer = ExpressionRenderer::new();
        let context = ctx(json!({"flag": true, "count": 3, "name": "web"}));

        assert_eq!(renderer.render_str(&context, "{{flag}}").unwrap(), json!(true));
        assert_eq!(renderer.render_str(&context, "{{count}}").unwrap(), json!(3));
        assert_eq!(renderer.render_str(&context, "{{name}}-1").unwrap(), json!("web-1"));
        assert_eq!(
            renderer.render_str(&context, "[{{name}}, {{count}}]").unwrap(),
            json!(["web", 3])
        );
        assert_eq!(
            renderer.render_str(&context, "{a: {{count}}}").unwrap(),
            json!({"a": 3})
        );
    }

    #[test]
    fn test_undefined_is_an_error() {
        let renderer = ExpressionRenderer::new();
        let err = renderer.render_str(&Context::new(), "{{nope}}").unwrap_err();
        assert!(matches!(err, ExpressionError::Render(_)));
    }

    #[test]
    fn test_non_templated_types_pass_through() {
        let renderer = ExpressionRenderer::new();
        let context = Context::new();

        assert_eq!(renderer.render(&context, &json!(42)).unwrap(), json!(42));
        assert_eq!(renderer.render(&context, &json!(null)).unwrap(), json!(null));
        assert_eq!(renderer.render(&context, &json!(false)).unwrap(), json!(false));
    }

    #[test]
    fn test_structured_values_render_each_element() {
        let renderer = ExpressionRenderer::new();
        let context = ctx(json!({"env": "dev"}));

        let raw = json!({"name": "{{env}}-db", "ports": ["80", 443], "nested": {"on": "true"}});
        assert_eq!(
            renderer.render(&context, &raw).unwrap(),
            json!({"name": "dev-db", "ports": [80, 443], "nested": {"on": true}})
        );
    }

    #[test]
    fn test_conditionals() {
        let renderer = ExpressionRenderer::new();
        let context = ctx(json!({"environment": "prod"}));

        let expr = "{{#if (eq environment \"prod\")}}3{{else}}1{{/if}}";
        assert_eq!(renderer.render_str(&context, expr).unwrap(), json!(3));
    }

    #[test]
    fn test_aliases_keep_structure() {
        let renderer = ExpressionRenderer::new();
        let context = ctx(json!({
            "net": {"cidr": "10.0.0.0/16", "az": "a"},
            "zones": ["a, b", "c"],
            "flags": ["true", "012"],
        }));

        assert_eq!(
            renderer.render_str(&context, "{{net}}").unwrap(),
            json!({"cidr": "10.0.0.0/16", "az": "a"})
        );
        assert_eq!(renderer.render_str(&context, "{{zones}}").unwrap(), json!(["a, b", "c"]));
        assert_eq!(renderer.render_str(&context, "{{flags}}").unwrap(), json!(["true", "012"]));
        assert_eq!(
            renderer.render_str(&context, "{cfg: {{net}}, extra: {{zones}} }").unwrap(),
            json!({"cfg": {"cidr": "10.0.0.0/16", "az": "a"}, "extra": ["a, b", "c"]})
        );
    }

    #[test]
    fn test_undefined_condition_is_an_error() {
        let renderer = ExpressionRenderer::new();
        let err = renderer
            .render_str(&Context::new(), "{{#if prod}}large{{else}}small{{/if}}")
            .unwrap_err();
        assert!(matches!(err, ExpressionError::Render(ref message) if message.contains("prod")));
    }

    #[test]
    fn test_empty_render_is_null() {
        let renderer = ExpressionRenderer::new();
        let context = ctx(json!({"flag": false}));

        let expr = "{{#if flag}}x{{/if}}";
        assert_eq!(renderer.render_str(&context, expr).unwrap(), Value::Null);
    }
}
