//! Handlebars registry shared by expressions and document templates.

use std::borrow::Cow;
use std::sync::OnceLock;

use handlebars::{
    handlebars_helper, no_escape, Context as HbContext, Handlebars, Helper, HelperDef,
    HelperResult, JsonTruthy, Output, RenderContext, RenderError, RenderErrorReason, Renderable,
};
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::Value;

use crate::value::to_plain_string;

/// Helper every bare `{{path}}` expression is routed through.
const VALUE_HELPER: &str = "__value";

handlebars_helper!(json: |v: Json| v.to_string());
handlebars_helper!(upper: |s: str| s.to_uppercase());
handlebars_helper!(lower: |s: str| s.to_lowercase());
handlebars_helper!(replace: |s: str, from: str, to: str| s.replace(from, to));
handlebars_helper!(join: |items: array, sep: str| {
    items.iter().map(to_plain_string).collect::<Vec<_>>().join(sep)
});

/// Build a strict, non-escaping registry with the standard filters.
///
/// Referencing an undefined name is an error, including in `if`/`unless`
/// conditions. Output is never HTML-escaped since rendered text is parsed as
/// YAML afterwards.
pub fn strict_registry() -> Handlebars<'static> {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    registry.register_escape_fn(no_escape);

    registry.register_helper("if", Box::new(StrictIf { positive: true }));
    registry.register_helper("unless", Box::new(StrictIf { positive: false }));
    registry.register_helper(VALUE_HELPER, Box::new(ValueHelper));

    registry.register_helper("json", Box::new(json));
    registry.register_helper("upper", Box::new(upper));
    registry.register_helper("lower", Box::new(lower));
    registry.register_helper("replace", Box::new(replace));
    registry.register_helper("join", Box::new(join));

    registry
}

/// Render `source` against `data`.
///
/// Mappings and lists substituted by a bare `{{path}}` are written as JSON
/// flow, so they read back as the same structure.
pub fn render_template<T: Serialize>(
    registry: &Handlebars<'_>,
    source: &str,
    data: &T,
) -> Result<String, RenderError> {
    registry.render_template(&route_bare_paths(registry, source), data)
}

/// Rewrite `{{a.b}}` to `{{__value a.b}}` unless the name is a helper.
fn route_bare_paths<'s>(registry: &Handlebars<'_>, source: &'s str) -> Cow<'s, str> {
    static BARE_PATH: OnceLock<Regex> = OnceLock::new();
    let bare_path = BARE_PATH.get_or_init(|| {
        Regex::new(r"(\{\{~?\s*)([A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z0-9_\-]+)*)(\s*~?\}\})")
            .expect("static pattern")
    });

    bare_path.replace_all(source, |caps: &Captures| {
        let path = &caps[2];
        if path == "else" || registry.has_helper(path) {
            caps[0].to_string()
        } else {
            format!("{}{} {}{}", &caps[1], VALUE_HELPER, path, &caps[3])
        }
    })
}

/// Text a helper result should contribute to the output.
///
/// Strings are written verbatim; structured values are written as JSON, which
/// the YAML parser reads back as flow syntax.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

struct ValueHelper;

impl HelperDef for ValueHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc HbContext,
        _: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let param = h
            .param(0)
            .ok_or(RenderErrorReason::ParamNotFoundForIndex(VALUE_HELPER, 0))?;
        if param.is_value_missing() {
            return Err(RenderErrorReason::MissingVariable(param.relative_path().cloned()).into());
        }
        out.write(&render_value(param.value()))?;
        Ok(())
    }
}

/// `if`/`unless` that fail on an undefined condition instead of treating it
/// as false.
struct StrictIf {
    positive: bool,
}

impl HelperDef for StrictIf {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc HbContext,
        rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let name = if self.positive { "if" } else { "unless" };
        let param = h.param(0).ok_or(RenderErrorReason::ParamNotFoundForIndex(name, 0))?;
        if param.is_value_missing() {
            return Err(RenderErrorReason::MissingVariable(param.relative_path().cloned()).into());
        }

        let include_zero = h
            .hash_get("includeZero")
            .and_then(|v| v.value().as_bool())
            .unwrap_or(false);
        let taken = param.value().is_truthy(include_zero) == self.positive;

        let branch = if taken { h.template() } else { h.inverse() };
        match branch {
            Some(template) => template.render(r, ctx, rc, out),
            None => Ok(()),
        }
    }
}
