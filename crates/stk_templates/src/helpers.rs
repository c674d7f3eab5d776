//! Template helpers.
//!
//! Helpers are named functions callable from the document template:
//!
//! ```yaml
//! Resources:
//!   {{resourcify name}}Role:
//!     Properties:
//!       Tags: {{tags Component="api"}}
//!       UserData: {{include_file "init.sh" padding=10}}
//! ```
//!
//! The core helpers are always available. Custom helpers live in a
//! [`HelperRegistry`] and are enabled per configuration through its
//! `helpers` set; every enabled name must be registered before rendering.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use handlebars::{
    Context as HbContext, Handlebars, Helper as HbHelper, HelperDef, HelperResult, Output,
    RenderContext, RenderError, RenderErrorReason, ScopedJson,
};
use regex::Regex;
use serde_json::{Map, Value};
use stk_config::{render_template, render_value, Tags};
use tracing::debug;

use crate::error::{HelperFailure, TemplateError, TemplateResult};
use crate::multipart;
use crate::provider::{EntryKind, TemplateProvider};
use crate::rendered::RenderFailure;
use crate::upload::Uploader;

/// A named function callable from templates.
pub trait Helper: Send + Sync {
    /// Evaluate with positional `args` and keyword `kwargs`.
    fn call(
        &self,
        ctx: &HelperContext<'_, '_>,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> anyhow::Result<Value>;
}

/// Services shared by every helper of a renderer.
#[derive(Clone)]
pub struct HelperServices {
    pub provider: Arc<dyn TemplateProvider>,
    pub uploader: Option<Arc<dyn Uploader>>,
    pub tags: Tags,
}

impl HelperServices {
    pub fn new(provider: Arc<dyn TemplateProvider>) -> Self {
        Self {
            provider,
            uploader: None,
            tags: Tags::default(),
        }
    }
}

/// What a helper sees while it runs.
pub struct HelperContext<'a, 'reg> {
    vars: &'a Value,
    registry: &'a Handlebars<'reg>,
    services: &'a HelperServices,
}

impl<'a, 'reg> HelperContext<'a, 'reg> {
    /// Variables the template is being rendered with.
    pub fn vars(&self) -> &Value {
        self.vars
    }

    pub fn provider(&self) -> &dyn TemplateProvider {
        self.services.provider.as_ref()
    }

    pub fn tags(&self) -> &Tags {
        &self.services.tags
    }

    pub fn uploader(&self) -> anyhow::Result<&dyn Uploader> {
        self.services
            .uploader
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no uploader configured"))
    }

    /// Render a file from the template root against the template variables
    /// plus `extra_vars`.
    ///
    /// A failure keeps the file's own frames so diagnostics can point into it.
    pub fn render_file(&self, path: &str, extra_vars: &Map<String, Value>) -> anyhow::Result<String> {
        let bytes = self.provider().content(path)?;
        let source = String::from_utf8(bytes)
            .map_err(|e| anyhow::anyhow!("{} is not valid UTF-8: {}", path, e))?;

        let mut data = self.vars.as_object().cloned().unwrap_or_default();
        for (k, v) in extra_vars {
            data.insert(k.clone(), v.clone());
        }

        render_template(self.registry, &source, &Value::Object(data))
            .map_err(|e| anyhow::Error::new(RenderFailure::from_render_error(&e, path)))
    }
}

/// Custom helpers available to configurations, keyed by name.
#[derive(Default, Clone)]
pub struct HelperRegistry {
    helpers: HashMap<String, Arc<dyn Helper>>,
}

impl HelperRegistry {
    pub fn new() -> Self {
        Self {
            helpers: HashMap::new(),
        }
    }

    /// Register a helper; an existing helper with the same name is replaced.
    pub fn register(&mut self, name: impl Into<String>, helper: Arc<dyn Helper>) {
        let name = name.into();
        debug!("Registering helper: {}", name);
        self.helpers.insert(name, helper);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Helper>> {
        self.helpers.get(name).cloned()
    }

    /// Get a helper, failing with the registered names when it is unknown.
    pub fn get_required(&self, name: &str) -> TemplateResult<Arc<dyn Helper>> {
        self.get(name).ok_or_else(|| TemplateError::UnknownHelper {
            name: name.to_string(),
            available: {
                let names = self.names();
                if names.is_empty() {
                    "none".to_string()
                } else {
                    names.join(", ")
                }
            },
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.helpers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.helpers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.helpers.is_empty()
    }
}

impl fmt::Debug for HelperRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelperRegistry")
            .field("helpers", &self.names())
            .finish()
    }
}

/// The helpers every template can use.
pub fn core_helpers() -> Vec<(&'static str, Arc<dyn Helper>)> {
    vec![
        ("resourcify", Arc::new(Resourcify) as Arc<dyn Helper>),
        ("tags", Arc::new(TagList) as Arc<dyn Helper>),
        ("include_file", Arc::new(IncludeFile) as Arc<dyn Helper>),
        ("upload_file", Arc::new(UploadFile) as Arc<dyn Helper>),
        ("user_data", Arc::new(UserData) as Arc<dyn Helper>),
    ]
}

/// Expose `helper` to Handlebars under `name`.
pub(crate) fn register(
    registry: &mut Handlebars<'static>,
    name: &str,
    helper: Arc<dyn Helper>,
    services: &Arc<HelperServices>,
) {
    registry.register_helper(
        name,
        Box::new(HelperAdapter {
            name: name.to_string(),
            helper,
            services: Arc::clone(services),
        }),
    );
}

struct HelperAdapter {
    name: String,
    helper: Arc<dyn Helper>,
    services: Arc<HelperServices>,
}

impl HelperAdapter {
    fn failure(&self, error: anyhow::Error) -> RenderError {
        let failure = match error.downcast_ref::<RenderFailure>() {
            Some(nested) => HelperFailure {
                helper: self.name.clone(),
                message: nested.message.clone(),
                frames: nested.frames.clone(),
            },
            None => HelperFailure {
                helper: self.name.clone(),
                message: format!("{:#}", error),
                frames: Vec::new(),
            },
        };
        RenderErrorReason::NestedError(Box::new(failure)).into()
    }
}

impl HelperDef for HelperAdapter {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &HbHelper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc HbContext,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let args: Vec<Value> = h.params().iter().map(|p| p.value().clone()).collect();
        let kwargs: Map<String, Value> = h
            .hash()
            .iter()
            .map(|(k, v)| (k.to_string(), v.value().clone()))
            .collect();

        let context = HelperContext {
            vars: ctx.data(),
            registry: r,
            services: &self.services,
        };

        self.helper
            .call(&context, &args, &kwargs)
            .map(ScopedJson::Derived)
            .map_err(|e| self.failure(e))
    }

    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &HbHelper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc HbContext,
        rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let value = self.call_inner(h, r, ctx, rc)?;
        out.write(&render_value(value.as_json()))?;
        Ok(())
    }
}

fn string_arg<'v>(args: &'v [Value], index: usize, what: &str) -> anyhow::Result<&'v str> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing {} (argument {})", what, index + 1))
}

/// `{{resourcify "my-app_name"}}` -> `MyAppName`
pub struct Resourcify;

impl Resourcify {
    pub fn apply(name: &str) -> String {
        static SEPARATORS: OnceLock<Regex> = OnceLock::new();
        static WORDS: OnceLock<Regex> = OnceLock::new();

        let separators = SEPARATORS.get_or_init(|| Regex::new(r"[_-]+").expect("static pattern"));
        let words = WORDS.get_or_init(|| Regex::new(r"(?:\A|\W)+(\w)").expect("static pattern"));

        let spaced = separators.replace_all(name, " ");
        words
            .replace_all(&spaced, |caps: &regex::Captures| caps[1].to_uppercase())
            .replace(' ', "")
    }
}

impl Helper for Resourcify {
    fn call(&self, _: &HelperContext<'_, '_>, args: &[Value], _: &Map<String, Value>) -> anyhow::Result<Value> {
        let name = match args.first() {
            Some(Value::String(s)) => s.clone(),
            Some(other) => render_value(other),
            None => anyhow::bail!("missing name (argument 1)"),
        };
        Ok(Value::String(Self::apply(&name)))
    }
}

/// `{{tags Extra="x" extra_attributes=(...)}}`: configured tags merged with
/// keyword tags, as a `[{Key, Value}]` list.
pub struct TagList;

impl Helper for TagList {
    fn call(&self, ctx: &HelperContext<'_, '_>, _: &[Value], kwargs: &Map<String, Value>) -> anyhow::Result<Value> {
        let mut merged: Map<String, Value> = (**ctx.tags()).clone();
        let mut extra_attributes = Map::new();

        for (k, v) in kwargs {
            if k == "extra_attributes" {
                extra_attributes = v
                    .as_object()
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("extra_attributes must be a mapping, found {}", v))?;
            } else {
                merged.insert(k.clone(), v.clone());
            }
        }

        Ok(Value::Array(Tags::from_values(merged).to_list(&extra_attributes)))
    }
}

/// `{{include_file "init.sh" padding=8 prefix="\n" extra=...}}`: renders
/// `files/<name>` and indents every line.
pub struct IncludeFile;

impl IncludeFile {
    const DEFAULT_PADDING: usize = 8;
}

impl Helper for IncludeFile {
    fn call(&self, ctx: &HelperContext<'_, '_>, args: &[Value], kwargs: &Map<String, Value>) -> anyhow::Result<Value> {
        let name = string_arg(args, 0, "file name")?;

        let padding = match kwargs.get("padding") {
            None => Self::DEFAULT_PADDING,
            Some(v) => v
                .as_u64()
                .map(|p| p as usize)
                .ok_or_else(|| anyhow::anyhow!("padding must be a number, found {}", v))?,
        };
        let prefix = match kwargs.get("prefix") {
            None => "\n".to_string(),
            Some(v) => render_value(v),
        };

        let extra_vars: Map<String, Value> = kwargs
            .iter()
            .filter(|(k, _)| k.as_str() != "padding" && k.as_str() != "prefix")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let rendered = ctx.render_file(&format!("files/{}", name), &extra_vars)?;

        let indent = " ".repeat(padding);
        let mut out = prefix;
        for line in rendered.lines() {
            out.push_str(&indent);
            out.push_str(line);
            out.push('\n');
        }
        if rendered.lines().next().is_none() {
            out.push('\n');
        }
        Ok(Value::String(out))
    }
}

/// `{{upload_file "files/app.zip" returns="s3-uri"}}`
pub struct UploadFile;

impl Helper for UploadFile {
    fn call(&self, ctx: &HelperContext<'_, '_>, args: &[Value], kwargs: &Map<String, Value>) -> anyhow::Result<Value> {
        let path = string_arg(args, 0, "file path")?;
        let returns = kwargs.get("returns").and_then(Value::as_str).unwrap_or("key");
        if !matches!(returns, "key" | "s3-uri" | "http-uri") {
            anyhow::bail!(
                "Unknown 'returns' value {} - expect one of (key, s3-uri, http-uri)",
                returns
            );
        }

        let content = ctx.provider().content(path)?;
        let uploaded = ctx.uploader()?.upload(path, &content)?;

        Ok(Value::String(match returns {
            "s3-uri" => uploaded.as_s3(),
            "http-uri" => uploaded.as_http(),
            _ => uploaded.key,
        }))
    }
}

/// `{{user_data "web" extra=...}}`: renders every file of `user_data/<name>/`,
/// joins them as a MIME multipart message and returns it as
/// `{"Fn::Base64": {"Fn::Join": ["", lines]}}`.
///
/// JSON fragments written as `<<{"Ref": "Bucket"}>>` become elements of the
/// join list, so user data can reference template resources.
pub struct UserData;

impl Helper for UserData {
    fn call(&self, ctx: &HelperContext<'_, '_>, args: &[Value], kwargs: &Map<String, Value>) -> anyhow::Result<Value> {
        let dir = format!("user_data/{}", string_arg(args, 0, "user data name")?.to_lowercase());
        if !ctx.provider().is_tree(&dir) {
            anyhow::bail!("{} is not a directory", dir);
        }

        let mut parts = Vec::new();
        for entry in ctx.provider().list(&dir)? {
            if entry.kind != EntryKind::File {
                anyhow::bail!("user_data(): {} is not a regular file", entry.name);
            }
            let content = ctx.render_file(&format!("{}/{}", dir, entry.name), kwargs)?;
            parts.push((entry.name, content));
        }
        debug!("user data {}: {} parts", dir, parts.len());

        let encoded = multipart::encode(&parts);
        let mut lines = Vec::new();
        for line in encoded.split_inclusive('\n') {
            lines.extend(multipart::split_fragments(line)?);
        }

        Ok(serde_json::json!({"Fn::Base64": {"Fn::Join": ["", lines]}}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Shout;

    impl Helper for Shout {
        fn call(&self, _: &HelperContext<'_, '_>, args: &[Value], _: &Map<String, Value>) -> anyhow::Result<Value> {
            Ok(Value::String(string_arg(args, 0, "text")?.to_uppercase()))
        }
    }

    #[test]
    fn test_resourcify() {
        assert_eq!(Resourcify::apply("my-app_name"), "MyAppName");
        assert_eq!(Resourcify::apply("web server"), "WebServer");
        assert_eq!(Resourcify::apply("api.v2"), "ApiV2");
        assert_eq!(Resourcify::apply("Already"), "Already");
    }

    #[test]
    fn test_registry() {
        let mut registry = HelperRegistry::new();
        assert!(registry.is_empty());

        registry.register("shout", Arc::new(Shout));
        registry.register("loud", Arc::new(Shout));

        assert!(registry.contains("shout"));
        assert_eq!(registry.names(), vec!["loud", "shout"]);
        assert!(registry.get_required("shout").is_ok());

        let err = registry.get_required("quiet").err().unwrap();
        assert_eq!(
            err.to_string(),
            "Unknown helper 'quiet' - only loud, shout are registered"
        );
    }

    #[test]
    fn test_core_helper_names() {
        let names: Vec<&str> = core_helpers().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["resourcify", "tags", "include_file", "upload_file", "user_data"]);
    }
}
