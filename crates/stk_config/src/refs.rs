//! References to externally deployed stacks.
//!
//! The `refs` section names other stacks whose outputs this configuration
//! consumes. Handles are built on first access, and each handle asks the
//! stack-state provider about its target at most once: infrastructure state is
//! assumed not to change while a configuration is being resolved.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use handlebars::{
    Context as HbContext, Handlebars, Helper, HelperDef, RenderContext, RenderError,
    RenderErrorReason, ScopedJson,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{display_raw, ConfigError, ConfigResult};
use crate::expression::ExpressionRenderer;
use crate::interpolated::InterpolatedMap;
use crate::value::{coerce_bool, Context};

/// Source of truth for deployed stacks.
#[cfg_attr(test, mockall::automock)]
pub trait StackStateProvider: Send + Sync {
    /// Whether a stack with this identifier is deployed.
    fn stack_exists(&self, identifier: &str) -> anyhow::Result<bool>;

    /// Outputs published by a deployed stack.
    fn stack_outputs(&self, identifier: &str) -> anyhow::Result<BTreeMap<String, String>>;
}

/// Default target name; `name` is the reference name with `_` mapped to `-`.
pub const DEFAULT_STACK_NAME: &str = "{{environment}}-{{name}}";

/// Options a reference may set.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct StackRefOptions {
    stack_name: String,
    optional: Value,
}

/// What the provider reported about a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDescription {
    pub exists: bool,
    pub outputs: BTreeMap<String, String>,
}

/// A resolved reference to one external stack.
pub struct StackHandle {
    name: String,
    target: String,
    optional: bool,
    provider: Arc<dyn StackStateProvider>,
    description: OnceLock<StackDescription>,
}

impl StackHandle {
    pub fn new(
        name: impl Into<String>,
        target: impl Into<String>,
        optional: bool,
        provider: Arc<dyn StackStateProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            optional,
            provider,
            description: OnceLock::new(),
        }
    }

    /// Reference name as declared in `refs`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier of the deployed stack.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn optional(&self) -> bool {
        self.optional
    }

    /// Describe the target, asking the provider only the first time.
    pub fn describe(&self) -> ConfigResult<&StackDescription> {
        if let Some(description) = self.description.get() {
            return Ok(description);
        }

        let lookup_failed = |e: anyhow::Error| ConfigError::StackState {
            target: self.target.clone(),
            message: format!("{:#}", e),
        };

        let exists = self.provider.stack_exists(&self.target).map_err(lookup_failed)?;
        let outputs = if exists {
            self.provider.stack_outputs(&self.target).map_err(lookup_failed)?
        } else {
            BTreeMap::new()
        };
        debug!("described stack {}: exists={}", self.target, exists);

        Ok(self
            .description
            .get_or_init(|| StackDescription { exists, outputs }))
    }

    pub fn exists(&self) -> ConfigResult<bool> {
        Ok(self.describe()?.exists)
    }

    /// Look up a published output of an existing stack.
    pub fn output(&self, output: &str) -> ConfigResult<String> {
        let description = self.describe()?;
        description
            .outputs
            .get(output)
            .cloned()
            .ok_or_else(|| ConfigError::OutputNotFound {
                output: output.to_string(),
                target: self.target.clone(),
                available: description
                    .outputs
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

impl fmt::Debug for StackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackHandle")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("optional", &self.optional)
            .field("description", &self.description.get())
            .finish()
    }
}

/// Registry of the stacks named in `refs`.
pub struct StackRefs {
    specs: BTreeMap<String, Value>,
    environment: String,
    provider: Arc<dyn StackStateProvider>,
    stacks: OnceLock<BTreeMap<String, StackHandle>>,
}

impl StackRefs {
    /// Create a registry; nothing is resolved until the first lookup.
    pub fn new(
        specs: BTreeMap<String, Value>,
        environment: impl Into<String>,
        provider: Arc<dyn StackStateProvider>,
    ) -> Self {
        debug!("defined refs: {:?}", specs.keys().collect::<Vec<_>>());
        Self {
            specs,
            environment: environment.into(),
            provider,
            stacks: OnceLock::new(),
        }
    }

    /// Build a registry from a raw `refs` section (null means no references).
    pub fn from_section(
        section: &Value,
        environment: impl Into<String>,
        provider: Arc<dyn StackStateProvider>,
    ) -> ConfigResult<Self> {
        let specs = match section {
            Value::Null => BTreeMap::new(),
            Value::Object(entries) => entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            other => {
                return Err(ConfigError::InvalidSection {
                    section: "refs".to_string(),
                    message: format!("expected a mapping, found {}", other),
                })
            }
        };
        Ok(Self::new(specs, environment, provider))
    }

    /// Declared reference names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.specs.keys().map(|k| k.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    /// The handle for `name`.
    ///
    /// Unknown names are rejected before the registry is built, so a malformed
    /// spec only surfaces when a declared reference is looked up.
    pub fn stack(&self, name: &str) -> ConfigResult<&StackHandle> {
        let unknown = || ConfigError::UnknownReference {
            name: name.to_string(),
            available: self.names().join(", "),
        };
        if !self.contains(name) {
            return Err(unknown());
        }
        self.stacks()?.get(name).ok_or_else(unknown)
    }

    pub fn exists(&self, name: &str) -> ConfigResult<bool> {
        self.stack(name)?.exists()
    }

    /// Output `output` of reference `name`.
    ///
    /// Returns `None` when an optional reference is not deployed.
    pub fn output(&self, name: &str, output: &str) -> ConfigResult<Option<String>> {
        info!("getting output {} from stack {}", output, name);
        let stack = self.stack(name)?;

        if !stack.exists()? {
            if stack.optional() {
                info!("stack {} does not exist, but is optional", stack.target());
                return Ok(None);
            }
            return Err(ConfigError::ReferenceMissing {
                name: name.to_string(),
                target: stack.target().to_string(),
            });
        }

        stack.output(output).map(Some)
    }

    fn stacks(&self) -> ConfigResult<&BTreeMap<String, StackHandle>> {
        if let Some(stacks) = self.stacks.get() {
            return Ok(stacks);
        }

        let renderer = ExpressionRenderer::new();
        let mut stacks = BTreeMap::new();
        for (name, spec) in &self.specs {
            let handle = self.build_handle(name, spec, &renderer)?;
            info!("stack reference {}: {} (optional={})", name, handle.target(), handle.optional());
            stacks.insert(name.clone(), handle);
        }

        Ok(self.stacks.get_or_init(|| stacks))
    }

    fn build_handle(
        &self,
        name: &str,
        spec: &Value,
        renderer: &ExpressionRenderer,
    ) -> ConfigResult<StackHandle> {
        let invalid = |message: String| ConfigError::InvalidReference {
            name: name.to_string(),
            spec: display_raw(spec),
            message,
        };

        let mut options = Context::new();
        options.insert("stack_name".to_string(), json!(DEFAULT_STACK_NAME));
        options.insert("optional".to_string(), json!(false));
        match spec {
            Value::Null => {}
            Value::Object(overrides) => {
                for (k, v) in overrides {
                    options.insert(k.clone(), v.clone());
                }
            }
            _ => return Err(invalid("expected a mapping of options".to_string())),
        }

        let mut context = Context::new();
        context.insert("environment".to_string(), json!(self.environment));
        context.insert("name".to_string(), json!(name.replace('_', "-")));

        let interpolated = InterpolatedMap::new(
            &format!("refs.{}", name),
            &Value::Object(options),
            &context,
            renderer,
        )
        .map_err(|e| invalid(e.to_string()))?;

        let options: StackRefOptions = serde_json::from_value(Value::Object(interpolated.into_inner()))
            .map_err(|e| invalid(e.to_string()))?;

        let optional = coerce_bool(&options.optional).ok_or_else(|| {
            invalid(format!("optional must be true or false, found {}", options.optional))
        })?;

        Ok(StackHandle::new(name, options.stack_name, optional, Arc::clone(&self.provider)))
    }

    /// Expose `ref_output` and `ref_exists` to expressions and templates.
    pub fn register_helpers(refs: &Arc<StackRefs>, registry: &mut Handlebars<'static>) {
        registry.register_helper(
            "ref_output",
            Box::new(RefOutputHelper {
                refs: Arc::clone(refs),
            }),
        );
        registry.register_helper(
            "ref_exists",
            Box::new(RefExistsHelper {
                refs: Arc::clone(refs),
            }),
        );
    }
}

impl fmt::Debug for StackRefs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackRefs")
            .field("environment", &self.environment)
            .field("refs", &self.specs.keys().collect::<BTreeSet<_>>())
            .field("resolved", &self.stacks.get().is_some())
            .finish()
    }
}

fn string_param<'a>(h: &'a Helper<'_>, index: usize) -> Result<&'a str, RenderError> {
    h.param(index)
        .and_then(|p| p.value().as_str())
        .ok_or_else(|| {
            RenderErrorReason::ParamNotFoundForIndex(
                if index == 0 { "reference name" } else { "output name" },
                index,
            )
            .into()
        })
}

fn lookup_failed(e: ConfigError) -> RenderError {
    RenderErrorReason::NestedError(Box::new(e)).into()
}

/// `{{ref_output "network" "VpcId"}}`
struct RefOutputHelper {
    refs: Arc<StackRefs>,
}

impl HelperDef for RefOutputHelper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc HbContext,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let name = string_param(h, 0)?;
        let output = string_param(h, 1)?;
        let value = self.refs.output(name, output).map_err(lookup_failed)?;
        Ok(ScopedJson::Derived(value.map(Value::String).unwrap_or(Value::Null)))
    }
}

/// `{{#if (ref_exists "network")}}`
struct RefExistsHelper {
    refs: Arc<StackRefs>,
}

impl HelperDef for RefExistsHelper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc HbContext,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let name = string_param(h, 0)?;
        let exists = self.refs.exists(name).map_err(lookup_failed)?;
        Ok(ScopedJson::Derived(Value::Bool(exists)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(value: Value) -> BTreeMap<String, Value> {
        value
            .as_object()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    fn missing_everywhere() -> MockStackStateProvider {
        let mut provider = MockStackStateProvider::new();
        provider.expect_stack_exists().returning(|_| Ok(false));
        provider
    }

    #[test]
    fn test_unknown_reference_lists_declared() {
        let refs = StackRefs::new(
            specs(json!({"baz": null, "bar": null})),
            "dev",
            Arc::new(missing_everywhere()),
        );

        let err = refs.stack("foo").unwrap_err();
        assert!(err.to_string().contains("only bar, baz are defined"));
    }

    #[test]
    fn test_unknown_reference_ignores_malformed_specs() {
        let mut provider = MockStackStateProvider::new();
        provider.expect_stack_exists().never();

        let refs = StackRefs::new(
            specs(json!({"bar": "not options", "baz": null})),
            "dev",
            Arc::new(provider),
        );

        let err = refs.stack("foo").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownReference { .. }));
        assert!(err.to_string().contains("only bar, baz are defined"));
        assert!(matches!(
            refs.stack("bar").unwrap_err(),
            ConfigError::InvalidReference { .. }
        ));
    }

    #[test]
    fn test_defaults_build_target_name() {
        let refs = StackRefs::new(
            specs(json!({"shared_network": null})),
            "dev",
            Arc::new(missing_everywhere()),
        );

        let stack = refs.stack("shared_network").unwrap();
        assert_eq!(stack.target(), "dev-shared-network");
        assert!(!stack.optional());
    }

    #[test]
    fn test_required_missing_names_target() {
        let refs = StackRefs::new(
            specs(json!({"foo": {"stack_name": "something-{{environment}}-else"}})),
            "dev",
            Arc::new(missing_everywhere()),
        );

        let err = refs.output("foo", "bar").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Stack config.refs[foo] (something-dev-else) does not exist, but is required"
        );
    }

    #[test]
    fn test_optional_missing_returns_none() {
        let refs = StackRefs::new(
            specs(json!({
                "foo": {"optional": true},
                "bar": {"optional": "true"},
                "baz": {"optional": "{{#if (eq environment \"dev\")}}true{{else}}false{{/if}}"},
            })),
            "dev",
            Arc::new(missing_everywhere()),
        );

        assert_eq!(refs.output("foo", "anything").unwrap(), None);
        assert_eq!(refs.output("bar", "anything").unwrap(), None);
        assert_eq!(refs.output("baz", "anything").unwrap(), None);
    }

    #[test]
    fn test_output_lookup() {
        let mut provider = MockStackStateProvider::new();
        provider
            .expect_stack_exists()
            .returning(|id| Ok(id.to_string() == "dev-network"));
        provider.expect_stack_outputs().returning(|_| {
            Ok(BTreeMap::from([("FirstOutput".to_string(), "foo".to_string())]))
        });

        let refs = StackRefs::new(specs(json!({"network": null})), "dev", Arc::new(provider));

        assert_eq!(refs.output("network", "FirstOutput").unwrap(), Some("foo".to_string()));
        let err = refs.output("network", "Missing").unwrap_err();
        assert!(matches!(err, ConfigError::OutputNotFound { ref output, .. } if output == "Missing"));
        assert!(err.to_string().contains("only FirstOutput are published"));
    }

    #[test]
    fn test_description_is_memoized() {
        let mut provider = MockStackStateProvider::new();
        provider.expect_stack_exists().times(1).returning(|_| Ok(true));
        provider
            .expect_stack_outputs()
            .times(1)
            .returning(|_| Ok(BTreeMap::from([("A".to_string(), "1".to_string())])));

        let refs = StackRefs::new(specs(json!({"network": null})), "dev", Arc::new(provider));

        assert!(refs.exists("network").unwrap());
        assert_eq!(refs.output("network", "A").unwrap(), Some("1".to_string()));
        assert_eq!(refs.output("network", "A").unwrap(), Some("1".to_string()));
    }

    #[test]
    fn test_registry_is_lazy() {
        let mut provider = MockStackStateProvider::new();
        provider.expect_stack_exists().never();

        let refs = StackRefs::new(
            specs(json!({"bad": ["not", "options"]})),
            "dev",
            Arc::new(provider),
        );

        // Construction succeeds; the malformed spec only surfaces on access.
        assert_eq!(refs.names(), vec!["bad"]);
        let err = refs.stack("bad").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidReference { ref name, .. } if name == "bad"));
    }

    #[test]
    fn test_invalid_options() {
        let refs = StackRefs::new(
            specs(json!({"foo": {"optional": "maybe"}})),
            "dev",
            Arc::new(missing_everywhere()),
        );
        assert!(matches!(
            refs.stack("foo").unwrap_err(),
            ConfigError::InvalidReference { .. }
        ));

        let refs = StackRefs::new(
            specs(json!({"foo": {"stackname": "typo"}})),
            "dev",
            Arc::new(missing_everywhere()),
        );
        assert!(matches!(
            refs.stack("foo").unwrap_err(),
            ConfigError::InvalidReference { .. }
        ));
    }

    #[test]
    fn test_provider_failure_is_reported() {
        let mut provider = MockStackStateProvider::new();
        provider
            .expect_stack_exists()
            .returning(|_| Err(anyhow::anyhow!("throttled")));

        let refs = StackRefs::new(specs(json!({"network": null})), "dev", Arc::new(provider));
        let err = refs.exists("network").unwrap_err();
        assert_eq!(err.to_string(), "Unable to describe stack dev-network: throttled");
    }

    #[test]
    fn test_helpers_in_expressions() {
        let mut provider = MockStackStateProvider::new();
        provider
            .expect_stack_exists()
            .returning(|id| Ok(id.to_string() == "dev-network"));
        provider
            .expect_stack_outputs()
            .returning(|_| Ok(BTreeMap::from([("VpcId".to_string(), "vpc-123".to_string())])));

        let refs = Arc::new(StackRefs::new(
            specs(json!({"network": null, "cache": {"optional": true}})),
            "dev",
            Arc::new(provider),
        ));
        let renderer = ExpressionRenderer::with_refs(Arc::clone(&refs));
        let ctx = Context::new();

        assert_eq!(
            renderer.render_str(&ctx, "{{ref_output \"network\" \"VpcId\"}}").unwrap(),
            json!("vpc-123")
        );
        assert_eq!(
            renderer.render_str(&ctx, "{{ref_exists \"cache\"}}").unwrap(),
            json!(false)
        );
        assert_eq!(
            renderer.render_str(&ctx, "{{ref_output \"cache\" \"Endpoint\"}}").unwrap(),
            Value::Null
        );
        assert!(renderer.render_str(&ctx, "{{ref_output \"nope\" \"x\"}}").is_err());
    }
}
