//! The configuration pipeline.
//!
//! Sections are resolved in a fixed order because each stage may only see
//! what the stages before it produced:
//!
//! 1. `aws` against the process environment, then the account is verified
//! 2. base variables (`account_id`, `aws_region`, `environment`, ...)
//! 3. `core`, which adds `stack_name`
//! 4. `refs`, resolved lazily when an expression first asks for them
//! 5. `vars`, iterated to a fixed point
//! 6. `params`, exposed to templates as `params`
//! 7. `template` source and `deploy` metadata
//! 8. `tags`

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::aws::{AwsSettings, CredentialProvider};
use crate::error::{ConfigError, ConfigResult};
use crate::expression::ExpressionRenderer;
use crate::interpolated::{InterpolatedMap, Tags};
use crate::loader::{ConfigFile, SectionLoader};
use crate::metadata::DeployMetadata;
use crate::refs::{StackRefs, StackStateProvider};
use crate::settings::{CoreSettings, TemplateSource};
use crate::value::{capture_environ, insert_resolved, merge_over, Context};
use crate::vars::{VariableResolver, MAX_INTERPOLATION_DEPTH};

/// What to load and how.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub name: String,
    pub environment: String,
    pub config_path: PathBuf,
    pub template_path: Option<String>,
    pub var_overrides: Context,
    pub param_overrides: Context,
    pub environ: Option<Value>,
    pub max_interpolation_depth: usize,
}

impl LoadOptions {
    pub fn new(
        name: impl Into<String>,
        environment: impl Into<String>,
        config_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            environment: environment.into(),
            config_path: config_path.into(),
            template_path: None,
            var_overrides: Context::new(),
            param_overrides: Context::new(),
            environ: None,
            max_interpolation_depth: MAX_INTERPOLATION_DEPTH,
        }
    }

    pub fn with_template_path(mut self, path: impl Into<String>) -> Self {
        self.template_path = Some(path.into());
        self
    }

    /// Override a variable before resolution.
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.var_overrides.insert(key.into(), value.into());
        self
    }

    /// Override a parameter before interpolation.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.param_overrides.insert(key.into(), value.into());
        self
    }

    /// Use a fixed environment snapshot instead of the process environment.
    pub fn with_environ(mut self, environ: Value) -> Self {
        self.environ = Some(environ);
        self
    }

    pub fn with_max_interpolation_depth(mut self, depth: usize) -> Self {
        self.max_interpolation_depth = depth;
        self
    }

    /// Configuration name without a file extension.
    pub fn normalized_name(&self) -> String {
        for ext in [".yaml", ".yml"] {
            if let Some(stripped) = self.name.strip_suffix(ext) {
                return stripped.to_string();
            }
        }
        self.name.clone()
    }
}

/// External services the pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialProvider>,
    pub stacks: Arc<dyn StackStateProvider>,
}

impl Collaborators {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        stacks: Arc<dyn StackStateProvider>,
    ) -> Self {
        Self {
            credentials,
            stacks,
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// A fully resolved configuration.
#[derive(Debug)]
pub struct Config {
    pub name: String,
    pub environment: String,
    pub config_path: PathBuf,
    pub aws: AwsSettings,
    pub core: CoreSettings,
    pub refs: Arc<StackRefs>,
    pub helpers: BTreeSet<String>,
    pub vars: Context,
    pub params: InterpolatedMap,
    pub template_source: TemplateSource,
    pub tags: Tags,
}

impl Config {
    /// Load `<config_path>/<name>.yaml` and everything it includes.
    pub fn load(options: LoadOptions, collaborators: &Collaborators) -> ConfigResult<Self> {
        let name = options.normalized_name();
        let includes = ConfigFile::open(&name, &options.config_path)?
            .load_includes(&options.config_path)?;
        Self::from_sections(options, &includes, collaborators)
    }

    /// Run the pipeline over sections supplied by `loader`.
    pub fn from_sections(
        options: LoadOptions,
        loader: &dyn SectionLoader,
        collaborators: &Collaborators,
    ) -> ConfigResult<Self> {
        let name = options.normalized_name();
        let environment = options.environment.clone();
        info!("Loading configuration {} for {}", name, environment);

        let allowed = loader.environments();
        if !allowed.contains(&environment) {
            return Err(ConfigError::InvalidEnvironment {
                environment,
                config: name,
                allowed: allowed.into_iter().collect::<Vec<_>>().join(", "),
            });
        }

        let environ = options.environ.clone().unwrap_or_else(capture_environ);
        let plain = ExpressionRenderer::new();

        // aws
        let mut aws_context = Context::new();
        aws_context.insert("environ".to_string(), environ.clone());
        aws_context.insert("environment".to_string(), json!(environment));
        let aws_section = loader.fetch_section("aws", &environment, &Context::new())?;
        let aws_values = InterpolatedMap::new("aws", &aws_section, &aws_context, &plain)?;
        let mut aws: AwsSettings = serde_json::from_value(Value::Object(aws_values.into_inner()))
            .map_err(|e| ConfigError::InvalidSection {
                section: "aws".to_string(),
                message: e.to_string(),
            })?;
        let account_id = aws.verify_account(collaborators.credentials.as_ref())?.to_string();

        // base vars
        let mut base = Context::new();
        base.insert(
            "__config_dir".to_string(),
            json!(options.config_path.display().to_string()),
        );
        base.insert("account_id".to_string(), json!(account_id));
        base.insert("aws_region".to_string(), json!(aws.region));
        base.insert("cfn_bucket".to_string(), json!(aws.cfn_bucket));
        base.insert("environ".to_string(), environ);
        base.insert("environment".to_string(), json!(environment));
        base.insert("name".to_string(), json!(name));

        // core
        let core_section = loader.fetch_section("core", &environment, &CoreSettings::defaults())?;
        let core = CoreSettings::from_map(InterpolatedMap::new("core", &core_section, &base, &plain)?)?;
        base.insert("stack_name".to_string(), json!(core.stack_name));
        debug!("stack name {}", core.stack_name);

        // refs
        let refs_section = loader.fetch_section("refs", &environment, &Context::new())?;
        let refs = Arc::new(StackRefs::from_section(
            &refs_section,
            environment.clone(),
            Arc::clone(&collaborators.stacks),
        )?);
        let renderer = ExpressionRenderer::with_refs(Arc::clone(&refs));

        let helpers = loader.fetch_set("helpers", &environment)?;

        // vars
        let vars_section = loader.fetch_section("vars", &environment, &Context::new())?;
        let raw_vars = merge_over(&section_map("vars", vars_section)?, &options.var_overrides);
        let mut vars = VariableResolver::new(&renderer)
            .with_max_iterations(options.max_interpolation_depth)
            .resolve(base, raw_vars)?;

        // params
        let params_section = loader.fetch_section("params", &environment, &Context::new())?;
        let raw_params = merge_over(&section_map("params", params_section)?, &options.param_overrides);
        let params = InterpolatedMap::new("params", &Value::Object(raw_params), &vars, &renderer)?;
        insert_resolved(&mut vars, "params", Value::Object(params.as_map().clone()))?;

        // template
        let template_section =
            loader.fetch_section("template", &environment, &TemplateSource::defaults(&name))?;
        let template_source = TemplateSource::from_map(
            InterpolatedMap::new("template", &template_section, &vars, &renderer)?,
            options.template_path.as_deref(),
        )?;

        let template_dir = match (&template_source.repo, &template_source.root) {
            (None, Some(root)) => Some(Path::new(root)),
            _ => None,
        };
        let deploy = DeployMetadata::collect(
            &template_source.location(),
            &options.config_path,
            template_dir.filter(|d| d.is_dir()),
        );
        insert_resolved(&mut vars, "deploy", serde_json::to_value(deploy)?)?;

        // tags
        let tags_section = loader.fetch_section("tags", &environment, &Context::new())?;
        let tags = Tags::new(&tags_section, &vars, &renderer)?;

        info!(
            "Configuration {} ready: {} vars, {} params, {} tags",
            name,
            vars.len(),
            params.len(),
            tags.len()
        );

        Ok(Self {
            name,
            environment,
            config_path: options.config_path,
            aws,
            core,
            refs,
            helpers,
            vars,
            params,
            template_source,
            tags,
        })
    }

    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }
}

fn section_map(section: &str, value: Value) -> ConfigResult<Context> {
    match value {
        Value::Null => Ok(Context::new()),
        Value::Object(map) => Ok(map),
        other => Err(ConfigError::InvalidSection {
            section: section.to_string(),
            message: format!("expected a mapping, found {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Includes;
    use crate::offline::{StaticCredentials, StaticStackState};
    use crate::refs::MockStackStateProvider;

    const CONFIG: &str = r#"
environments: [dev, prod]
aws:
  region: eu-west-1
  cfn_bucket: "{{environment}}-templates"
core:
  stack_name: "{{environment}}-app"
vars:
  tier: "{{environment}}-web"
  label: "{{tier}}-{{aws_region}}"
params:
  Tier: "{{tier}}"
tags:
  Owner: platform
  Stack: "{{stack_name}}"
helpers: [naming]
environment:
  prod:
    vars:
      tier: live
"#;

    fn collaborators() -> Collaborators {
        Collaborators::new(
            Arc::new(StaticCredentials::new("111122223333")),
            Arc::new(StaticStackState::new()),
        )
    }

    fn options(environment: &str) -> LoadOptions {
        LoadOptions::new("app.yaml", environment, "/config").with_environ(json!({"HOME": "/root"}))
    }

    #[test]
    fn test_pipeline_order() {
        let loader = Includes::from_yaml(CONFIG).unwrap();
        let config = Config::from_sections(options("dev"), &loader, &collaborators()).unwrap();

        assert_eq!(config.name, "app");
        assert_eq!(config.aws.cfn_bucket, "dev-templates");
        assert_eq!(config.core.stack_name, "dev-app");
        assert_eq!(config.var("account_id"), Some(&json!("111122223333")));
        assert_eq!(config.var("label"), Some(&json!("dev-web-eu-west-1")));
        assert_eq!(config.param("Tier"), Some(&json!("dev-web")));
        assert_eq!(config.var("params"), Some(&json!({"Tier": "dev-web"})));
        assert_eq!(config.tags.get("Stack"), Some(&json!("dev-app")));
        assert_eq!(config.template_source.name, "app");
        assert!(config.var("deploy").is_some());
        assert!(config.helpers.contains("naming"));
    }

    #[test]
    fn test_environment_override() {
        let loader = Includes::from_yaml(CONFIG).unwrap();
        let config = Config::from_sections(options("prod"), &loader, &collaborators()).unwrap();
        assert_eq!(config.var("label"), Some(&json!("live-eu-west-1")));
    }

    #[test]
    fn test_overrides_win() {
        let loader = Includes::from_yaml(CONFIG).unwrap();
        let options = options("dev").with_var("tier", "canary").with_param("Extra", "x");
        let config = Config::from_sections(options, &loader, &collaborators()).unwrap();

        assert_eq!(config.param("Tier"), Some(&json!("canary")));
        assert_eq!(config.param("Extra"), Some(&json!("x")));
    }

    #[test]
    fn test_invalid_environment() {
        let loader = Includes::from_yaml(CONFIG).unwrap();
        let err = Config::from_sections(options("staging"), &loader, &collaborators()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Environment staging is not a valid environment for app. Only dev, prod permitted."
        );
    }

    #[test]
    fn test_default_stack_name() {
        let loader = Includes::from_yaml(
            "environments: [dev]\naws:\n  region: r\n  cfn_bucket: b\n",
        )
        .unwrap();
        let options = LoadOptions::new("team/app", "dev", "/config").with_environ(json!({}));
        let config = Config::from_sections(options, &loader, &collaborators()).unwrap();

        assert_eq!(config.core.stack_name, "dev-team-app");
        assert_eq!(config.template_source.name, "team-app");
    }

    #[test]
    fn test_reserved_params_name() {
        let loader = Includes::from_yaml(
            "environments: [dev]\naws:\n  region: r\n  cfn_bucket: b\nvars:\n  params: nope\n",
        )
        .unwrap();
        let err = Config::from_sections(options("dev"), &loader, &collaborators()).unwrap_err();
        assert!(matches!(err, ConfigError::ReservedVariable(ref k) if k == "params"));
    }

    #[test]
    fn test_unused_refs_never_queried() {
        let mut stacks = MockStackStateProvider::new();
        stacks.expect_stack_exists().times(0);
        stacks.expect_stack_outputs().times(0);

        let loader = Includes::from_yaml(
            "environments: [dev]\naws:\n  region: r\n  cfn_bucket: b\nrefs:\n  network: {}\n",
        )
        .unwrap();
        let collaborators = Collaborators::new(
            Arc::new(StaticCredentials::new("1")),
            Arc::new(stacks),
        );

        let config = Config::from_sections(options("dev"), &loader, &collaborators).unwrap();
        assert!(config.refs.contains("network"));
    }

    #[test]
    fn test_environ_visible_to_aws() {
        let loader = Includes::from_yaml(
            "environments: [dev]\naws:\n  region: \"{{environ.REGION}}\"\n  cfn_bucket: b\n",
        )
        .unwrap();
        let options = options("dev").with_environ(json!({"REGION": "us-east-2"}));
        let config = Config::from_sections(options, &loader, &collaborators()).unwrap();
        assert_eq!(config.aws.region, "us-east-2");
        assert_eq!(config.var("aws_region"), Some(&json!("us-east-2")));
    }
}
