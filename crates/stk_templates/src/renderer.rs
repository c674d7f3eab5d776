//! Document template rendering.

use std::sync::Arc;

use handlebars::Handlebars;
use serde_json::Value;
use stk_config::{parse_document, render_template, strict_registry, Config, Context, StackRefs};
use tracing::{debug, info, warn};

use crate::error::{TemplateError, TemplateResult};
use crate::helpers::{self, core_helpers, HelperRegistry, HelperServices};
use crate::provider::TemplateProvider;
use crate::rendered::{
    FailedTemplate, Frame, RenderFailure, RenderOutcome, RenderedTemplate, TEMPLATE_ORIGIN,
};
use crate::upload::Uploader;

/// Renders a document template and parses the result.
pub struct TemplateRenderer {
    provider: Arc<dyn TemplateProvider>,
    registry: Handlebars<'static>,
}

impl TemplateRenderer {
    /// Renderer with the standard filters and core helpers.
    pub fn new(provider: Arc<dyn TemplateProvider>) -> Self {
        Self::builder(provider).build()
    }

    pub fn builder(provider: Arc<dyn TemplateProvider>) -> TemplateRendererBuilder {
        TemplateRendererBuilder {
            services: HelperServices::new(provider),
            refs: None,
            custom: Vec::new(),
        }
    }

    /// Renderer for a loaded configuration: its tags, stack references and
    /// enabled custom helpers.
    pub fn for_config(
        config: &Config,
        provider: Arc<dyn TemplateProvider>,
        plugins: &HelperRegistry,
        uploader: Option<Arc<dyn Uploader>>,
    ) -> TemplateResult<Self> {
        let mut builder = Self::builder(provider)
            .with_tags(config.tags.clone())
            .with_refs(Arc::clone(&config.refs));
        if let Some(uploader) = uploader {
            builder = builder.with_uploader(uploader);
        }
        let names: Vec<&str> = config.helpers.iter().map(String::as_str).collect();
        Ok(builder.with_helpers(plugins, &names)?.build())
    }

    /// Location label of the template being rendered.
    pub fn location(&self) -> String {
        self.provider.to_string()
    }

    /// Render against `vars`.
    ///
    /// A template that fails to render or parse comes back as
    /// [`RenderOutcome::Failed`], or as [`TemplateError::RenderingFailed`] when
    /// `fail_on_error` is set. Errors reading the template are always returned.
    pub fn render(&self, vars: &Context, fail_on_error: bool) -> TemplateResult<RenderOutcome> {
        let source = self.provider.template()?;
        let location = self.location();
        info!("Rendering template {}", location);

        let outcome = match render_template(&self.registry, &source, vars) {
            Ok(content) => Self::parse(content, &location),
            Err(e) => RenderOutcome::Failed(FailedTemplate::new(
                source,
                location.clone(),
                RenderFailure::from_render_error(&e, TEMPLATE_ORIGIN),
            )),
        };

        match outcome {
            RenderOutcome::Failed(failed) => {
                warn!("Template {} could not be rendered: {}", location, failed.error);
                if fail_on_error {
                    return Err(TemplateError::RenderingFailed(Box::new(failed)));
                }
                Ok(RenderOutcome::Failed(failed))
            }
            rendered => Ok(rendered),
        }
    }

    fn parse(content: String, location: &str) -> RenderOutcome {
        let failed = |content: String, message: String, line: Option<usize>| {
            RenderOutcome::Failed(FailedTemplate::new(
                content,
                location,
                RenderFailure::new(message, vec![Frame::new(TEMPLATE_ORIGIN, line)]),
            ))
        };

        match parse_document(&content) {
            Ok(Value::Null) => {
                debug!("template {} rendered an empty document", location);
                RenderOutcome::Rendered(RenderedTemplate::new(content, Context::new()))
            }
            Ok(Value::Object(document)) => {
                debug!("template {} rendered {} top-level keys", location, document.len());
                RenderOutcome::Rendered(RenderedTemplate::new(content, document))
            }
            Ok(other) => {
                let message = format!("rendered template must be a mapping, found {}", other);
                failed(content, message, Some(1))
            }
            Err(e) => {
                let line = e.location().map(|l| l.line());
                failed(content, e.to_string(), line)
            }
        }
    }
}

/// Assembles the helper set of a [`TemplateRenderer`].
pub struct TemplateRendererBuilder {
    services: HelperServices,
    refs: Option<Arc<StackRefs>>,
    custom: Vec<(String, Arc<dyn helpers::Helper>)>,
}

impl TemplateRendererBuilder {
    /// Tags the `tags` helper starts from.
    pub fn with_tags(mut self, tags: stk_config::Tags) -> Self {
        self.services.tags = tags;
        self
    }

    /// Make `ref_output` and `ref_exists` available.
    pub fn with_refs(mut self, refs: Arc<StackRefs>) -> Self {
        self.refs = Some(refs);
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.services.uploader = Some(uploader);
        self
    }

    /// Enable the named custom helpers; each must be registered in `plugins`.
    pub fn with_helpers(mut self, plugins: &HelperRegistry, names: &[&str]) -> TemplateResult<Self> {
        for name in names {
            let helper = plugins.get_required(name)?;
            self.custom.push((name.to_string(), helper));
        }
        Ok(self)
    }

    pub fn build(self) -> TemplateRenderer {
        let provider = Arc::clone(&self.services.provider);
        let services = Arc::new(self.services);
        let mut registry = strict_registry();

        if let Some(refs) = &self.refs {
            StackRefs::register_helpers(refs, &mut registry);
        }
        for (name, helper) in core_helpers() {
            helpers::register(&mut registry, name, helper, &services);
        }
        for (name, helper) in self.custom {
            debug!("enabling custom helper {}", name);
            helpers::register(&mut registry, &name, helper, &services);
        }

        TemplateRenderer { provider, registry }
    }
}
