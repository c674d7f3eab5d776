//! # stk_templates
//!
//! Document template rendering for stk.
//!
//! A document template is Handlebars text that renders, against the resolved
//! configuration variables, into a YAML infrastructure document. Rendering
//! failures are kept as data ([`FailedTemplate`]) that can point back at the
//! template line that caused them.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stk_templates::{FilesystemProvider, HelperRegistry, RenderOutcome, TemplateRenderer};
//!
//! let provider = Arc::new(FilesystemProvider::from_source(&config.template_source)?);
//! let renderer = TemplateRenderer::for_config(&config, provider, &HelperRegistry::new(), None)?;
//!
//! match renderer.render(&config.vars, false)? {
//!     RenderOutcome::Rendered(template) => println!("{}", template),
//!     RenderOutcome::Failed(failed) => eprintln!("{}", failed),
//! }
//! ```

pub mod error;
pub mod helpers;
mod multipart;
pub mod provider;
pub mod rendered;
pub mod renderer;
pub mod upload;

pub use error::{HelperFailure, TemplateError, TemplateResult};
pub use helpers::{core_helpers, Helper, HelperContext, HelperRegistry, HelperServices};
pub use provider::{EntryKind, FilesystemProvider, TemplateProvider, TreeEntry};
pub use rendered::{FailedTemplate, Frame, RenderFailure, RenderOutcome, RenderedTemplate};
pub use renderer::{TemplateRenderer, TemplateRendererBuilder};
pub use upload::{DirectoryUploader, UploadedObject, Uploader};
