//! Render command - Render the document template for a configuration.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tracing::info;

use stk_templates::{
    DirectoryUploader, FilesystemProvider, HelperRegistry, RenderOutcome, TemplateRenderer,
    Uploader,
};

use super::ConfigArgs;

#[derive(Args)]
pub struct RenderArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Raise on the first rendering error instead of reporting it
    #[arg(long)]
    pub fail_on_error: bool,

    /// Directory standing in for the artifact bucket used by upload helpers
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Print the parsed document as JSON instead of the rendered text
    #[arg(long)]
    pub json: bool,

    /// Write output to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn execute(args: RenderArgs) -> Result<()> {
    let config = args.config.load()?;

    let provider = Arc::new(FilesystemProvider::from_source(&config.template_source)?);
    let uploader = args.upload_dir.as_ref().map(|dir| {
        Arc::new(DirectoryUploader::new(config.aws.cfn_bucket.clone(), dir)) as Arc<dyn Uploader>
    });

    let renderer = TemplateRenderer::for_config(&config, provider, &HelperRegistry::new(), uploader)?;
    let template = match renderer.render(&config.vars, args.fail_on_error)? {
        RenderOutcome::Rendered(template) => template,
        RenderOutcome::Failed(failed) => {
            eprintln!("{}", failed);
            anyhow::bail!("Template {} could not be rendered", failed.location);
        }
    };

    let output = if args.json {
        serde_json::to_string_pretty(template.document())? + "\n"
    } else {
        template.content().to_string()
    };

    match &args.output {
        Some(path) => {
            fs::write(path, output)?;
            info!("Wrote {} to {:?}", renderer.location(), path);
        }
        None => print!("{}", output),
    }

    Ok(())
}
