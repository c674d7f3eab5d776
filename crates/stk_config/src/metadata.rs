//! Deployment metadata exposed to templates as `deploy`.

use std::path::Path;
use std::process::Command;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const UNKNOWN: &str = "?";

/// Where and when a deployment was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployMetadata {
    pub timestamp: String,
    pub deployed_with: String,
    pub template: String,
    pub config_sha: String,
    pub config_ref: String,
    pub template_sha: String,
    pub template_ref: String,
}

impl DeployMetadata {
    /// Collect metadata for a template location, reading git state of the
    /// config and template directories.
    pub fn collect(template: &str, config_dir: &Path, template_dir: Option<&Path>) -> Self {
        let (config_sha, config_ref) = git_revision(config_dir);
        let (template_sha, template_ref) = match template_dir {
            Some(dir) => git_revision(dir),
            None => (UNKNOWN.to_string(), UNKNOWN.to_string()),
        };

        Self {
            timestamp: Utc::now().format("%Y-%m-%d-%H:%M:%S%Z").to_string(),
            deployed_with: format!("stk-{}", env!("CARGO_PKG_VERSION")),
            template: template.to_string(),
            config_sha,
            config_ref,
            template_sha,
            template_ref,
        }
    }
}

fn git_revision(dir: &Path) -> (String, String) {
    let sha = git(dir, &["rev-parse", "HEAD"]);
    let reference = git(dir, &["rev-parse", "--abbrev-ref", "HEAD"]);
    (sha, reference)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = match Command::new("git").args(args).current_dir(dir).output() {
        Ok(output) => output,
        Err(e) => {
            warn!("Unable to run git in {}: {}", dir.display(), e);
            return UNKNOWN.to_string();
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!("git {} failed in {}: {}", args.join(" "), dir.display(), stderr.trim());
        return UNKNOWN.to_string();
    }

    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    debug!("git {} = {}", args.join(" "), value);
    if value.is_empty() {
        UNKNOWN.to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_outside_repository() {
        let dir = tempdir().unwrap();
        let meta = DeployMetadata::collect("templates/app", dir.path(), None);

        assert_eq!(meta.template, "templates/app");
        assert_eq!(meta.config_sha, "?");
        assert_eq!(meta.template_ref, "?");
        assert!(meta.deployed_with.starts_with("stk-"));
        assert!(meta.timestamp.ends_with("UTC"));
    }
}
