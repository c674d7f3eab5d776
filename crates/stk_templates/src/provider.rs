//! Template sources.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use stk_config::TemplateSource;
use tracing::debug;

use crate::error::{TemplateError, TemplateResult};

/// Supplies the document template and the files its helpers read.
///
/// `Display` is the location label used in diagnostics.
pub trait TemplateProvider: fmt::Display + Send + Sync {
    /// The document template text.
    fn template(&self) -> TemplateResult<String>;

    /// Raw content of a file relative to the template root.
    fn content(&self, path: &str) -> TemplateResult<Vec<u8>>;

    fn is_file(&self, path: &str) -> bool;

    /// Whether `path` is a directory under the template root.
    fn is_tree(&self, path: &str) -> bool;

    /// Entries directly inside the directory `path`, sorted by name.
    fn list(&self, path: &str) -> TemplateResult<Vec<TreeEntry>>;
}

/// What a directory entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Other,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// Templates stored in a local directory: `<root>/<name>.yaml`.
#[derive(Debug, Clone)]
pub struct FilesystemProvider {
    root: PathBuf,
    name: String,
}

impl FilesystemProvider {
    pub fn new(root: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            name: name.into(),
        }
    }

    /// Provider for a configured source; repository sources are not handled here.
    pub fn from_source(source: &TemplateSource) -> TemplateResult<Self> {
        if let Some(repo) = source.repo.as_deref().filter(|r| !r.is_empty()) {
            return Err(TemplateError::UnsupportedSource(repo.to_string()));
        }
        let root = source.root.as_deref().unwrap_or(".");
        Ok(Self::new(root, source.name.clone()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn template_path(&self) -> Option<PathBuf> {
        ["yaml", "yml"]
            .iter()
            .map(|ext| self.root.join(format!("{}.{}", self.name, ext)))
            .find(|p| p.is_file())
    }
}

impl TemplateProvider for FilesystemProvider {
    fn template(&self) -> TemplateResult<String> {
        let path = self
            .template_path()
            .ok_or_else(|| TemplateError::TemplateNotFound(self.to_string()))?;
        debug!("Reading template {:?}", path);
        Ok(fs::read_to_string(path)?)
    }

    fn content(&self, path: &str) -> TemplateResult<Vec<u8>> {
        let full = self.root.join(path);
        if !full.is_file() {
            return Err(TemplateError::TemplateNotFound(format!("{}/{}", self.root.display(), path)));
        }
        Ok(fs::read(full)?)
    }

    fn is_file(&self, path: &str) -> bool {
        self.root.join(path).is_file()
    }

    fn is_tree(&self, path: &str) -> bool {
        self.root.join(path).is_dir()
    }

    fn list(&self, path: &str) -> TemplateResult<Vec<TreeEntry>> {
        let full = self.root.join(path);
        if !full.is_dir() {
            return Err(TemplateError::TemplateNotFound(format!("{}/{}", self.root.display(), path)));
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&full)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let kind = if file_type.is_file() {
                EntryKind::File
            } else if file_type.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::Other
            };
            entries.push(TreeEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Listed {} entries in {:?}", entries.len(), full);
        Ok(entries)
    }
}

impl fmt::Display for FilesystemProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.root.display(), self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_reads_template_and_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app.yml"), "Resources: {}\n").unwrap();
        fs::create_dir_all(dir.path().join("files")).unwrap();
        fs::write(dir.path().join("files/init.sh"), "echo hi\n").unwrap();

        let provider = FilesystemProvider::new(dir.path(), "app");
        assert_eq!(provider.template().unwrap(), "Resources: {}\n");
        assert!(provider.is_file("files/init.sh"));
        assert!(!provider.is_file("files/other.sh"));
        assert_eq!(provider.content("files/init.sh").unwrap(), b"echo hi\n");
    }

    #[test]
    fn test_lists_directories_sorted() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("user_data/web/nested")).unwrap();
        fs::write(dir.path().join("user_data/web/b.sh"), "b").unwrap();
        fs::write(dir.path().join("user_data/web/a.cfg"), "a").unwrap();

        let provider = FilesystemProvider::new(dir.path(), "app");
        assert!(provider.is_tree("user_data/web"));
        assert!(!provider.is_tree("user_data/web/a.cfg"));

        let entries = provider.list("user_data/web").unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.cfg", "b.sh", "nested"]);
        assert_eq!(entries[2].kind, EntryKind::Directory);
        assert!(matches!(provider.list("user_data/db"), Err(TemplateError::TemplateNotFound(_))));
    }

    #[test]
    fn test_missing_template() {
        let dir = tempdir().unwrap();
        let provider = FilesystemProvider::new(dir.path(), "app");
        assert!(matches!(provider.template(), Err(TemplateError::TemplateNotFound(_))));
        assert!(matches!(provider.content("files/x"), Err(TemplateError::TemplateNotFound(_))));
    }

    #[test]
    fn test_repo_source_unsupported() {
        let source = TemplateSource {
            name: "app".to_string(),
            root: Some("/".to_string()),
            repo: Some("git@example.com:templates.git".to_string()),
            version: None,
        };
        assert!(matches!(
            FilesystemProvider::from_source(&source),
            Err(TemplateError::UnsupportedSource(_))
        ));
    }
}
