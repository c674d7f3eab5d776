//! Upload collaborator used by template helpers.

use std::fs;
use std::path::PathBuf;

use anyhow::Context as _;
use tracing::info;

/// Where an uploaded object ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    pub key: String,
    pub bucket: String,
}

impl UploadedObject {
    pub fn as_s3(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }

    pub fn as_http(&self) -> String {
        format!("https://{}.s3.amazonaws.com/{}", self.bucket, self.key)
    }
}

/// Stores artifacts that templates reference.
#[cfg_attr(test, mockall::automock)]
pub trait Uploader: Send + Sync {
    fn upload(&self, name: &str, content: &[u8]) -> anyhow::Result<UploadedObject>;
}

/// Writes uploads under a local directory standing in for the bucket.
#[derive(Debug, Clone)]
pub struct DirectoryUploader {
    bucket: String,
    root: PathBuf,
}

impl DirectoryUploader {
    pub fn new(bucket: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            bucket: bucket.into(),
            root: root.into(),
        }
    }
}

impl Uploader for DirectoryUploader {
    fn upload(&self, name: &str, content: &[u8]) -> anyhow::Result<UploadedObject> {
        let key = name.trim_start_matches('/').to_string();
        let path = self.root.join(&key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(&path, content).with_context(|| format!("writing {}", path.display()))?;

        info!("Uploaded {} ({} bytes) to {}", key, content.len(), path.display());
        Ok(UploadedObject {
            key,
            bucket: self.bucket.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_object_uris() {
        let object = UploadedObject {
            key: "files/app.zip".to_string(),
            bucket: "dev-templates".to_string(),
        };
        assert_eq!(object.as_s3(), "s3://dev-templates/files/app.zip");
        assert_eq!(object.as_http(), "https://dev-templates.s3.amazonaws.com/files/app.zip");
    }

    #[test]
    fn test_directory_uploader() {
        let dir = tempdir().unwrap();
        let uploader = DirectoryUploader::new("b", dir.path());

        let object = uploader.upload("files/a.txt", b"hello").unwrap();
        assert_eq!(object.key, "files/a.txt");
        assert_eq!(fs::read(dir.path().join("files/a.txt")).unwrap(), b"hello");
    }
}
