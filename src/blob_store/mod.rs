//! BlobStore - JSON document persistence
//!
//! ## Responsibilities
//!
//! - One JSON document per key under a data directory
//! - Whole-document rewrite on every save
//! - Atomic replace (temp file + rename) so concurrent readers never see a
//!   partially written document

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// Key-value blob store backed by a directory of JSON files
#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    /// Create a store rooted at `dir` (created lazily on first save)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Data directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document for `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Load a document. A missing document is `Ok(None)`.
    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.path_for(key);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Storage(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let value = serde_json::from_str(&contents)?;
        Ok(Some(value))
    }

    /// Rewrite a document wholesale
    pub async fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::Storage(format!("failed to create {}: {}", self.dir.display(), e))
        })?;

        let serialized = serde_json::to_vec_pretty(value)?;
        let target = self.path_for(key);
        // Unique temp name so two writers of the same key never share a file
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", key, Uuid::new_v4().simple()));

        if let Err(e) = fs::write(&tmp, &serialized).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(Error::Storage(format!(
                "failed to write {}: {}",
                tmp.display(),
                e
            )));
        }

        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(Error::Storage(format!(
                "failed to replace {}: {}",
                target.display(),
                e
            )));
        }

        tracing::debug!(key = %key, path = %target.display(), bytes = serialized.len(), "Blob saved");
        Ok(())
    }
}

/// Result of a mutation whose persistence may have failed.
///
/// The in-memory state is already updated when this is returned; `persisted`
/// is false when the durable write failed and the change will not survive a
/// restart.
#[derive(Debug, Clone, PartialEq)]
pub struct Saved<T> {
    pub value: T,
    pub persisted: bool,
}

impl<T> Saved<T> {
    pub fn new(value: T, persisted: bool) -> Self {
        Self { value, persisted }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Saved<U> {
        Saved {
            value: f(self.value),
            persisted: self.persisted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        name: String,
        value: f64,
    }

    #[tokio::test]
    async fn test_missing_blob_is_none() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().join("data"));
        let loaded: Option<Doc> = store.load("calibration").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().join("data"));
        let doc = Doc {
            name: "camera".to_string(),
            value: 12.5,
        };
        store.save("doc", &doc).await.unwrap();

        let loaded: Option<Doc> = store.load("doc").await.unwrap();
        assert_eq!(loaded, Some(doc));

        // No temp files left behind
        let mut entries = fs::read_dir(store.dir()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["doc.json".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_error() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().join("data"));
        fs::create_dir_all(store.dir()).await.unwrap();
        fs::write(store.path_for("doc"), b"{not json").await.unwrap();

        let result: Result<Option<Doc>> = store.load("doc").await;
        assert!(matches!(result, Err(Error::Serialization(_))));
    }
}
