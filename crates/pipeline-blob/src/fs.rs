//! Filesystem backend: containers are directories under a root path.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::{
    normalize_container_name, validate_key, BatchDeleteResult, ObjectKeyStream, ObjectStore,
    ObjectStoreError,
};

/// Listing buffer between the blocking directory walk and the consumer
const LIST_CHANNEL_CAPACITY: usize = 256;

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_path(&self, name: &str) -> Result<PathBuf, ObjectStoreError> {
        Ok(self.root.join(normalize_container_name(name)?))
    }

    async fn existing_container_path(&self, name: &str) -> Result<PathBuf, ObjectStoreError> {
        let path = self.container_path(name)?;
        if tokio::fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
            Ok(path)
        } else {
            Err(ObjectStoreError::ContainerNotFound(name.to_string()))
        }
    }

    fn object_path(container_path: &Path, key: &str) -> Result<PathBuf, ObjectStoreError> {
        validate_key(key)?;
        Ok(key
            .split('/')
            .fold(container_path.to_path_buf(), |path, segment| path.join(segment)))
    }
}

/// Object key of a file relative to its container directory.
fn relative_key(container_path: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(container_path).ok()?;
    let segments: Option<Vec<&str>> = relative.iter().map(|s| s.to_str()).collect();
    segments.map(|s| s.join("/"))
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn create_container(&self, name: &str) -> Result<(), ObjectStoreError> {
        let path = self.container_path(name)?;
        tokio::fs::create_dir_all(&path).await?;
        debug!(container = %name, "Created container");
        Ok(())
    }

    async fn container_exists(&self, name: &str) -> Result<bool, ObjectStoreError> {
        let path = self.container_path(name)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_objects(&self, container: &str) -> Result<ObjectKeyStream, ObjectStoreError> {
        let container_path = self.existing_container_path(container).await?;
        let (tx, rx) = mpsc::channel(LIST_CHANNEL_CAPACITY);

        tokio::task::spawn_blocking(move || {
            let walker = WalkDir::new(&container_path)
                .min_depth(1)
                .sort_by_file_name()
                .into_iter();
            for entry in walker {
                let item = match entry {
                    Ok(entry) if !entry.file_type().is_file() => continue,
                    Ok(entry) => match relative_key(&container_path, entry.path()) {
                        Some(key) => Ok(key),
                        None => {
                            warn!(path = ?entry.path(), "Skipping file with non-UTF-8 name");
                            continue;
                        }
                    },
                    Err(e) => Err(ObjectStoreError::Backend(e.to_string())),
                };
                // Receiver dropped: the caller stopped listing
                if tx.blocking_send(item).is_err() {
                    break;
                }
            }
        });

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    async fn delete_objects(
        &self,
        container: &str,
        keys: &[String],
    ) -> Result<BatchDeleteResult, ObjectStoreError> {
        let container_path = self.existing_container_path(container).await?;
        let mut result = BatchDeleteResult::default();

        for key in keys {
            let path = match Self::object_path(&container_path, key) {
                Ok(path) => path,
                Err(e) => {
                    result.failed.push((key.clone(), e.to_string()));
                    continue;
                }
            };
            match tokio::fs::remove_file(&path).await {
                Ok(()) => result.deleted.push(key.clone()),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    result.failed.push((key.clone(), "object not found".to_string()))
                }
                Err(e) => result.failed.push((key.clone(), e.to_string())),
            }
        }

        debug!(
            container = %container,
            deleted = result.deleted.len(),
            failed = result.failed.len(),
            "Batch delete finished"
        );
        Ok(result)
    }

    async fn read_object(
        &self,
        container: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, ObjectStoreError> {
        let container_path = self.existing_container_path(container).await?;
        let path = Self::object_path(&container_path, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_object(
        &self,
        container: &str,
        key: &str,
        data: Vec<u8>,
    ) -> Result<(), ObjectStoreError> {
        let container_path = self.existing_container_path(container).await?;
        let path = Self::object_path(&container_path, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    async fn create_test_store() -> (FsObjectStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(temp_dir.path());
        store.create_container("c42").await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_put_list_read() {
        let (store, _temp) = create_test_store().await;
        store.put_object("c42", "b.tmp", b"tmp".to_vec()).await.unwrap();
        store.put_object("c42", "a.txt", b"hello".to_vec()).await.unwrap();
        store
            .put_object("c42", "src/lib/mod.rs", b"mod".to_vec())
            .await
            .unwrap();

        let keys: Vec<String> = store
            .list_objects("c42")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(keys, vec!["a.txt", "b.tmp", "src/lib/mod.rs"]);

        let bytes = store.read_object("c42", "a.txt").await.unwrap();
        assert_eq!(bytes.as_deref(), Some(&b"hello"[..]));
        assert!(store.read_object("c42", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_reports_per_key() {
        let (store, _temp) = create_test_store().await;
        store.put_object("c42", "a.txt", b"a".to_vec()).await.unwrap();

        let result = store
            .delete_objects("c42", &["a.txt".to_string(), "gone.txt".to_string()])
            .await
            .unwrap();
        assert_eq!(result.deleted, vec!["a.txt"]);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].0, "gone.txt");
        assert!(!result.is_complete());
    }

    #[tokio::test]
    async fn test_container_names_ignore_case() {
        let (store, _temp) = create_test_store().await;
        store.put_object("C42", "a.txt", b"a".to_vec()).await.unwrap();

        assert!(store.container_exists("C42").await.unwrap());
        let keys: Vec<String> = store
            .list_objects("c42")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(keys, vec!["a.txt"]);
        assert!(!store.root().join("C42").exists());
    }

    #[tokio::test]
    async fn test_missing_container() {
        let (store, _temp) = create_test_store().await;
        assert!(!store.container_exists("nope").await.unwrap());
        let err = store.list_objects("nope").await.err().unwrap();
        assert!(matches!(err, ObjectStoreError::ContainerNotFound(_)));
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (store, _temp) = create_test_store().await;
        let err = store
            .put_object("c42", "../outside.txt", b"x".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectStoreError::InvalidKey(_)));
        let err = store.create_container("../up").await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::InvalidContainerName(_)));
    }
}
