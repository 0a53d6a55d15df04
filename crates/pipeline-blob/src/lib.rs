//! Object store gateway.
//!
//! Containers hold objects addressed by `/`-separated keys. Both pipeline
//! stages reach storage only through the [`ObjectStore`] trait; the backend
//! is chosen from a connection string by [`open_object_store`].

mod fs;
mod memory;

pub use fs::FsObjectStore;
pub use memory::{DeleteCall, MemoryObjectStore};

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Errors from object store operations.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Invalid container name: {0}")]
    InvalidContainerName(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Unsupported connection string: {0}")]
    UnsupportedConnectionString(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend rejected the request as a whole
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Per-key outcome of one batch delete request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDeleteResult {
    pub deleted: Vec<String>,
    /// Keys the backend refused, with its reason
    pub failed: Vec<(String, String)>,
}

impl BatchDeleteResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Lazy, finite listing of object keys. Not restartable.
pub type ObjectKeyStream = BoxStream<'static, Result<String, ObjectStoreError>>;

/// Container lifecycle and object access for a storage backend.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create a container. Creating an existing container succeeds.
    async fn create_container(&self, name: &str) -> Result<(), ObjectStoreError>;

    async fn container_exists(&self, name: &str) -> Result<bool, ObjectStoreError>;

    /// Stream every object key in a container.
    async fn list_objects(&self, container: &str) -> Result<ObjectKeyStream, ObjectStoreError>;

    /// Delete a batch of keys in one backend request.
    async fn delete_objects(
        &self,
        container: &str,
        keys: &[String],
    ) -> Result<BatchDeleteResult, ObjectStoreError>;

    /// Read an object; `Ok(None)` when it does not exist.
    async fn read_object(
        &self,
        container: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, ObjectStoreError>;

    /// Write an object, creating parent prefixes as needed.
    async fn put_object(
        &self,
        container: &str,
        key: &str,
        data: Vec<u8>,
    ) -> Result<(), ObjectStoreError>;
}

/// Open the backend named by a connection string.
///
/// - `file:///abs/path` stores containers as directories under the path
/// - `memory://` keeps everything in process memory
pub fn open_object_store(connection_string: &str) -> Result<Arc<dyn ObjectStore>, ObjectStoreError> {
    if let Some(path) = connection_string.strip_prefix("file://") {
        if path.is_empty() {
            return Err(ObjectStoreError::UnsupportedConnectionString(
                connection_string.to_string(),
            ));
        }
        return Ok(Arc::new(FsObjectStore::new(PathBuf::from(path))));
    }
    if connection_string == "memory://" {
        return Ok(Arc::new(MemoryObjectStore::new()));
    }
    Err(ObjectStoreError::UnsupportedConnectionString(
        connection_string.to_string(),
    ))
}

/// Reject container names that could escape the backend root.
pub(crate) fn validate_container_name(name: &str) -> Result<(), ObjectStoreError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.chars().any(char::is_control);
    if valid {
        Ok(())
    } else {
        Err(ObjectStoreError::InvalidContainerName(name.to_string()))
    }
}

/// Container names are case-insensitive; backends store them lowercased.
pub(crate) fn normalize_container_name(name: &str) -> Result<String, ObjectStoreError> {
    validate_container_name(name)?;
    Ok(name.to_lowercase())
}

/// Keys are relative `/`-separated paths without `.`/`..` or empty segments.
pub(crate) fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
    let valid = !key.is_empty()
        && !key.starts_with('/')
        && !key.contains('\\')
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if valid {
        Ok(())
    } else {
        Err(ObjectStoreError::InvalidKey(key.to_string()))
    }
}
