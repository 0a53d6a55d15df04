//! In-memory backend for tests and local runs.
//!
//! Records every batch delete request and can be told to fail specific
//! delete calls or reads, so partial-failure handling can be exercised.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::{
    normalize_container_name, validate_key, BatchDeleteResult, ObjectKeyStream, ObjectStore,
    ObjectStoreError,
};

/// One recorded `delete_objects` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteCall {
    pub container: String,
    pub keys: Vec<String>,
}

#[derive(Default)]
struct State {
    containers: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    delete_calls: Vec<DeleteCall>,
    /// Zero-based delete call indexes that fail as a whole
    failing_delete_calls: HashSet<usize>,
    failing_reads: HashSet<(String, String)>,
}

/// Object store held in process memory.
#[derive(Default)]
pub struct MemoryObjectStore {
    state: Mutex<State>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every delete request so far, in call order.
    pub fn delete_calls(&self) -> Vec<DeleteCall> {
        self.state().delete_calls.clone()
    }

    /// Make the `index`-th delete call (zero-based) fail with a backend error.
    pub fn fail_delete_call(&self, index: usize) {
        self.state().failing_delete_calls.insert(index);
    }

    /// Make reads of one object fail with a backend error.
    pub fn fail_read(&self, container: &str, key: &str) {
        self.state()
            .failing_reads
            .insert((container.to_lowercase(), key.to_string()));
    }

    /// Keys currently stored in a container, sorted.
    pub fn keys(&self, container: &str) -> Vec<String> {
        self.state()
            .containers
            .get(&container.to_lowercase())
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn create_container(&self, name: &str) -> Result<(), ObjectStoreError> {
        let name = normalize_container_name(name)?;
        self.state().containers.entry(name).or_default();
        Ok(())
    }

    async fn container_exists(&self, name: &str) -> Result<bool, ObjectStoreError> {
        let name = normalize_container_name(name)?;
        Ok(self.state().containers.contains_key(&name))
    }

    async fn list_objects(&self, container: &str) -> Result<ObjectKeyStream, ObjectStoreError> {
        let name = normalize_container_name(container)?;
        let keys = {
            let state = self.state();
            let objects = state
                .containers
                .get(&name)
                .ok_or_else(|| ObjectStoreError::ContainerNotFound(container.to_string()))?;
            objects.keys().cloned().collect::<Vec<_>>()
        };
        Ok(stream::iter(keys.into_iter().map(Ok)).boxed())
    }

    async fn delete_objects(
        &self,
        container: &str,
        keys: &[String],
    ) -> Result<BatchDeleteResult, ObjectStoreError> {
        let name = normalize_container_name(container)?;
        let mut state = self.state();
        let call_index = state.delete_calls.len();
        state.delete_calls.push(DeleteCall {
            container: container.to_string(),
            keys: keys.to_vec(),
        });
        if state.failing_delete_calls.contains(&call_index) {
            return Err(ObjectStoreError::Backend(format!(
                "injected failure for delete call {}",
                call_index
            )));
        }

        let objects = state
            .containers
            .get_mut(&name)
            .ok_or_else(|| ObjectStoreError::ContainerNotFound(container.to_string()))?;
        let mut result = BatchDeleteResult::default();
        for key in keys {
            if objects.remove(key).is_some() {
                result.deleted.push(key.clone());
            } else {
                result.failed.push((key.clone(), "object not found".to_string()));
            }
        }
        Ok(result)
    }

    async fn read_object(
        &self,
        container: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, ObjectStoreError> {
        let name = normalize_container_name(container)?;
        let state = self.state();
        if state
            .failing_reads
            .contains(&(name.clone(), key.to_string()))
        {
            return Err(ObjectStoreError::Backend(format!(
                "injected read failure for {}/{}",
                container, key
            )));
        }
        let objects = state
            .containers
            .get(&name)
            .ok_or_else(|| ObjectStoreError::ContainerNotFound(container.to_string()))?;
        Ok(objects.get(key).cloned())
    }

    async fn put_object(
        &self,
        container: &str,
        key: &str,
        data: Vec<u8>,
    ) -> Result<(), ObjectStoreError> {
        validate_key(key)?;
        let name = normalize_container_name(container)?;
        let mut state = self.state();
        let objects = state
            .containers
            .get_mut(&name)
            .ok_or_else(|| ObjectStoreError::ContainerNotFound(container.to_string()))?;
        objects.insert(key.to_string(), data);
        Ok(())
    }
}
