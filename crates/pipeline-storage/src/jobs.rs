//! Job store abstraction.
//!
//! Updates are keyed by id and last-writer-wins; there is no concurrency
//! token. A missing id surfaces as [`StorageError::JobNotFound`].

use async_trait::async_trait;
use pipeline_types::{Job, JobId, JobUpdate, NewJob};

use crate::db::Storage;
use crate::error::StorageError;

/// Persisted job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a job in `Created` status with the next id.
    async fn create(&self, new_job: NewJob) -> Result<Job, StorageError>;

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, StorageError>;

    /// Apply a partial update; fails with `JobNotFound` for an unknown id.
    async fn update(&self, id: JobId, update: JobUpdate) -> Result<Job, StorageError>;

    async fn list(&self) -> Result<Vec<Job>, StorageError>;
}

#[async_trait]
impl JobStore for Storage {
    async fn create(&self, new_job: NewJob) -> Result<Job, StorageError> {
        self.create_job(new_job)
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, StorageError> {
        self.get_job(id)
    }

    async fn update(&self, id: JobId, update: JobUpdate) -> Result<Job, StorageError> {
        self.update_job(id, update)
    }

    async fn list(&self) -> Result<Vec<Job>, StorageError> {
        self.list_jobs()
    }
}
