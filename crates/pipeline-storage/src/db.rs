//! RocksDB wrapper for pipeline storage.
//!
//! Provides:
//! - Database open/close with column family setup
//! - Job records with persistent monotonic ids
//! - Leased queue messages, one prefix per named queue
//! - Atomic write batches for record + counter updates

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use pipeline_types::{Job, JobId, JobUpdate, NewJob};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, info};

use crate::column_families::{build_cf_descriptors, ALL_CF_NAMES, CF_COUNTERS, CF_JOBS, CF_QUEUE};
use crate::error::{QueueError, StorageError};
use crate::keys::{CounterKey, JobKey, QueueKey};
use crate::queue::QueueRecord;

const JOB_COUNTER: &str = "job";
const QUEUE_COUNTER: &str = "queue";

/// Main storage interface for the pipeline
pub struct Storage {
    db: DB,
    read_only: bool,
    /// Serializes read-modify-write of job records and the job id counter
    job_lock: Mutex<()>,
    /// Serializes leasing so two receivers never take the same message
    queue_lock: Mutex<()>,
}

/// RocksDB reports a held LOCK file as an IO error naming the lock.
fn is_lock_conflict(err: &rocksdb::Error) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains("lock file") || message.contains("lock hold")
}

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(2);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors).map_err(|e| {
            if is_lock_conflict(&e) {
                StorageError::Locked(path.to_path_buf())
            } else {
                StorageError::RocksDb(e)
            }
        })?;

        Ok(Self {
            db,
            read_only: false,
            job_lock: Mutex::new(()),
            queue_lock: Mutex::new(()),
        })
    }

    /// Open existing storage without taking the database lock.
    ///
    /// Works while another process holds the database open for writing.
    /// Sees the state as of open time; writes fail.
    pub fn open_read_only(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage read-only at {:?}", path);

        let db = DB::open_cf_for_read_only(&Options::default(), path, ALL_CF_NAMES, false)?;

        Ok(Self {
            db,
            read_only: true,
            job_lock: Mutex::new(()),
            queue_lock: Mutex::new(()),
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    /// Read a counter's current value (0 if never written)
    fn read_counter(&self, name: &str) -> Result<u64, StorageError> {
        let cf = self.cf(CF_COUNTERS)?;
        match self.db.get_cf(cf, CounterKey::new(name).to_bytes())? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StorageError::Serialization(format!("Corrupt counter '{}'", name))
                })?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    // ===== Jobs =====

    /// Create a job with the next id, in `Created` status.
    pub fn create_job(&self, new_job: NewJob) -> Result<Job, StorageError> {
        let _guard = lock(&self.job_lock);
        let jobs_cf = self.cf(CF_JOBS)?;
        let counters_cf = self.cf(CF_COUNTERS)?;

        let next = self.read_counter(JOB_COUNTER)? + 1;
        let id = JobId::try_from(next)
            .map_err(|_| StorageError::Key(format!("Job id overflow at {}", next)))?;
        let job = new_job.into_job(id, Utc::now());

        let mut batch = WriteBatch::default();
        batch.put_cf(jobs_cf, JobKey::new(id).to_bytes(), job.to_bytes()?);
        batch.put_cf(
            counters_cf,
            CounterKey::new(JOB_COUNTER).to_bytes(),
            next.to_be_bytes(),
        );
        self.db.write(batch)?;

        debug!(job_id = id, "Created job");
        Ok(job)
    }

    /// Get a job by id
    pub fn get_job(&self, id: JobId) -> Result<Option<Job>, StorageError> {
        let cf = self.cf(CF_JOBS)?;
        match self.db.get_cf(cf, JobKey::new(id).to_bytes())? {
            Some(bytes) => Ok(Some(Job::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Apply a partial update to a job. Last writer wins.
    pub fn update_job(&self, id: JobId, update: JobUpdate) -> Result<Job, StorageError> {
        let _guard = lock(&self.job_lock);
        let mut job = self.get_job(id)?.ok_or(StorageError::JobNotFound(id))?;
        update.apply(&mut job, Utc::now());

        let cf = self.cf(CF_JOBS)?;
        self.db.put_cf(cf, JobKey::new(id).to_bytes(), job.to_bytes()?)?;
        debug!(job_id = id, status = %job.status, "Updated job");
        Ok(job)
    }

    /// All jobs ordered by id
    pub fn list_jobs(&self) -> Result<Vec<Job>, StorageError> {
        let cf = self.cf(CF_JOBS)?;
        let mut jobs = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            jobs.push(Job::from_bytes(&value)?);
        }
        Ok(jobs)
    }

    // ===== Queues =====

    /// Append a message to the tail of a queue, visible immediately.
    pub fn enqueue(&self, queue: &str, text: &str) -> Result<QueueRecord, StorageError> {
        let _guard = lock(&self.queue_lock);
        let queue_cf = self.cf(CF_QUEUE)?;
        let counters_cf = self.cf(CF_COUNTERS)?;

        let sequence = self.read_counter(QUEUE_COUNTER)? + 1;
        let key = QueueKey::new(queue, sequence);
        let now_ms = Utc::now().timestamp_millis();
        let record = QueueRecord {
            message_id: key.message_id(),
            sequence,
            text: text.to_string(),
            inserted_at_ms: now_ms,
            visible_at_ms: now_ms,
            delivery_count: 0,
            receipt: None,
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(queue_cf, key.to_bytes(), record.to_bytes()?);
        batch.put_cf(
            counters_cf,
            CounterKey::new(QUEUE_COUNTER).to_bytes(),
            sequence.to_be_bytes(),
        );
        self.db.write(batch)?;

        debug!(queue = %queue, message_id = %record.message_id, "Enqueued message");
        Ok(record)
    }

    /// Lease the oldest visible message of a queue.
    ///
    /// The leased record gets `receipt`, its delivery count incremented and
    /// stays hidden until `now + lease_ms`.
    pub fn lease_next(
        &self,
        queue: &str,
        lease_ms: i64,
        receipt: String,
    ) -> Result<Option<QueueRecord>, StorageError> {
        let _guard = lock(&self.queue_lock);
        let cf = self.cf(CF_QUEUE)?;
        let prefix = QueueKey::prefix(queue);
        let now_ms = Utc::now().timestamp_millis();

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_slice(), Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let mut record = QueueRecord::from_bytes(&value)?;
            if record.visible_at_ms > now_ms {
                continue;
            }

            record.delivery_count += 1;
            record.receipt = Some(receipt);
            record.visible_at_ms = now_ms + lease_ms;
            self.db.put_cf(cf, &key, record.to_bytes()?)?;

            debug!(
                queue = %queue,
                message_id = %record.message_id,
                delivery_count = record.delivery_count,
                "Leased message"
            );
            return Ok(Some(record));
        }
        Ok(None)
    }

    /// Delete a leased message. The receipt must belong to the current lease.
    pub fn remove_message(
        &self,
        queue: &str,
        message_id: &str,
        receipt: &str,
    ) -> Result<(), QueueError> {
        let _guard = lock(&self.queue_lock);
        let cf = self.cf(CF_QUEUE)?;
        let key = QueueKey::from_message_id(queue, message_id)?.to_bytes();

        let bytes = self
            .db
            .get_cf(cf, &key)
            .map_err(StorageError::from)?
            .ok_or_else(|| QueueError::MessageNotFound(message_id.to_string()))?;
        let record = QueueRecord::from_bytes(&bytes)?;
        if record.receipt.as_deref() != Some(receipt) {
            return Err(QueueError::ReceiptMismatch(message_id.to_string()));
        }

        self.db.delete_cf(cf, &key).map_err(StorageError::from)?;
        debug!(queue = %queue, message_id = %message_id, "Deleted message");
        Ok(())
    }

    /// Number of messages in a queue, leased or not
    pub fn queue_len(&self, queue: &str) -> Result<u64, StorageError> {
        let cf = self.cf(CF_QUEUE)?;
        let prefix = QueueKey::prefix(queue);
        let mut count = 0u64;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_slice(), Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    // ===== Admin Operations =====

    /// Flush all memtables to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        if self.read_only {
            return Ok(());
        }
        self.db.flush()?;
        for cf_name in [CF_JOBS, CF_QUEUE, CF_COUNTERS] {
            self.db.flush_cf(self.cf(cf_name)?)?;
        }
        Ok(())
    }

    /// Get database statistics.
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        Ok(StorageStats {
            job_count: self.count_cf_entries(self.cf(CF_JOBS)?)?,
            queued_message_count: self.count_cf_entries(self.cf(CF_QUEUE)?)?,
            disk_usage_bytes: self.get_disk_usage(),
        })
    }

    fn count_cf_entries(&self, cf: &rocksdb::ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> u64 {
        std::fs::read_dir(self.db.path())
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|entry| entry.metadata().ok())
                    .map(|metadata| metadata.len())
                    .sum()
            })
            .unwrap_or(0)
    }
}

/// Statistics about the storage.
#[derive(Debug, Default)]
pub struct StorageStats {
    /// Number of job records
    pub job_count: u64,
    /// Messages across every queue, leased or not
    pub queued_message_count: u64,
    /// Total disk usage in bytes
    pub disk_usage_bytes: u64,
}
