//! Container cleanup: delete every object the active ignore rules match.
//!
//! Deletes go out in batches of at most `batch_size` keys. A failed batch
//! is logged and skipped; the remaining batches still run.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use pipeline_blob::{BatchDeleteResult, ObjectStore, ObjectStoreError};
use pipeline_types::config::MAX_DELETE_BATCH;
use pipeline_types::CleanupSettings;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::ignore::{IgnoreParseError, IgnoreRules};

/// Where the rules applied to a container came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    /// The container's own override file
    Override,
    /// The configured default list
    Default,
}

/// Outcome of cleaning one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub container: String,
    pub source: RuleSource,
    /// Objects listed
    pub scanned: usize,
    /// Objects matched by the rules
    pub matched: usize,
    pub deleted: usize,
    /// Keys the backend refused inside otherwise successful batches
    pub failed_keys: usize,
    /// Delete requests issued
    pub batches: usize,
    /// Delete requests that failed as a whole and were skipped
    pub failed_batches: usize,
}

/// Applies ignore rules to containers.
pub struct ContainerCleaner {
    store: Arc<dyn ObjectStore>,
    defaults: IgnoreRules,
    override_file: String,
    batch_size: usize,
    max_concurrent_batches: usize,
}

impl ContainerCleaner {
    /// Build a cleaner; fails if a default pattern does not compile.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        settings: &CleanupSettings,
    ) -> Result<Self, IgnoreParseError> {
        Ok(Self {
            store,
            defaults: IgnoreRules::from_patterns(&settings.default_ignore)?,
            override_file: settings.override_file.clone(),
            batch_size: settings.batch_size.clamp(1, MAX_DELETE_BATCH),
            max_concurrent_batches: settings.max_concurrent_batches.max(1),
        })
    }

    /// Pick the rule source for a container.
    ///
    /// The override file wins when it exists and is non-empty, even if it
    /// holds only blank lines. An unparsable override falls back to
    /// defaults; a storage failure while reading it is returned.
    pub async fn resolve_rules(
        &self,
        container: &str,
    ) -> Result<(IgnoreRules, RuleSource), ObjectStoreError> {
        let Some(bytes) = self.store.read_object(container, &self.override_file).await? else {
            return Ok((self.defaults.clone(), RuleSource::Default));
        };
        if bytes.is_empty() {
            return Ok((self.defaults.clone(), RuleSource::Default));
        }

        match IgnoreRules::from_bytes(&bytes) {
            Ok(rules) => {
                debug!(container = %container, rules = rules.len(), "Using override rules");
                Ok((rules, RuleSource::Override))
            }
            Err(e) => {
                warn!(
                    container = %container,
                    file = %self.override_file,
                    error = %e,
                    "Override rules unparsable, using defaults"
                );
                Ok((self.defaults.clone(), RuleSource::Default))
            }
        }
    }

    /// Delete every object in `container` the active rules match.
    pub async fn clean(&self, container: &str) -> Result<CleanupReport, ObjectStoreError> {
        let (rules, source) = self.resolve_rules(container).await?;

        let mut listing = self.store.list_objects(container).await?;
        let mut scanned = 0;
        let mut doomed = Vec::new();
        while let Some(key) = listing.try_next().await? {
            scanned += 1;
            if rules.is_ignored(&key) {
                doomed.push(key);
            }
        }

        let mut report = CleanupReport {
            container: container.to_string(),
            source,
            scanned,
            matched: doomed.len(),
            deleted: 0,
            failed_keys: 0,
            batches: 0,
            failed_batches: 0,
        };

        let outcomes: Vec<(usize, usize, Result<BatchDeleteResult, ObjectStoreError>)> =
            stream::iter(doomed.chunks(self.batch_size).enumerate())
                .map(|(index, batch)| async move {
                    (index, batch.len(), self.store.delete_objects(container, batch).await)
                })
                .buffer_unordered(self.max_concurrent_batches)
                .collect()
                .await;

        for (index, size, outcome) in outcomes {
            report.batches += 1;
            match outcome {
                Ok(result) => {
                    for (key, reason) in &result.failed {
                        warn!(container = %container, key = %key, reason = %reason, "Object not deleted");
                    }
                    report.deleted += result.deleted.len();
                    report.failed_keys += result.failed.len();
                }
                Err(e) => {
                    error!(
                        container = %container,
                        batch = index,
                        size,
                        error = %e,
                        "Batch delete failed, skipping batch"
                    );
                    report.failed_batches += 1;
                }
            }
        }

        info!(
            container = %container,
            source = ?report.source,
            scanned = report.scanned,
            matched = report.matched,
            deleted = report.deleted,
            failed_batches = report.failed_batches,
            "Container cleaned"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_blob::MemoryObjectStore;

    async fn store_with(keys: &[&str]) -> Arc<MemoryObjectStore> {
        let store = Arc::new(MemoryObjectStore::new());
        store.create_container("c").await.unwrap();
        for key in keys {
            store.put_object("c", key, b"x".to_vec()).await.unwrap();
        }
        store
    }

    fn settings(defaults: &[&str]) -> CleanupSettings {
        CleanupSettings {
            default_ignore: defaults.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_defaults_apply_without_override() {
        let store = store_with(&["a.txt", "b.tmp"]).await;
        let cleaner = ContainerCleaner::new(store.clone(), &settings(&["*.tmp"])).unwrap();

        let report = cleaner.clean("c").await.unwrap();
        assert_eq!(report.source, RuleSource::Default);
        assert_eq!(report.scanned, 2);
        assert_eq!(report.deleted, 1);
        assert_eq!(store.keys("c"), vec!["a.txt"]);
    }

    #[tokio::test]
    async fn test_override_replaces_defaults() {
        let store = store_with(&["a.txt", "b.tmp", "c.log"]).await;
        store
            .put_object("c", ".ignore-rules", b"*.log\n".to_vec())
            .await
            .unwrap();
        let cleaner = ContainerCleaner::new(store.clone(), &settings(&["*.tmp"])).unwrap();

        let report = cleaner.clean("c").await.unwrap();
        assert_eq!(report.source, RuleSource::Override);
        assert_eq!(store.keys("c"), vec![".ignore-rules", "a.txt", "b.tmp"]);
    }

    #[tokio::test]
    async fn test_comment_only_override_deletes_nothing() {
        let store = store_with(&["b.tmp"]).await;
        store
            .put_object("c", ".ignore-rules", b"# keep everything\n".to_vec())
            .await
            .unwrap();
        let cleaner = ContainerCleaner::new(store.clone(), &settings(&["*.tmp"])).unwrap();

        let report = cleaner.clean("c").await.unwrap();
        assert_eq!(report.source, RuleSource::Override);
        assert_eq!(report.matched, 0);
        assert!(store.delete_calls().is_empty());
        assert!(store.keys("c").contains(&"b.tmp".to_string()));
    }

    #[tokio::test]
    async fn test_empty_override_uses_defaults() {
        let store = store_with(&["b.tmp"]).await;
        store
            .put_object("c", ".ignore-rules", Vec::new())
            .await
            .unwrap();
        let cleaner = ContainerCleaner::new(store.clone(), &settings(&["*.tmp"])).unwrap();

        let report = cleaner.clean("c").await.unwrap();
        assert_eq!(report.source, RuleSource::Default);
        assert_eq!(report.deleted, 1);
    }

    #[tokio::test]
    async fn test_blank_line_override_deletes_nothing() {
        let store = store_with(&["b.tmp"]).await;
        store
            .put_object("c", ".ignore-rules", b"\n".to_vec())
            .await
            .unwrap();
        let cleaner = ContainerCleaner::new(store.clone(), &settings(&["*.tmp"])).unwrap();

        let report = cleaner.clean("c").await.unwrap();
        assert_eq!(report.source, RuleSource::Override);
        assert_eq!(report.matched, 0);
        assert!(store.delete_calls().is_empty());
        assert!(store.keys("c").contains(&"b.tmp".to_string()));
    }

    #[tokio::test]
    async fn test_unparsable_override_uses_defaults() {
        let store = store_with(&["b.tmp", "x[1].txt"]).await;
        store
            .put_object("c", ".ignore-rules", b"x[1".to_vec())
            .await
            .unwrap();
        let cleaner = ContainerCleaner::new(store.clone(), &settings(&["*.tmp"])).unwrap();

        let (_, source) = cleaner.resolve_rules("c").await.unwrap();
        assert_eq!(source, RuleSource::Default);
    }

    #[tokio::test]
    async fn test_override_read_error_propagates() {
        let store = store_with(&["b.tmp"]).await;
        store.fail_read("c", ".ignore-rules");
        let cleaner = ContainerCleaner::new(store.clone(), &settings(&["*.tmp"])).unwrap();

        assert!(cleaner.clean("c").await.is_err());
        assert!(store.delete_calls().is_empty());
    }

    #[tokio::test]
    async fn test_batches_split_at_256() {
        let keys: Vec<String> = (0..300).map(|i| format!("f{:03}.tmp", i)).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let store = store_with(&refs).await;
        let cleaner = ContainerCleaner::new(store.clone(), &settings(&["*.tmp"])).unwrap();

        let report = cleaner.clean("c").await.unwrap();
        let sizes: Vec<usize> = store.delete_calls().iter().map(|c| c.keys.len()).collect();
        assert_eq!(sizes, vec![256, 44]);
        assert_eq!(report.batches, 2);
        assert_eq!(report.deleted, 300);
    }

    #[tokio::test]
    async fn test_failed_batch_is_skipped() {
        let keys: Vec<String> = (0..300).map(|i| format!("f{:03}.tmp", i)).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let store = store_with(&refs).await;
        store.fail_delete_call(0);
        let cleaner = ContainerCleaner::new(store.clone(), &settings(&["*.tmp"])).unwrap();

        let report = cleaner.clean("c").await.unwrap();
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.deleted, 44);
        assert_eq!(store.keys("c").len(), 256);
    }

    #[tokio::test]
    async fn test_missing_container_is_error() {
        let store = Arc::new(MemoryObjectStore::new());
        let cleaner = ContainerCleaner::new(store, &settings(&["*.tmp"])).unwrap();
        let err = cleaner.clean("nope").await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::ContainerNotFound(_)));
    }
}
