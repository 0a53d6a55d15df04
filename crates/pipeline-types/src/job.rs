//! Job record and status state machine.
//!
//! A job tracks one upload-to-searchable-index workflow. Its `id` is the sole
//! correlation key between queue messages and persisted state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::structure::TreeNode;

/// Identifier of a job, assigned at creation and never changed.
pub type JobId = i64;

/// Lifecycle status of a job.
///
/// Progression is monotonic: `Created -> InProgress -> Success`. Any
/// non-terminal status may move to `Failed`. Terminal statuses never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Row exists, container populated, waiting for cleanup
    Created,
    /// Container cleaned, waiting for index provisioning
    InProgress,
    /// All four artifacts submitted to the search service
    Success,
    /// Gave up on the job
    Failed,
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            JobStatus::Created => 0,
            JobStatus::InProgress => 1,
            JobStatus::Success | JobStatus::Failed => 2,
        }
    }

    /// Whether the status can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a forward transition.
    ///
    /// Writing the current status again is not an advance; callers treat
    /// it as a no-op.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == JobStatus::Failed {
            return true;
        }
        next.rank() > self.rank()
    }

    /// Whether `self` has already reached (or passed) `target`.
    pub fn has_reached(self, target: JobStatus) -> bool {
        self == target || self.rank() > target.rank()
    }

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Created => "CREATED",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four artifacts provisioned on the search service, in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Datasource,
    Index,
    Skillset,
    Indexer,
}

impl ArtifactKind {
    /// Submission order. Later artifacts reference earlier ones by name.
    pub const SUBMISSION_ORDER: [ArtifactKind; 4] = [
        ArtifactKind::Datasource,
        ArtifactKind::Index,
        ArtifactKind::Skillset,
        ArtifactKind::Indexer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Datasource => "datasource",
            ArtifactKind::Index => "index",
            ArtifactKind::Skillset => "skillset",
            ArtifactKind::Indexer => "indexer",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Definition documents for the four artifacts.
///
/// Each is independently nullable and opaque to the pipeline; only the
/// indexing gateway understands their contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDefinitions {
    #[serde(default)]
    pub datasource: Option<Value>,
    #[serde(default)]
    pub index: Option<Value>,
    #[serde(default)]
    pub skillset: Option<Value>,
    #[serde(default)]
    pub indexer: Option<Value>,
}

impl JobDefinitions {
    /// Definition for one artifact, if present.
    pub fn get(&self, kind: ArtifactKind) -> Option<&Value> {
        match kind {
            ArtifactKind::Datasource => self.datasource.as_ref(),
            ArtifactKind::Index => self.index.as_ref(),
            ArtifactKind::Skillset => self.skillset.as_ref(),
            ArtifactKind::Indexer => self.indexer.as_ref(),
        }
    }

    fn slot(&mut self, kind: ArtifactKind) -> &mut Option<Value> {
        match kind {
            ArtifactKind::Datasource => &mut self.datasource,
            ArtifactKind::Index => &mut self.index,
            ArtifactKind::Skillset => &mut self.skillset,
            ArtifactKind::Indexer => &mut self.indexer,
        }
    }

    /// Artifacts whose definition is null, in submission order.
    ///
    /// A JSON `null` document counts as missing.
    pub fn missing(&self) -> Vec<ArtifactKind> {
        ArtifactKind::SUBMISSION_ORDER
            .into_iter()
            .filter(|kind| matches!(self.get(*kind), None | Some(Value::Null)))
            .collect()
    }

    /// All four definitions in submission order, or `None` if any is missing.
    pub fn in_submission_order(&self) -> Option<Vec<(ArtifactKind, &Value)>> {
        if !self.missing().is_empty() {
            return None;
        }
        ArtifactKind::SUBMISSION_ORDER
            .into_iter()
            .map(|kind| self.get(kind).map(|value| (kind, value)))
            .collect()
    }
}

/// Persisted job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Human-readable name, usually the search index name
    pub name: String,
    pub status: JobStatus,
    /// Object-storage container holding the uploaded content
    pub container_ref: String,
    #[serde(default)]
    pub definitions: JobDefinitions,
    /// Cached tree snapshot of the container; never written by the consumers
    #[serde(default)]
    pub structure: Option<TreeNode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Input for creating a job. The store assigns the id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub container_ref: String,
    #[serde(default)]
    pub definitions: JobDefinitions,
}

impl NewJob {
    pub fn new(name: impl Into<String>, container_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            container_ref: container_ref.into(),
            definitions: JobDefinitions::default(),
        }
    }

    pub fn with_definitions(mut self, definitions: JobDefinitions) -> Self {
        self.definitions = definitions;
        self
    }

    /// Materialize the record with an assigned id, in `Created` status.
    pub fn into_job(self, id: JobId, now: DateTime<Utc>) -> Job {
        Job {
            id,
            name: self.name,
            status: JobStatus::Created,
            container_ref: self.container_ref,
            definitions: self.definitions,
            structure: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied by id. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub datasource: Option<Value>,
    pub index: Option<Value>,
    pub skillset: Option<Value>,
    pub indexer: Option<Value>,
    pub structure: Option<TreeNode>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn structure(tree: TreeNode) -> Self {
        Self {
            structure: Some(tree),
            ..Default::default()
        }
    }

    pub fn with_definition(mut self, kind: ArtifactKind, value: Value) -> Self {
        match kind {
            ArtifactKind::Datasource => self.datasource = Some(value),
            ArtifactKind::Index => self.index = Some(value),
            ArtifactKind::Skillset => self.skillset = Some(value),
            ArtifactKind::Indexer => self.indexer = Some(value),
        }
        self
    }

    /// Apply to a record in place, stamping `updated_at`.
    pub fn apply(self, job: &mut Job, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            job.status = status;
        }
        for (kind, value) in [
            (ArtifactKind::Datasource, self.datasource),
            (ArtifactKind::Index, self.index),
            (ArtifactKind::Skillset, self.skillset),
            (ArtifactKind::Indexer, self.indexer),
        ] {
            if let Some(value) = value {
                *job.definitions.slot(kind) = Some(value);
            }
        }
        if let Some(tree) = self.structure {
            job.structure = Some(tree);
        }
        job.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_definitions() -> JobDefinitions {
        JobDefinitions {
            datasource: Some(json!({"name": "ds"})),
            index: Some(json!({"name": "idx"})),
            skillset: Some(json!({"name": "sk"})),
            indexer: Some(json!({"name": "ixr"})),
        }
    }

    #[test]
    fn test_status_forward_transitions() {
        assert!(JobStatus::Created.can_advance_to(JobStatus::InProgress));
        assert!(JobStatus::Created.can_advance_to(JobStatus::Success));
        assert!(JobStatus::InProgress.can_advance_to(JobStatus::Success));
        assert!(JobStatus::InProgress.can_advance_to(JobStatus::Failed));
        assert!(JobStatus::Created.can_advance_to(JobStatus::Failed));
    }

    #[test]
    fn test_status_never_moves_backwards() {
        assert!(!JobStatus::InProgress.can_advance_to(JobStatus::Created));
        assert!(!JobStatus::InProgress.can_advance_to(JobStatus::InProgress));
        assert!(!JobStatus::Success.can_advance_to(JobStatus::InProgress));
        assert!(!JobStatus::Success.can_advance_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_advance_to(JobStatus::Success));
    }

    #[test]
    fn test_status_has_reached() {
        assert!(JobStatus::InProgress.has_reached(JobStatus::InProgress));
        assert!(JobStatus::Success.has_reached(JobStatus::InProgress));
        assert!(!JobStatus::Created.has_reached(JobStatus::InProgress));
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&JobStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        let parsed: JobStatus = serde_json::from_str("\"SUCCESS\"").unwrap();
        assert_eq!(parsed, JobStatus::Success);
        assert_eq!(JobStatus::Created.to_string(), "CREATED");
    }

    #[test]
    fn test_definitions_missing() {
        let mut defs = full_definitions();
        assert!(defs.missing().is_empty());
        assert_eq!(defs.in_submission_order().unwrap().len(), 4);

        defs.indexer = None;
        defs.index = Some(Value::Null);
        assert_eq!(
            defs.missing(),
            vec![ArtifactKind::Index, ArtifactKind::Indexer]
        );
        assert!(defs.in_submission_order().is_none());
    }

    #[test]
    fn test_submission_order() {
        let defs = full_definitions();
        let kinds: Vec<_> = defs
            .in_submission_order()
            .unwrap()
            .into_iter()
            .map(|(kind, _)| kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                ArtifactKind::Datasource,
                ArtifactKind::Index,
                ArtifactKind::Skillset,
                ArtifactKind::Indexer
            ]
        );
    }

    #[test]
    fn test_update_apply_leaves_unset_fields() {
        let now = Utc::now();
        let mut job = NewJob::new("index-acme", "regena-acme-1")
            .with_definitions(full_definitions())
            .into_job(7, now);

        JobUpdate::status(JobStatus::InProgress).apply(&mut job, now);
        assert_eq!(job.status, JobStatus::InProgress);
        assert_eq!(job.definitions, full_definitions());

        JobUpdate::default()
            .with_definition(ArtifactKind::Skillset, json!({"name": "sk2"}))
            .apply(&mut job, now);
        assert_eq!(job.definitions.skillset, Some(json!({"name": "sk2"})));
        assert_eq!(job.status, JobStatus::InProgress);
    }

    #[test]
    fn test_job_roundtrip() {
        let job = NewJob::new("index-acme", "regena-acme-1").into_job(1, Utc::now());
        let bytes = job.to_bytes().unwrap();
        let decoded = Job::from_bytes(&bytes).unwrap();
        assert_eq!(job, decoded);
        assert_eq!(decoded.status, JobStatus::Created);
    }
}
