//! Scripted indexing gateway for testing.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use pipeline_types::ArtifactKind;
use serde_json::Value;

use crate::{IndexingError, IndexingErrorKind, IndexingGateway, SubmitOutcome};

/// One submission received by the mock, successful or not.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub artifact: ArtifactKind,
    pub definition: Value,
}

/// A failure the mock returns for an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptedFailure {
    pub kind: IndexingErrorKind,
    /// Remaining failures; `None` fails forever
    pub remaining: Option<u32>,
}

#[derive(Default)]
struct State {
    submissions: Vec<Submission>,
    failures: HashMap<ArtifactKind, ScriptedFailure>,
}

/// Gateway that records submissions in order and fails on request.
#[derive(Default)]
pub struct MockIndexingGateway {
    state: Mutex<State>,
}

impl MockIndexingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next submission of `artifact` once.
    pub fn fail_once(&self, artifact: ArtifactKind, kind: IndexingErrorKind) {
        self.fail_times(artifact, kind, 1);
    }

    /// Fail the next `times` submissions of `artifact`.
    pub fn fail_times(&self, artifact: ArtifactKind, kind: IndexingErrorKind, times: u32) {
        self.state().failures.insert(
            artifact,
            ScriptedFailure {
                kind,
                remaining: Some(times),
            },
        );
    }

    /// Fail every submission of `artifact`.
    pub fn fail_always(&self, artifact: ArtifactKind, kind: IndexingErrorKind) {
        self.state().failures.insert(
            artifact,
            ScriptedFailure {
                kind,
                remaining: None,
            },
        );
    }

    /// Every submission attempt, in call order.
    pub fn submissions(&self) -> Vec<Submission> {
        self.state().submissions.clone()
    }

    /// Artifact kinds of every submission attempt, in call order.
    pub fn submitted_kinds(&self) -> Vec<ArtifactKind> {
        self.state()
            .submissions
            .iter()
            .map(|s| s.artifact)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.state().submissions.len()
    }
}

#[async_trait]
impl IndexingGateway for MockIndexingGateway {
    async fn submit(
        &self,
        artifact: ArtifactKind,
        definition: &Value,
    ) -> Result<SubmitOutcome, IndexingError> {
        let mut state = self.state();
        state.submissions.push(Submission {
            artifact,
            definition: definition.clone(),
        });

        let Some(failure) = state.failures.get_mut(&artifact) else {
            return Ok(SubmitOutcome::Created);
        };
        let kind = failure.kind;
        match failure.remaining.as_mut() {
            None => {}
            Some(0) => return Ok(SubmitOutcome::Created),
            Some(n) => *n -= 1,
        }
        Err(IndexingError::of_kind(
            kind,
            artifact,
            format!("scripted {:?} failure", kind),
        ))
    }
}
