//! Scripted collaborators.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::{GenerationError, PersistenceError};
use crate::generation::{GenerationProvider, GenerationRequest, GenerationResponse};
use crate::persistence::ProjectRepository;

/// A provider that replays queued responses in order and records requests.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<GenerationResponse, GenerationError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedProvider {
    /// Creates a provider with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a text response.
    #[must_use]
    pub fn respond(self, content: impl Into<String>) -> Self {
        self.script.lock().push_back(Ok(GenerationResponse::text(content)));
        self
    }

    /// Queues a failure.
    #[must_use]
    pub fn fail(self, err: GenerationError) -> Self {
        self.script.lock().push_back(Err(err));
        self
    }

    /// Number of generate calls served.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Recorded requests in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    /// Responses not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, GenerationError> {
        self.requests.lock().push(request);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(GenerationError::Request("script exhausted".to_string())))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// A repository whose writes start failing after `ok_writes` successes.
#[derive(Debug)]
pub struct FailingRepository {
    ok_writes: usize,
    writes: AtomicUsize,
}

impl FailingRepository {
    /// Creates a repository that accepts `ok_writes` upserts.
    #[must_use]
    pub const fn new(ok_writes: usize) -> Self {
        Self {
            ok_writes,
            writes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProjectRepository for FailingRepository {
    async fn fetch(&self, _project_id: &str) -> Result<Option<serde_json::Value>, PersistenceError> {
        Ok(None)
    }

    async fn upsert(&self, _project_id: &str, _document: serde_json::Value) -> Result<(), PersistenceError> {
        if self.writes.fetch_add(1, Ordering::SeqCst) < self.ok_writes {
            Ok(())
        } else {
            Err(PersistenceError::Backend("connection reset".to_string()))
        }
    }
}
