//! Execution contexts handed to stages.

use super::RunState;
use crate::artifacts::{ArtifactSink, NoOpArtifactSink};
use crate::cancellation::CancellationToken;
use crate::core::{event_types, Thought, ThoughtKind};
use crate::errors::{EventBusError, StageError};
use crate::events::{EventSink, NoOpEventSink};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Run-wide collaborators shared by every stage of one run.
#[derive(Clone)]
pub struct PipelineContext {
    /// Event sink for the run.
    pub events: Arc<dyn EventSink>,
    /// Artifact and row sink.
    pub artifacts: Arc<dyn ArtifactSink>,
    /// The run's cancellation token.
    pub cancel: CancellationToken,
    /// Per-stage timeout.
    pub stage_timeout: Option<Duration>,
}

impl PipelineContext {
    /// Creates a context with the given sink and no-op artifacts.
    #[must_use]
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            events,
            artifacts: Arc::new(NoOpArtifactSink),
            cancel: CancellationToken::new(),
            stage_timeout: None,
        }
    }

    /// Sets the artifact sink.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactSink>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sets the per-stage timeout.
    #[must_use]
    pub const fn with_stage_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stage_timeout = timeout;
        self
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new(Arc::new(NoOpEventSink))
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("cancel", &self.cancel)
            .field("stage_timeout", &self.stage_timeout)
            .finish_non_exhaustive()
    }
}

/// What one stage may see and do.
pub struct StageContext {
    run_id: String,
    stage: String,
    required: Vec<String>,
    optional: Vec<String>,
    events: Arc<dyn EventSink>,
    artifacts: Arc<dyn ArtifactSink>,
    cancel: CancellationToken,
}

impl StageContext {
    /// Creates a stage context.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        stage: impl Into<String>,
        required: Vec<String>,
        optional: Vec<String>,
        pipeline: &PipelineContext,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            stage: stage.into(),
            required,
            optional,
            events: Arc::clone(&pipeline.events),
            artifacts: Arc::clone(&pipeline.artifacts),
            cancel: pipeline.cancel.clone(),
        }
    }

    /// The run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The stage name.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage
    }

    /// The artifact sink.
    #[must_use]
    pub fn artifacts(&self) -> &dyn ArtifactSink {
        self.artifacts.as_ref()
    }

    /// The run's cancellation token.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn is_declared(&self, key: &str) -> bool {
        self.required.iter().chain(&self.optional).any(|d| d == key)
    }

    /// Reads and decodes a required dependency.
    pub fn input<T: DeserializeOwned>(&self, state: &RunState, key: &str) -> Result<T, StageError> {
        self.optional_input(state, key)?
            .ok_or_else(|| StageError::missing_dependency(&self.stage, key))
    }

    /// Reads and decodes a dependency that may be absent.
    pub fn optional_input<T: DeserializeOwned>(
        &self,
        state: &RunState,
        key: &str,
    ) -> Result<Option<T>, StageError> {
        if !self.is_declared(key) {
            return Err(StageError::undeclared_dependency(&self.stage, key));
        }
        let Some(raw) = state.bundle().get(key) else {
            return Ok(None);
        };
        T::deserialize(raw).map(Some).map_err(|e| {
            StageError::validation(
                &self.stage,
                format!("output of '{key}' does not match the expected shape: {e}"),
            )
        })
    }

    /// Stores this stage's output under its own bundle key.
    pub fn store_output<T: Serialize>(
        &self,
        state: &mut RunState,
        output: &T,
    ) -> Result<serde_json::Value, StageError> {
        let value = serde_json::to_value(output).map_err(|e| {
            StageError::internal(&self.stage, format!("output not serializable: {e}"))
        })?;
        state.bundle_mut().insert(&self.stage, value.clone());
        Ok(value)
    }

    /// Publishes a non-terminal event.
    pub async fn emit(&self, event_type: &str, data: serde_json::Value) -> Result<(), StageError> {
        if event_types::is_terminal(event_type) {
            let err = EventBusError::ReservedEventType(event_type.to_string());
            return Err(StageError::internal(&self.stage, err.to_string()));
        }
        self.events
            .emit(event_type, data)
            .await
            .map_err(|e| StageError::internal(&self.stage, e.to_string()))
    }

    /// Publishes an `artifact_<name>` event.
    pub async fn publish_artifact(&self, name: &str, data: serde_json::Value) -> Result<(), StageError> {
        self.emit(&event_types::artifact(name), data).await
    }

    /// Records a thought on the state and publishes it.
    pub async fn think(
        &self,
        state: &mut RunState,
        kind: ThoughtKind,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Result<(), StageError> {
        let thought = Thought {
            stage: self.stage.clone(),
            kind,
            message: message.into(),
            data,
            at: crate::utils::iso_timestamp(),
        };
        let payload = serde_json::to_value(&thought)
            .map_err(|e| StageError::internal(&self.stage, e.to_string()))?;
        state.thoughts.push(thought);
        self.emit(event_types::THOUGHT, payload).await
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("run_id", &self.run_id)
            .field("stage", &self.stage)
            .field("required", &self.required)
            .field("optional", &self.optional)
            .finish_non_exhaustive()
    }
}
