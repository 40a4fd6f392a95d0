//! The run worker.

use crate::artifacts::{ArtifactSink, NoOpArtifactSink};
use crate::cancellation::CancellationToken;
use crate::core::event_types;
use crate::events::{EventBus, RunEmitter};
use crate::pipeline::{Pipeline, PipelineContext, PipelineObserver, RunState};
use crate::registry::RunRegistry;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Folds stage durations into the run record as stages finish.
#[derive(Debug)]
pub struct TimingObserver {
    registry: Arc<RunRegistry>,
    run_id: String,
}

impl TimingObserver {
    /// Creates an observer for `run_id`.
    #[must_use]
    pub fn new(registry: Arc<RunRegistry>, run_id: impl Into<String>) -> Self {
        Self {
            registry,
            run_id: run_id.into(),
        }
    }
}

impl PipelineObserver for TimingObserver {
    fn stage_completed(&self, stage: &str, duration_ms: f64) {
        self.registry.record_timing(&self.run_id, stage, duration_ms);
    }
}

/// Handle to a spawned run.
#[derive(Debug)]
pub struct RunHandle {
    /// The run.
    pub run_id: String,
    /// Trips the run's cancellation.
    pub cancel: CancellationToken,
    /// The worker task.
    pub join: JoinHandle<()>,
}

impl RunHandle {
    /// Requests cancellation. Returns `false` if already requested.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        self.cancel.cancel(reason)
    }

    /// Whether the worker task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Drives runs through a pipeline.
#[derive(Clone)]
pub struct RunWorker {
    registry: Arc<RunRegistry>,
    bus: Arc<EventBus>,
    pipeline: Arc<Pipeline>,
    artifacts: Arc<dyn ArtifactSink>,
    stage_timeout: Option<Duration>,
}

impl RunWorker {
    /// Creates a worker with no artifact sink and no stage timeout.
    #[must_use]
    pub fn new(registry: Arc<RunRegistry>, bus: Arc<EventBus>, pipeline: Arc<Pipeline>) -> Self {
        Self {
            registry,
            bus,
            pipeline,
            artifacts: Arc::new(NoOpArtifactSink),
            stage_timeout: None,
        }
    }

    /// Sets the artifact sink handed to stages.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactSink>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Sets the per-stage timeout.
    #[must_use]
    pub const fn with_stage_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Spawns the run onto the runtime and returns immediately.
    #[must_use]
    pub fn spawn(&self, state: RunState) -> RunHandle {
        let run_id = state.run_id.clone();
        let cancel = CancellationToken::new();
        let worker = self.clone();
        let token = cancel.clone();
        let join = tokio::spawn(async move { worker.drive(state, token).await });
        RunHandle { run_id, cancel, join }
    }

    /// Runs to a terminal state on the current task.
    pub async fn drive(&self, state: RunState, cancel: CancellationToken) {
        let run_id = state.run_id.clone();
        if !self.registry.mark_started(&run_id) {
            warn!(run_id = %run_id, "run is unknown or not queued, not starting");
            return;
        }
        info!(run_id = %run_id, project_id = %state.project_id, "run started");
        self.publish(&run_id, event_types::RUN_STARTED, json!({
            "run_id": run_id,
            "project_id": state.project_id,
        }))
        .await;

        let ctx = PipelineContext::new(Arc::new(RunEmitter::new(Arc::clone(&self.bus), run_id.clone())))
            .with_artifacts(Arc::clone(&self.artifacts))
            .with_cancel(cancel)
            .with_stage_timeout(self.stage_timeout);
        let observer = TimingObserver::new(Arc::clone(&self.registry), run_id.clone());

        match self.pipeline.execute(state, &ctx, &observer).await {
            Ok(done) => {
                self.registry.mark_completed(&run_id);
                info!(run_id = %run_id, stages = done.bundle().len(), "run complete");
                self.publish(&run_id, event_types::RUN_COMPLETED, json!({
                    "run_id": run_id,
                    "bundle": done.bundle().to_value(),
                }))
                .await;
            }
            Err(err) => {
                self.registry.mark_error(&run_id, err.to_string());
                error!(run_id = %run_id, stage = %err.stage, kind = %err.kind, error = %err.message, "run failed");
                self.publish(&run_id, event_types::ERROR, err.to_event_data(&run_id)).await;
            }
        }
    }

    async fn publish(&self, run_id: &str, event_type: &str, data: serde_json::Value) {
        if let Err(e) = self.bus.publish(run_id, event_type, data).await {
            warn!(run_id = %run_id, event_type, error = %e, "failed to publish run event");
        }
    }
}

impl std::fmt::Debug for RunWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunWorker")
            .field("pipeline", &self.pipeline.name())
            .field("stage_timeout", &self.stage_timeout)
            .finish_non_exhaustive()
    }
}
