//! Run service.

use super::{StartRequest, StartResponse, StartStatus};
use crate::artifacts::{ArtifactSink, FileArtifactSink, NoOpArtifactSink};
use crate::config::RunflowConfig;
use crate::core::{RunEvent, RunRecord};
use crate::errors::{ClientError, PersistenceError, RunflowError};
use crate::events::EventBus;
use crate::generation::GenerationProvider;
use crate::persistence::ProjectRepository;
use crate::pipeline::{Pipeline, RunState};
use crate::registry::{IdempotencyIndex, RunRegistry};
use crate::stages::project_pipeline;
use crate::worker::{RunHandle, RunWorker};
use dashmap::DashMap;
use futures::Stream;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owns the stores of one process and the workers running in it.
///
/// `start` never waits for a run: it admits the request, spawns a worker
/// when the key is new, and returns.
pub struct RunService {
    index: IdempotencyIndex,
    registry: Arc<RunRegistry>,
    bus: Arc<EventBus>,
    repository: Arc<dyn ProjectRepository>,
    worker: RunWorker,
    handles: DashMap<String, RunHandle>,
    config: RunflowConfig,
}

impl RunService {
    /// Creates a service running the project pipeline.
    pub fn new(
        config: RunflowConfig,
        provider: Arc<dyn GenerationProvider>,
        repository: Arc<dyn ProjectRepository>,
    ) -> Result<Self, RunflowError> {
        let pipeline = project_pipeline(provider, Arc::clone(&repository), &config)?;
        Self::with_pipeline(config, pipeline, repository)
    }

    /// Creates a service running an arbitrary pipeline.
    pub fn with_pipeline(
        config: RunflowConfig,
        pipeline: Pipeline,
        repository: Arc<dyn ProjectRepository>,
    ) -> Result<Self, RunflowError> {
        config.validate()?;
        let registry = Arc::new(RunRegistry::new());
        let bus = Arc::new(EventBus::new(config.events.channel_capacity));
        let artifacts: Arc<dyn ArtifactSink> = match &config.artifacts.dir {
            Some(dir) => Arc::new(FileArtifactSink::new(dir.clone())),
            None => Arc::new(NoOpArtifactSink),
        };
        let worker = RunWorker::new(Arc::clone(&registry), Arc::clone(&bus), Arc::new(pipeline))
            .with_artifacts(artifacts)
            .with_stage_timeout(config.pipeline.stage_timeout());

        Ok(Self {
            index: IdempotencyIndex::new(),
            registry,
            bus,
            repository,
            worker,
            handles: DashMap::new(),
            config,
        })
    }

    /// Replaces the artifact sink.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactSink>) -> Self {
        self.worker = self.worker.with_artifacts(artifacts);
        self
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &RunflowConfig {
        &self.config
    }

    /// Admits a start request.
    ///
    /// A key seen before returns its run id with [`StartStatus::AlreadyExists`]
    /// and touches nothing else. Must be called from within a tokio runtime.
    pub fn start(&self, request: StartRequest) -> Result<StartResponse, ClientError> {
        let key = request.key()?;
        let suggested = request.suggested_run_id()?;
        let controls = request.effective_controls();
        let StartRequest { seed, flags, bundle, .. } = request;

        let admission = self
            .index
            .resolve_or_create(key.clone(), suggested.as_deref(), &self.registry, |run_id| {
                RunRecord::queued(run_id, &key, seed.clone(), flags.clone(), controls.clone())
            });

        if !admission.created {
            debug!(run_id = %admission.run_id, project_id = %key.project_id, "duplicate start");
            return Ok(StartResponse {
                run_id: admission.run_id,
                status: StartStatus::AlreadyExists,
            });
        }

        let run_id = admission.run_id;
        self.bus.create_stream(&run_id);
        self.handles.retain(|_, handle| !handle.is_finished());

        let state = RunState::new(&run_id, &key.project_id, &key.chat_id, seed)
            .with_flags(flags)
            .with_controls(controls)
            .with_bundle(bundle.unwrap_or_default());
        let handle = self.worker.spawn(state);
        self.handles.insert(run_id.clone(), handle);
        info!(run_id = %run_id, project_id = %key.project_id, chat_id = %key.chat_id, "run accepted");

        Ok(StartResponse {
            run_id,
            status: StartStatus::Accepted,
        })
    }

    /// Snapshot of a run's record.
    #[must_use]
    pub fn status(&self, run_id: &str) -> Option<RunRecord> {
        self.registry.get(run_id)
    }

    /// The persisted project document.
    pub async fn project_document(&self, project_id: &str) -> Result<Option<serde_json::Value>, PersistenceError> {
        self.repository.fetch(project_id).await
    }

    /// Streams a known run's events until its terminal event.
    pub fn subscribe(&self, run_id: &str) -> Result<impl Stream<Item = RunEvent> + Send + 'static, RunflowError> {
        if !self.registry.contains(run_id) {
            return Err(RunflowError::NotFound(format!("run '{run_id}'")));
        }
        Ok(self.bus.subscribe(run_id))
    }

    /// Requests cancellation of a live run. Returns `false` when the run is
    /// unknown, finished or already cancelled.
    pub fn cancel(&self, run_id: &str, reason: impl Into<String>) -> bool {
        self.handles
            .get(run_id)
            .is_some_and(|handle| !handle.is_finished() && handle.cancel(reason))
    }

    /// Waits for a run's worker to exit and returns the final record.
    pub async fn wait_for(&self, run_id: &str) -> Option<RunRecord> {
        if let Some((_, handle)) = self.handles.remove(run_id) {
            if let Err(e) = handle.join.await {
                warn!(run_id = %run_id, error = %e, "run worker did not exit cleanly");
            }
        }
        self.registry.get(run_id)
    }

    /// Number of runs admitted so far.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.registry.len()
    }
}

impl std::fmt::Debug for RunService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunService")
            .field("runs", &self.registry.len())
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}
