//! Sequential pipeline execution.

use super::{PipelineContext, RunState, Stage, StageContext};
use crate::core::{event_types, RunControls};
use crate::errors::StageError;
use futures::FutureExt;
use serde_json::json;
use std::ops::Range;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Name used for errors that belong to the pipeline rather than a stage.
pub const PIPELINE_STAGE: &str = "pipeline";

/// Receives per-stage timings as they happen.
pub trait PipelineObserver: Send + Sync {
    /// A stage finished successfully.
    fn stage_completed(&self, _stage: &str, _duration_ms: f64) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl PipelineObserver for NoOpObserver {}

/// A fixed, ordered list of stages.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub(super) fn new(name: String, stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { name, stages }
    }

    /// The pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name() == name)
    }

    /// Resolves `start_from` / `stop_after` into an index range.
    pub fn resolve_bounds(&self, controls: &RunControls) -> Result<Range<usize>, StageError> {
        let start = match controls.start_from.as_deref() {
            Some(name) => self.position(name).ok_or_else(|| {
                StageError::validation(PIPELINE_STAGE, format!("unknown start_from stage '{name}'"))
            })?,
            None => 0,
        };
        let end = match controls.stop_after.as_deref() {
            Some(name) => {
                self.position(name).ok_or_else(|| {
                    StageError::validation(PIPELINE_STAGE, format!("unknown stop_after stage '{name}'"))
                })? + 1
            }
            None => self.stages.len(),
        };
        if end <= start {
            return Err(StageError::validation(
                PIPELINE_STAGE,
                format!(
                    "stop_after '{}' comes before start_from '{}'",
                    controls.stop_after.as_deref().unwrap_or_default(),
                    controls.start_from.as_deref().unwrap_or_default()
                ),
            ));
        }
        Ok(start..end)
    }

    /// Fails fast when a stage in range requires the output of a stage
    /// outside the range and the bundle does not already hold it.
    fn check_replay_inputs(&self, range: &Range<usize>, state: &RunState) -> Result<(), StageError> {
        let skipped: Vec<&str> = self.stages[..range.start].iter().map(|s| s.name()).collect();
        for stage in &self.stages[range.clone()] {
            for dep in stage.dependencies() {
                if skipped.contains(&dep) && !state.bundle().contains(dep) {
                    return Err(StageError::missing_dependency(stage.name(), dep));
                }
            }
        }
        Ok(())
    }

    /// Runs the stages within the state's controls.
    ///
    /// The first stage failure aborts the run. Cancellation and the
    /// optional timeout in `ctx` apply to each stage individually.
    pub async fn execute(
        &self,
        mut state: RunState,
        ctx: &PipelineContext,
        observer: &dyn PipelineObserver,
    ) -> Result<RunState, StageError> {
        let range = self.resolve_bounds(&state.controls)?;
        self.check_replay_inputs(&range, &state)?;
        let total = self.stages.len();

        for index in range {
            let stage = &self.stages[index];
            let name = stage.name().to_string();

            if ctx.cancel.is_cancelled() {
                let reason = ctx.cancel.reason().unwrap_or_else(|| "cancelled".to_string());
                return Err(StageError::cancelled(&name, reason));
            }

            if !stage.is_enabled(&state) {
                debug!(run_id = %state.run_id, stage = %name, "stage disabled, skipping");
                emit(ctx, &name, event_types::STAGE_SKIPPED, json!({
                    "stage": name,
                    "reason": "disabled",
                }))
                .await?;
                continue;
            }

            state.current_phase = Some(name.clone());
            emit(ctx, &name, event_types::PHASE_TRANSITION, json!({
                "stage": name,
                "index": index,
                "total": total,
            }))
            .await?;
            info!(run_id = %state.run_id, stage = %name, "stage started");

            let stage_ctx = StageContext::new(
                state.run_id.clone(),
                &name,
                stage.dependencies().into_iter().map(str::to_string).collect(),
                stage.optional_dependencies().into_iter().map(str::to_string).collect(),
                ctx,
            );
            let started = Instant::now();
            state = run_guarded(stage.as_ref(), state, &stage_ctx, ctx).await?;
            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

            let Some(output) = state.bundle().get(&name) else {
                return Err(StageError::validation(&name, "stage finished without storing an output"));
            };
            let summary = stage.summarize(output);

            emit(ctx, &name, event_types::STAGE_COMPLETED, json!({
                "stage": name,
                "summary": summary,
                "duration_ms": duration_ms,
            }))
            .await?;
            observer.stage_completed(&name, duration_ms);
            info!(run_id = %state.run_id, stage = %name, duration_ms, "stage completed");
        }

        state.current_phase = None;
        Ok(state)
    }
}

async fn emit(
    ctx: &PipelineContext,
    stage: &str,
    event_type: &str,
    data: serde_json::Value,
) -> Result<(), StageError> {
    ctx.events
        .emit(event_type, data)
        .await
        .map_err(|e| StageError::internal(stage, e.to_string()))
}

/// Runs one stage racing cancellation and the timeout, turning a panic
/// into an internal stage error.
async fn run_guarded(
    stage: &dyn Stage,
    state: RunState,
    stage_ctx: &StageContext,
    ctx: &PipelineContext,
) -> Result<RunState, StageError> {
    let name = stage.name();
    let work = AssertUnwindSafe(stage.run(state, stage_ctx)).catch_unwind();
    let bounded = async {
        match ctx.stage_timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| limit),
            None => Ok(work.await),
        }
    };

    tokio::select! {
        outcome = bounded => match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                warn!(stage = %name, panic = %message, "stage panicked");
                Err(StageError::internal(name, format!("stage panicked: {message}")))
            }
            Err(limit) => Err(StageError::timeout(name, limit)),
        },
        reason = ctx.cancel.cancelled() => Err(StageError::cancelled(name, reason)),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
