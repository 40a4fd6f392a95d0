//! Standards mapping stage.
//!
//! Asks the generation provider for a few standards matching the spec,
//! keeps only those whose grade sits in the requested band, has a second
//! call judge which grades the survivors belong to, and retries once with a
//! narrowing hint when that judgment disagrees with the band.

mod grade;
mod mapper;

pub use grade::{code_grade, parse_span, GradeBand};
pub use mapper::{
    AttemptRecord, MappingFailure, MappingOutcome, Rejection, StandardsInput, StandardsMapper, MAX_ATTEMPTS,
};

use super::spec::SPEC_STAGE;
use crate::artifacts::LogRow;
use crate::core::{Spec, StandardTarget, ThoughtKind};
use crate::errors::{GenerationError, StageError, StageErrorKind};
use crate::generation::GenerationProvider;
use crate::pipeline::{RunState, Stage, StageContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Stage name and bundle key.
pub const STANDARDS_STAGE: &str = "standards";

/// Output of the standards stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardsOutput {
    /// Accepted targets, at most the configured maximum.
    pub targets: Vec<StandardTarget>,
    /// The band they were checked against.
    pub grade_band: String,
    /// Span inferred by the accepting judgment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inferred_span: Option<String>,
    /// Topic cluster named by the accepting judgment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_cluster: Option<String>,
    /// Attempts it took.
    pub attempts: usize,
}

/// Maps the spec to curriculum standards.
pub struct StandardsStage {
    provider: Arc<dyn GenerationProvider>,
    max_standards: usize,
    temperature: Option<f64>,
}

impl StandardsStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(provider: Arc<dyn GenerationProvider>, max_standards: usize) -> Self {
        Self {
            provider,
            max_standards,
            temperature: None,
        }
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.temperature = temperature;
        self
    }

    async fn record_attempts(
        &self,
        state: &mut RunState,
        ctx: &StageContext,
        attempts: &[AttemptRecord],
    ) -> Result<(), StageError> {
        for attempt in attempts {
            let name = format!("standards_attempt_{}", attempt.attempt);
            let value = serde_json::to_value(attempt)
                .map_err(|e| StageError::internal(STANDARDS_STAGE, e.to_string()))?;
            let stored = ctx
                .artifacts()
                .write_artifact(ctx.run_id(), &name, &value)
                .await
                .map_err(|e| StageError::artifact(STANDARDS_STAGE, &e))?;

            let summary = match &attempt.rejection {
                None => format!("accepted {} standards", attempt.kept.len()),
                Some(_) => format!("rejected attempt {}", attempt.attempt),
            };
            let mut row = LogRow::new(ctx.run_id(), STANDARDS_STAGE, summary)
                .with_model(self.provider.model(), self.temperature)
                .with_paths(None, Some(stored.location));
            if let Some(usage) = attempt.usage {
                row.prompt_tokens = Some(usage.prompt_tokens);
                row.completion_tokens = Some(usage.completion_tokens);
            }
            if let Some(rejection) = &attempt.rejection {
                row = row.with_warning(rejection.to_string());
            }
            ctx.artifacts()
                .append_row(row)
                .await
                .map_err(|e| StageError::artifact(STANDARDS_STAGE, &e))?;

            let (kind, message) = match &attempt.rejection {
                None => (
                    ThoughtKind::Validating,
                    format!("Attempt {} fits the grade band", attempt.attempt),
                ),
                Some(rejection) => (
                    ThoughtKind::Warning,
                    format!("Attempt {} rejected: {rejection}", attempt.attempt),
                ),
            };
            let data = json!({
                "attempt": attempt.attempt,
                "candidates": attempt.candidates.iter().map(|t| &t.code).collect::<Vec<_>>(),
                "kept": attempt.kept.iter().map(|t| &t.code).collect::<Vec<_>>(),
                "inferred_span": attempt.inferred_span,
            });
            ctx.think(state, kind, message, Some(data)).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for StandardsStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardsStage")
            .field("model", &self.provider.model())
            .field("max_standards", &self.max_standards)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for StandardsStage {
    fn name(&self) -> &str {
        STANDARDS_STAGE
    }

    fn dependencies(&self) -> Vec<&str> {
        vec![SPEC_STAGE]
    }

    fn summarize(&self, output: &serde_json::Value) -> serde_json::Value {
        json!({
            "targets": output["targets"].as_array().map_or(0, Vec::len),
            "attempts": output["attempts"],
        })
    }

    async fn run(&self, mut state: RunState, ctx: &StageContext) -> Result<RunState, StageError> {
        let spec: Spec = ctx.input(&state, SPEC_STAGE)?;
        let topic = state.seed.topic.trim().to_string();
        if topic.is_empty() {
            return Err(StageError::validation(STANDARDS_STAGE, "seed topic must not be empty"));
        }
        let input = StandardsInput {
            subject: spec.subject,
            grade_band: spec.grade_band,
            topic,
        };

        ctx.think(
            &mut state,
            ThoughtKind::Planning,
            format!("Mapping '{}' to standards for grades {}", input.topic, GradeBand::parse(&input.grade_band)),
            Some(json!({"subject": input.subject, "max_standards": self.max_standards})),
        )
        .await?;

        let mapper = StandardsMapper::new(self.provider.as_ref(), self.max_standards)
            .with_temperature(self.temperature);
        let outcome = match mapper.map(&input).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                self.record_attempts(&mut state, ctx, failure.attempts()).await?;
                return Err(match failure {
                    MappingFailure::Empty { .. } => {
                        StageError::generation(STANDARDS_STAGE, &GenerationError::EmptyResponse)
                    }
                    MappingFailure::Exhausted { .. } => {
                        StageError::validation(STANDARDS_STAGE, failure.to_string())
                    }
                    MappingFailure::Unavailable { .. } => StageError::new(
                        STANDARDS_STAGE,
                        StageErrorKind::Generation,
                        failure.to_string(),
                    ),
                });
            }
        };
        self.record_attempts(&mut state, ctx, &outcome.attempts).await?;

        let accepted = outcome.attempts.last();
        let output = StandardsOutput {
            targets: outcome.targets,
            grade_band: input.grade_band,
            inferred_span: accepted.and_then(|a| a.inferred_span.clone()),
            topic_cluster: accepted.and_then(|a| a.topic_cluster.clone()),
            attempts: outcome.attempts.len(),
        };
        info!(
            run_id = %ctx.run_id(),
            targets = output.targets.len(),
            attempts = output.attempts,
            "standards mapped"
        );
        ctx.think(
            &mut state,
            ThoughtKind::Success,
            format!("Selected {} standards", output.targets.len()),
            None,
        )
        .await?;

        let value = ctx.store_output(&mut state, &output)?;
        ctx.publish_artifact(STANDARDS_STAGE, value).await?;
        Ok(state)
    }
}
