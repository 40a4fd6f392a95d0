//! Steps stage: the global step sequence each seat works through.

use super::narrative::{NarrativeOutput, NARRATIVE_STAGE};
use super::spec::SPEC_STAGE;
use crate::core::{Spec, ThoughtKind};
use crate::errors::StageError;
use crate::pipeline::{RunState, Stage, StageContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Stage name and bundle key.
pub const STEPS_STAGE: &str = "steps";

/// Flag that turns the stage on. Off by default.
pub const STEPS_FLAG: &str = "steps_enabled";

/// One step of the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based position.
    pub index: usize,
    /// Short title.
    pub title: String,
    /// Minutes allotted.
    pub minutes: u32,
    /// What each seat does, keyed by role id.
    pub tasks: Vec<SeatTask>,
}

/// One seat's task within a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatTask {
    /// Role id.
    pub role: String,
    /// What to do.
    pub task: String,
}

/// Output of the steps stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepsOutput {
    /// Steps in order.
    pub steps: Vec<Step>,
}

/// Splits the time budget into launch, one step per skill, and share-out.
#[derive(Debug, Default, Clone, Copy)]
pub struct StepsStage;

impl StepsStage {
    /// Creates the stage.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn plan_steps(spec: &Spec, narrative: &NarrativeOutput) -> Vec<Step> {
    let seats: Vec<&str> = narrative
        .roles
        .iter()
        .filter(|r| r.is_seat())
        .map(|r| r.id.as_str())
        .collect();

    let mut titles = vec!["Launch the scenario".to_string()];
    titles.extend(spec.skills.iter().map(|s| format!("Work on {}", s.replace('_', " "))));
    titles.push("Share and reflect".to_string());

    // Whole minutes, with the remainder going to the first steps.
    let count = u32::try_from(titles.len()).unwrap_or(u32::MAX);
    let base = spec.time_minutes / count;
    let extra = spec.time_minutes % count;

    titles
        .into_iter()
        .enumerate()
        .map(|(i, title)| {
            let index = i + 1;
            let minutes = base + u32::from(u32::try_from(i).map_or(false, |i| i < extra));
            let tasks = seats
                .iter()
                .map(|seat| SeatTask {
                    role: (*seat).to_string(),
                    task: format!("{title} ({seat})"),
                })
                .collect();
            Step {
                index,
                title,
                minutes,
                tasks,
            }
        })
        .collect()
}

#[async_trait]
impl Stage for StepsStage {
    fn name(&self) -> &str {
        STEPS_STAGE
    }

    fn dependencies(&self) -> Vec<&str> {
        vec![SPEC_STAGE, NARRATIVE_STAGE]
    }

    fn is_enabled(&self, state: &RunState) -> bool {
        state.flags.is_enabled(STEPS_FLAG)
    }

    async fn run(&self, mut state: RunState, ctx: &StageContext) -> Result<RunState, StageError> {
        let spec: Spec = ctx.input(&state, SPEC_STAGE)?;
        let narrative: NarrativeOutput = ctx.input(&state, NARRATIVE_STAGE)?;
        if !narrative.roles.iter().any(|r| r.is_seat()) {
            return Err(StageError::validation(STEPS_STAGE, "narrative has no student seats"));
        }

        let output = StepsOutput {
            steps: plan_steps(&spec, &narrative),
        };
        ctx.think(
            &mut state,
            ThoughtKind::Processing,
            format!("Planned {} steps over {} minutes", output.steps.len(), spec.time_minutes),
            None,
        )
        .await?;

        let value = ctx.store_output(&mut state, &output)?;
        ctx.publish_artifact(STEPS_STAGE, value).await?;
        Ok(state)
    }
}
