//! Narrative stage: the project world, the teacher objective and the roles.

use super::spec::SPEC_STAGE;
use super::standards::{StandardsOutput, STANDARDS_STAGE};
use crate::core::{Spec, ThoughtKind};
use crate::errors::StageError;
use crate::pipeline::{RunState, Stage, StageContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Stage name and bundle key.
pub const NARRATIVE_STAGE: &str = "narrative";

const MIN_SEATS: u32 = 2;
const MAX_SEATS: u32 = 4;

/// The setting students work in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct World {
    /// Project title.
    pub title: String,
    /// Scenario summary.
    pub setting: String,
    /// Planned length.
    pub duration_min: u32,
}

/// One participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// `teacher` or `seat_<n>`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// What this participant is after.
    pub objective: String,
}

impl Role {
    /// Whether this is a student seat.
    #[must_use]
    pub fn is_seat(&self) -> bool {
        self.id.starts_with("seat_")
    }
}

/// Output of the narrative stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeOutput {
    /// The world.
    pub world: World,
    /// Objective shown to the teacher.
    pub teacher_objective: String,
    /// Teacher first, then seats in order.
    pub roles: Vec<Role>,
    /// Codes of the standards the project targets.
    pub standards: Vec<String>,
}

/// Builds the narrative from the seed, spec and standards.
#[derive(Debug, Default, Clone, Copy)]
pub struct NarrativeStage;

impl NarrativeStage {
    /// Creates the stage.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for NarrativeStage {
    fn name(&self) -> &str {
        NARRATIVE_STAGE
    }

    fn dependencies(&self) -> Vec<&str> {
        vec![SPEC_STAGE, STANDARDS_STAGE]
    }

    async fn run(&self, mut state: RunState, ctx: &StageContext) -> Result<RunState, StageError> {
        let spec: Spec = ctx.input(&state, SPEC_STAGE)?;
        let standards: StandardsOutput = ctx.input(&state, STANDARDS_STAGE)?;
        if standards.targets.is_empty() {
            return Err(StageError::validation(NARRATIVE_STAGE, "no standards to build a narrative on"));
        }

        ctx.think(&mut state, ThoughtKind::Planning, "Drafting scenario and roles", None)
            .await?;

        let seed = &state.seed;
        let topic = seed.topic.trim();
        let title = seed
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(topic)
            .to_string();
        let seats = seed.group_size.unwrap_or(MIN_SEATS).clamp(MIN_SEATS, MAX_SEATS);
        let focus = seed.life_skill.as_deref().unwrap_or("teamwork");

        let lead = &standards.targets[0];
        let mut roles = vec![Role {
            id: "teacher".into(),
            name: "Teacher".into(),
            objective: format!("Guide students toward {}", lead.code),
        }];
        roles.extend((1..=seats).map(|n| Role {
            id: format!("seat_{n}"),
            name: format!("Student {n}"),
            objective: format!("Contribute {} analysis while practicing {focus}", spec.subject),
        }));

        let output = NarrativeOutput {
            world: World {
                setting: format!(
                    "A {}-minute {} challenge about {topic} for grades {}",
                    spec.time_minutes, spec.subject, spec.grade_band
                ),
                title,
                duration_min: seed.duration_min.unwrap_or(spec.time_minutes),
            },
            teacher_objective: format!("Students demonstrate {}: {}", lead.code, lead.description),
            roles,
            standards: standards.targets.iter().map(|t| t.code.clone()).collect(),
        };

        ctx.think(
            &mut state,
            ThoughtKind::Success,
            format!("Narrative ready with {seats} student seats"),
            Some(json!({"title": output.world.title})),
        )
        .await?;

        let value = ctx.store_output(&mut state, &output)?;
        ctx.publish_artifact(NARRATIVE_STAGE, value).await?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Seed, StandardTarget, SCHEMA_VERSION};
    use crate::errors::StageErrorKind;
    use crate::events::CollectingEventSink;
    use crate::pipeline::{Bundle, PipelineContext};
    use std::sync::Arc;

    fn bundle(targets: Vec<StandardTarget>) -> Bundle {
        let spec = Spec {
            subject: "math".into(),
            grade_band: "6-8".into(),
            skills: vec![],
            time_minutes: 60,
            guards: serde_json::Map::new(),
            schema_version: SCHEMA_VERSION.into(),
        };
        let standards = StandardsOutput {
            targets,
            grade_band: "6-8".into(),
            inferred_span: None,
            topic_cluster: None,
            attempts: 1,
        };
        Bundle::new()
            .with_entry(SPEC_STAGE, serde_json::to_value(spec).unwrap())
            .with_entry(STANDARDS_STAGE, serde_json::to_value(standards).unwrap())
    }

    async fn run(seed: Seed, bundle: Bundle, sink: Arc<CollectingEventSink>) -> Result<RunState, StageError> {
        let pipeline = PipelineContext::new(sink);
        let ctx = StageContext::new(
            "r1",
            NARRATIVE_STAGE,
            vec![SPEC_STAGE.into(), STANDARDS_STAGE.into()],
            vec![],
            &pipeline,
        );
        NarrativeStage::new()
            .run(RunState::new("r1", "p1", "c1", seed).with_bundle(bundle), &ctx)
            .await
    }

    #[tokio::test]
    async fn test_roles_follow_group_size() {
        let sink = Arc::new(CollectingEventSink::new());
        let seed = Seed::new("fractions", "6-8").with_group_size(9).with_title("Bake Sale");
        let state = run(seed, bundle(vec![StandardTarget::new("7.G.3", "d", "e")]), sink.clone())
            .await
            .unwrap();
        let output: NarrativeOutput =
            serde_json::from_value(state.bundle().get(NARRATIVE_STAGE).cloned().unwrap()).unwrap();

        assert_eq!(output.world.title, "Bake Sale");
        assert_eq!(output.roles.len(), 5);
        assert_eq!(output.roles[0].id, "teacher");
        assert_eq!(output.roles.iter().filter(|r| r.is_seat()).count(), 4);
        assert_eq!(output.standards, vec!["7.G.3"]);
        assert!(sink.event_types().contains(&"artifact_narrative".to_string()));
    }

    #[tokio::test]
    async fn test_default_two_seats_and_topic_title() {
        let sink = Arc::new(CollectingEventSink::new());
        let state = run(
            Seed::new("fractions", "6-8"),
            bundle(vec![StandardTarget::new("7.G.3", "d", "e")]),
            sink,
        )
        .await
        .unwrap();
        let output: NarrativeOutput =
            serde_json::from_value(state.bundle().get(NARRATIVE_STAGE).cloned().unwrap()).unwrap();
        assert_eq!(output.world.title, "fractions");
        assert_eq!(output.roles.len(), 3);
        assert_eq!(output.world.duration_min, 60);
    }

    #[tokio::test]
    async fn test_empty_standards_is_validation_error() {
        let err = run(Seed::new("fractions", "6-8"), bundle(vec![]), Arc::new(CollectingEventSink::new()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, StageErrorKind::Validation);
    }
}
