//! Data stage: shared knobs and tables for the project.

use super::narrative::NARRATIVE_STAGE;
use super::spec::SPEC_STAGE;
use super::standards::{StandardsOutput, STANDARDS_STAGE};
use crate::core::{Spec, ThoughtKind};
use crate::errors::StageError;
use crate::pipeline::{RunState, Stage, StageContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Stage name and bundle key.
pub const DATA_STAGE: &str = "data";

/// Flag that turns the stage on. Off by default.
pub const DATA_FLAG: &str = "data_enabled";

/// A tunable parameter the teacher can adjust.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Knob {
    /// Identifier.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Starting value.
    pub value: Value,
}

/// A small table shared by every seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Identifier.
    pub id: String,
    /// Column headers.
    pub columns: Vec<String>,
    /// Rows, each as long as `columns`.
    pub rows: Vec<Vec<String>>,
}

/// Output of the data stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataOutput {
    /// Knobs.
    pub knobs: Vec<Knob>,
    /// Tables.
    pub tables: Vec<Table>,
}

/// Derives knobs from the spec and a standards table.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataStage;

impl DataStage {
    /// Creates the stage.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for DataStage {
    fn name(&self) -> &str {
        DATA_STAGE
    }

    fn dependencies(&self) -> Vec<&str> {
        vec![SPEC_STAGE, STANDARDS_STAGE]
    }

    fn optional_dependencies(&self) -> Vec<&str> {
        vec![NARRATIVE_STAGE]
    }

    fn is_enabled(&self, state: &RunState) -> bool {
        state.flags.is_enabled(DATA_FLAG)
    }

    async fn run(&self, mut state: RunState, ctx: &StageContext) -> Result<RunState, StageError> {
        let spec: Spec = ctx.input(&state, SPEC_STAGE)?;
        let standards: StandardsOutput = ctx.input(&state, STANDARDS_STAGE)?;
        let narrative: Option<Value> = ctx.optional_input(&state, NARRATIVE_STAGE)?;

        let mut knobs = vec![
            Knob {
                id: "time_minutes".into(),
                label: "Session length (minutes)".into(),
                value: json!(spec.time_minutes),
            },
            Knob {
                id: "difficulty".into(),
                label: "Difficulty".into(),
                value: spec.guards.get("complexity_level").cloned().unwrap_or(Value::Null),
            },
        ];
        if let Some(seats) = narrative
            .as_ref()
            .and_then(|n| n["roles"].as_array())
            .map(|roles| roles.iter().filter(|r| r["id"].as_str().is_some_and(|id| id.starts_with("seat_"))).count())
        {
            knobs.push(Knob {
                id: "seats".into(),
                label: "Student seats".into(),
                value: json!(seats),
            });
        }

        let table = Table {
            id: "standards".into(),
            columns: vec!["code".into(), "description".into(), "evidence".into()],
            rows: standards
                .targets
                .iter()
                .map(|t| vec![t.code.clone(), t.description.clone(), t.evidence_note.clone()])
                .collect(),
        };
        let output = DataOutput {
            knobs,
            tables: vec![table],
        };

        ctx.think(
            &mut state,
            ThoughtKind::Processing,
            format!("Prepared {} knobs and {} tables", output.knobs.len(), output.tables.len()),
            None,
        )
        .await?;

        let value = ctx.store_output(&mut state, &output)?;
        ctx.publish_artifact(DATA_STAGE, value).await?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RunFlags, Seed, StandardTarget, SCHEMA_VERSION};
    use crate::events::CollectingEventSink;
    use crate::pipeline::{Bundle, PipelineContext};
    use std::sync::Arc;

    #[test]
    fn test_disabled_without_flag() {
        let state = RunState::new("r1", "p1", "c1", Seed::default());
        assert!(!DataStage::new().is_enabled(&state));
        let state = state.with_flags(RunFlags::default().with(DATA_FLAG, true));
        assert!(DataStage::new().is_enabled(&state));
    }

    #[tokio::test]
    async fn test_builds_knobs_and_standards_table() {
        let spec = Spec {
            subject: "math".into(),
            grade_band: "6-8".into(),
            skills: vec![],
            time_minutes: 60,
            guards: serde_json::Map::new(),
            schema_version: SCHEMA_VERSION.into(),
        };
        let standards = StandardsOutput {
            targets: vec![StandardTarget::new("7.G.3", "Area", "Draws a model")],
            grade_band: "6-8".into(),
            inferred_span: None,
            topic_cluster: None,
            attempts: 1,
        };
        let bundle = Bundle::new()
            .with_entry(SPEC_STAGE, serde_json::to_value(spec).unwrap())
            .with_entry(STANDARDS_STAGE, serde_json::to_value(standards).unwrap());
        let pipeline = PipelineContext::new(Arc::new(CollectingEventSink::new()));
        let ctx = StageContext::new(
            "r1",
            DATA_STAGE,
            vec![SPEC_STAGE.into(), STANDARDS_STAGE.into()],
            vec![NARRATIVE_STAGE.into()],
            &pipeline,
        );
        let state = DataStage::new()
            .run(RunState::new("r1", "p1", "c1", Seed::default()).with_bundle(bundle), &ctx)
            .await
            .unwrap();

        let output: DataOutput = serde_json::from_value(state.bundle().get(DATA_STAGE).cloned().unwrap()).unwrap();
        assert_eq!(output.knobs.len(), 2);
        assert_eq!(output.tables[0].rows, vec![vec!["7.G.3", "Area", "Draws a model"]]);
    }
}
