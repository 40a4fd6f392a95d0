//! Persist stage: merges the bundle into the project document.
//!
//! The document is written once with status `generating`, once per section,
//! and once more with status `complete`. Writes already committed stay
//! committed when a later one fails.

use super::data::DATA_STAGE;
use super::narrative::NARRATIVE_STAGE;
use super::spec::SPEC_STAGE;
use super::standards::STANDARDS_STAGE;
use super::steps::STEPS_STAGE;
use crate::core::{event_types, Spec, ThoughtKind};
use crate::errors::StageError;
use crate::persistence::ProjectRepository;
use crate::pipeline::{RunState, Stage, StageContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Stage name and bundle key.
pub const PERSIST_STAGE: &str = "persist";

/// Flag that turns the stage off. On by default.
pub const PERSIST_FLAG: &str = "persist_enabled";

/// Schema tag of the project document.
pub const PROJECT_SCHEMA_VERSION: &str = "proj.v1";

const SECTIONS: &[(&str, &str)] = &[
    (NARRATIVE_STAGE, "Narrative"),
    (STEPS_STAGE, "Steps"),
    (DATA_STAGE, "Data"),
];

/// Output of the persist stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistOutput {
    /// Document key.
    pub project_id: String,
    /// Sections written, in order.
    pub sections: Vec<String>,
    /// Number of upserts issued.
    pub writes: usize,
}

/// Writes the generated project through the repository.
pub struct PersistStage {
    repository: Arc<dyn ProjectRepository>,
}

impl PersistStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(repository: Arc<dyn ProjectRepository>) -> Self {
        Self { repository }
    }

    async fn upsert(&self, project_id: &str, document: &Map<String, Value>) -> Result<(), StageError> {
        self.repository
            .upsert(project_id, Value::Object(document.clone()))
            .await
            .map_err(|e| StageError::persistence(PERSIST_STAGE, &e))
    }
}

impl std::fmt::Debug for PersistStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistStage").finish_non_exhaustive()
    }
}

/// Overlays run metadata on whatever document already exists.
fn merge_meta(existing: Option<Value>, state: &RunState, spec: &Spec, plan: Value) -> Map<String, Value> {
    let mut doc = match existing {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    let sections = match doc.remove("sections") {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    let seed = &state.seed;
    doc.insert("schema_version".into(), json!(PROJECT_SCHEMA_VERSION));
    doc.insert("project_id".into(), json!(state.project_id));
    doc.insert("run_id".into(), json!(state.run_id));
    doc.insert("chat_id".into(), json!(state.chat_id));
    doc.insert("status".into(), json!("generating"));
    doc.insert(
        "meta".into(),
        json!({
            "title": seed.title.as_deref().unwrap_or(&seed.topic),
            "topic": seed.topic,
            "subject": spec.subject,
            "grade_band": spec.grade_band,
            "updated_at": crate::utils::iso_timestamp(),
        }),
    );
    doc.insert("plan".into(), plan);
    doc.insert("sections".into(), Value::Object(sections));
    doc.entry("logs")
        .or_insert_with(|| json!({"csv_url": null, "events_replayable": false}));
    doc
}

#[async_trait]
impl Stage for PersistStage {
    fn name(&self) -> &str {
        PERSIST_STAGE
    }

    fn dependencies(&self) -> Vec<&str> {
        vec![SPEC_STAGE, STANDARDS_STAGE, NARRATIVE_STAGE]
    }

    fn optional_dependencies(&self) -> Vec<&str> {
        vec![STEPS_STAGE, DATA_STAGE]
    }

    fn is_enabled(&self, state: &RunState) -> bool {
        state.flags.is_enabled_or(PERSIST_FLAG, true)
    }

    async fn run(&self, mut state: RunState, ctx: &StageContext) -> Result<RunState, StageError> {
        let spec: Spec = ctx.input(&state, SPEC_STAGE)?;
        let standards: Value = ctx.input(&state, STANDARDS_STAGE)?;

        let mut contents: Vec<(&str, &str, Value)> = Vec::new();
        for &(id, name) in SECTIONS {
            let section = if id == NARRATIVE_STAGE {
                Some(ctx.input::<Value>(&state, id)?)
            } else {
                ctx.optional_input::<Value>(&state, id)?
            };
            if let Some(section) = section {
                contents.push((id, name, section));
            }
        }

        let project_id = state.project_id.clone();
        let existing = self
            .repository
            .fetch(&project_id)
            .await
            .map_err(|e| StageError::persistence(PERSIST_STAGE, &e))?;
        ctx.think(
            &mut state,
            ThoughtKind::Processing,
            if existing.is_some() {
                "Merging into the existing project document"
            } else {
                "Creating the project document"
            },
            None,
        )
        .await?;

        let plan = json!({
            "spec": spec,
            "standards": standards["targets"],
            "sections": contents.iter().map(|(id, name, _)| json!({"id": id, "name": name})).collect::<Vec<_>>(),
        });
        let mut doc = merge_meta(existing, &state, &spec, plan);
        self.upsert(&project_id, &doc).await?;
        let mut writes = 1;

        let mut written = Vec::with_capacity(contents.len());
        for (id, name, section) in contents {
            ctx.emit(event_types::SECTION_STARTED, json!({"section_id": id, "name": name}))
                .await?;
            if let Some(Value::Object(sections)) = doc.get_mut("sections") {
                sections.insert(id.to_string(), section);
            }
            self.upsert(&project_id, &doc).await?;
            writes += 1;
            debug!(run_id = %state.run_id, section = id, "section persisted");
            ctx.emit(event_types::SECTION_COMPLETED, json!({"section_id": id})).await?;
            written.push(id.to_string());
        }

        doc.insert("status".into(), json!("complete"));
        self.upsert(&project_id, &doc).await?;
        writes += 1;

        let output = PersistOutput {
            project_id,
            sections: written,
            writes,
        };
        ctx.store_output(&mut state, &output)?;
        Ok(state)
    }
}
