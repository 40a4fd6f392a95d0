//! The value threaded through a pipeline run.

use crate::core::{RunControls, RunFlags, Seed, ThoughtLog};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stage outputs keyed by stage name.
///
/// Only the pipeline writes entries, and only under the running stage's
/// own name. Callers may pre-populate a bundle for replay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bundle(BTreeMap<String, serde_json::Value>);

impl Bundle {
    /// Creates an empty bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pre-computed stage output, for replay with `start_from`.
    #[must_use]
    pub fn with_entry(mut self, stage: impl Into<String>, output: serde_json::Value) -> Self {
        self.0.insert(stage.into(), output);
        self
    }

    /// Output of a stage.
    #[must_use]
    pub fn get(&self, stage: &str) -> Option<&serde_json::Value> {
        self.0.get(stage)
    }

    /// Whether a stage has an output.
    #[must_use]
    pub fn contains(&self, stage: &str) -> bool {
        self.0.contains_key(stage)
    }

    /// Stage names with outputs.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of outputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the bundle is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn insert(&mut self, stage: &str, output: serde_json::Value) {
        self.0.insert(stage.to_string(), output);
    }

    /// The bundle as a JSON object.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.0.clone().into_iter().collect())
    }
}

/// Per-run state passed from stage to stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Run identifier.
    pub run_id: String,
    /// Project identifier.
    pub project_id: String,
    /// Chat identifier.
    pub chat_id: String,
    /// Caller input.
    pub seed: Seed,
    /// Stage outputs.
    bundle: Bundle,
    /// Append-only reasoning log.
    pub thoughts: ThoughtLog,
    /// Optional stage toggles.
    pub flags: RunFlags,
    /// Stage bounds.
    pub controls: RunControls,
    /// Stage currently executing.
    pub current_phase: Option<String>,
}

impl RunState {
    /// Creates an empty state.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        project_id: impl Into<String>,
        chat_id: impl Into<String>,
        seed: Seed,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            project_id: project_id.into(),
            chat_id: chat_id.into(),
            seed,
            bundle: Bundle::new(),
            thoughts: ThoughtLog::new(),
            flags: RunFlags::new(),
            controls: RunControls::default(),
            current_phase: None,
        }
    }

    /// Sets the flags.
    #[must_use]
    pub fn with_flags(mut self, flags: RunFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the controls.
    #[must_use]
    pub fn with_controls(mut self, controls: RunControls) -> Self {
        self.controls = controls;
        self
    }

    /// Sets a pre-populated bundle.
    #[must_use]
    pub fn with_bundle(mut self, bundle: Bundle) -> Self {
        self.bundle = bundle;
        self
    }

    /// Read-only view of the stage outputs.
    #[must_use]
    pub const fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    pub(crate) fn bundle_mut(&mut self) -> &mut Bundle {
        &mut self.bundle
    }
}
