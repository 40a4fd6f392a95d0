//! Stage trait.
//!
//! Stages are the units of work of a runflow pipeline.

use super::{RunState, StageContext};
use crate::errors::StageError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stages.
///
/// A stage reads the bundle entries it declares, writes exactly one entry
/// under its own name via [`StageContext::store_output`], and returns the
/// updated state or fails.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage. Also the bundle key it owns.
    fn name(&self) -> &str;

    /// Bundle keys this stage requires.
    fn dependencies(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Bundle keys this stage reads when present.
    fn optional_dependencies(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Whether the stage runs for this state. Disabled stages are skipped.
    fn is_enabled(&self, _state: &RunState) -> bool {
        true
    }

    /// Summarizes the stage output for the `stage_completed` event.
    fn summarize(&self, output: &serde_json::Value) -> serde_json::Value {
        shape_of(output)
    }

    /// Executes the stage.
    async fn run(&self, state: RunState, ctx: &StageContext) -> Result<RunState, StageError>;
}

/// Describes the structure of a value without its content.
#[must_use]
pub fn shape_of(value: &serde_json::Value) -> serde_json::Value {
    use serde_json::{json, Value};
    match value {
        Value::Object(map) => json!({
            "type": "object",
            "keys": map.keys().collect::<Vec<_>>(),
        }),
        Value::Array(items) => json!({"type": "array", "len": items.len()}),
        Value::String(s) => json!({"type": "string", "len": s.len()}),
        Value::Number(_) => json!({"type": "number"}),
        Value::Bool(_) => json!({"type": "bool"}),
        Value::Null => json!({"type": "null"}),
    }
}
