//! Run events carried on the per-run stream.

use serde::{Deserialize, Serialize};

/// Well-known event type tags.
pub mod types {
    /// The worker picked up the run.
    pub const RUN_STARTED: &str = "run_started";
    /// A stage reasoning note.
    pub const THOUGHT: &str = "thought";
    /// A stage was entered.
    pub const PHASE_TRANSITION: &str = "phase_transition";
    /// A stage finished.
    pub const STAGE_COMPLETED: &str = "stage_completed";
    /// A stage was bypassed by a flag.
    pub const STAGE_SKIPPED: &str = "stage_skipped";
    /// Persistence of a section began.
    pub const SECTION_STARTED: &str = "section_started";
    /// Persistence of a section finished.
    pub const SECTION_COMPLETED: &str = "section_completed";
    /// Terminal: the run succeeded.
    pub const RUN_COMPLETED: &str = "run_completed";
    /// Terminal: the run failed.
    pub const ERROR: &str = "error";

    /// Prefix for artifact events.
    pub const ARTIFACT_PREFIX: &str = "artifact_";

    /// Builds the `artifact_<name>` event type.
    #[must_use]
    pub fn artifact(name: &str) -> String {
        format!("{ARTIFACT_PREFIX}{name}")
    }

    /// Returns true for `run_completed` and `error`.
    #[must_use]
    pub fn is_terminal(event_type: &str) -> bool {
        event_type == RUN_COMPLETED || event_type == ERROR
    }
}

/// One event on a run's stream.
///
/// There is no sequence number: enqueue order is the ordering contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// The event type tag.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Event payload.
    #[serde(default)]
    pub data: serde_json::Value,

    /// When the event was published (ISO 8601).
    pub timestamp: String,
}

impl RunEvent {
    /// Creates a new event stamped with the current time.
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: crate::utils::iso_timestamp(),
        }
    }

    /// Whether this event ends the stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        types::is_terminal(&self.event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_terminal_types() {
        assert!(RunEvent::new(types::RUN_COMPLETED, json!({})).is_terminal());
        assert!(RunEvent::new(types::ERROR, json!({})).is_terminal());
        assert!(!RunEvent::new(types::THOUGHT, json!({})).is_terminal());
        assert!(!RunEvent::new(types::artifact("narrative"), json!({})).is_terminal());
    }

    #[test]
    fn test_serializes_type_field() {
        let event = RunEvent::new(types::RUN_STARTED, json!({"run_id": "r1"}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "run_started");
        assert_eq!(value["data"]["run_id"], "r1");
    }
}
