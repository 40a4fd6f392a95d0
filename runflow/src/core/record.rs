//! Run identity and lifecycle record.

use super::models::Seed;
use super::status::RunStatus;
use crate::utils::{now, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Caller-supplied idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunKey {
    /// The project.
    pub project_id: String,
    /// The chat that requested the run.
    pub chat_id: String,
}

impl RunKey {
    /// Creates a new key.
    #[must_use]
    pub fn new(project_id: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            chat_id: chat_id.into(),
        }
    }
}

/// Named booleans toggling optional stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunFlags(BTreeMap<String, bool>);

impl RunFlags {
    /// Creates an empty flag set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a flag.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.0.insert(name.into(), enabled);
        self
    }

    /// Returns the flag value, `false` when absent.
    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        self.is_enabled_or(name, false)
    }

    /// Returns the flag value or `default` when absent.
    #[must_use]
    pub fn is_enabled_or(&self, name: &str, default: bool) -> bool {
        self.0.get(name).copied().unwrap_or(default)
    }

    /// Iterates over all flags.
    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, bool)> for RunFlags {
    fn from_iter<I: IntoIterator<Item = (String, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Optional stage bounds for replay and debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunControls {
    /// First stage to execute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_from: Option<String>,
    /// Last stage to execute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_after: Option<String>,
}

impl RunControls {
    /// Sets the first stage.
    #[must_use]
    pub fn with_start_from(mut self, stage: impl Into<String>) -> Self {
        self.start_from = Some(stage.into());
        self
    }

    /// Sets the last stage.
    #[must_use]
    pub fn with_stop_after(mut self, stage: impl Into<String>) -> Self {
        self.stop_after = Some(stage.into());
        self
    }
}

/// Authoritative lifecycle record of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Globally unique run identifier.
    pub run_id: String,
    /// The project.
    pub project_id: String,
    /// The requesting chat.
    pub chat_id: String,
    /// Input payload.
    pub seed: Seed,
    /// Optional stage toggles.
    pub flags: RunFlags,
    /// Stage bounds.
    pub controls: RunControls,
    /// Current status.
    pub status: RunStatus,
    /// When the record was created.
    pub created_at: Timestamp,
    /// When the worker started.
    pub started_at: Option<Timestamp>,
    /// When the run reached a terminal status.
    pub completed_at: Option<Timestamp>,
    /// Failure message for `error` runs.
    pub error: Option<String>,
    /// Wall-clock duration per stage, in milliseconds.
    pub node_timings: BTreeMap<String, f64>,
}

impl RunRecord {
    /// Creates a record in `queued` status.
    #[must_use]
    pub fn queued(
        run_id: impl Into<String>,
        key: &RunKey,
        seed: Seed,
        flags: RunFlags,
        controls: RunControls,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            project_id: key.project_id.clone(),
            chat_id: key.chat_id.clone(),
            seed,
            flags,
            controls,
            status: RunStatus::Queued,
            created_at: now(),
            started_at: None,
            completed_at: None,
            error: None,
            node_timings: BTreeMap::new(),
        }
    }

    /// The idempotency key of this run.
    #[must_use]
    pub fn key(&self) -> RunKey {
        RunKey::new(&self.project_id, &self.chat_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_defaults() {
        let flags = RunFlags::new().with("steps_enabled", true);
        assert!(flags.is_enabled("steps_enabled"));
        assert!(!flags.is_enabled("data_enabled"));
        assert!(flags.is_enabled_or("persist_enabled", true));
    }

    #[test]
    fn test_flags_serialize_as_plain_map() {
        let flags = RunFlags::new().with("data_enabled", false);
        let value = serde_json::to_value(&flags).unwrap();
        assert_eq!(value, serde_json::json!({"data_enabled": false}));
    }

    #[test]
    fn test_queued_record() {
        let key = RunKey::new("p1", "c1");
        let record = RunRecord::queued("r1", &key, Seed::default(), RunFlags::new(), RunControls::default());
        assert_eq!(record.status, RunStatus::Queued);
        assert!(record.started_at.is_none());
        assert_eq!(record.key(), key);
    }
}
