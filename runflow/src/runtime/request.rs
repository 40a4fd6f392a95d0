//! Start request and response.

use crate::core::{RunControls, RunFlags, RunKey, Seed};
use crate::errors::ClientError;
use crate::pipeline::Bundle;
use serde::{Deserialize, Serialize};

/// A request to start a run.
///
/// Seed fields sit at the top level next to the identifiers, so a body like
/// `{"project_id": "p1", "chat_id": "c1", "topic": "fractions", "grade_band": "6-8"}`
/// is complete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    /// Project identifier. Required.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Chat identifier. Required.
    #[serde(default)]
    pub chat_id: Option<String>,
    /// Suggested run id, honored when unused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Stage toggles.
    #[serde(default)]
    pub flags: RunFlags,
    /// Stage bounds.
    #[serde(default)]
    pub controls: RunControls,
    /// Shorthand for `controls.start_from`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_from: Option<String>,
    /// Shorthand for `controls.stop_after`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_after: Option<String>,
    /// Outputs of stages skipped by `start_from`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<Bundle>,
    /// Caller input.
    #[serde(flatten)]
    pub seed: Seed,
}

impl StartRequest {
    /// Creates a request for a project and chat.
    #[must_use]
    pub fn new(project_id: impl Into<String>, chat_id: impl Into<String>, seed: Seed) -> Self {
        Self {
            project_id: Some(project_id.into()),
            chat_id: Some(chat_id.into()),
            seed,
            ..Self::default()
        }
    }

    /// Suggests a run id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
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

    /// Supplies a replay bundle.
    #[must_use]
    pub fn with_bundle(mut self, bundle: Bundle) -> Self {
        self.bundle = Some(bundle);
        self
    }

    /// The idempotency key, if both parts are present and non-blank.
    pub fn key(&self) -> Result<RunKey, ClientError> {
        let project_id = required(self.project_id.as_deref(), "project_id")?;
        let chat_id = required(self.chat_id.as_deref(), "chat_id")?;
        Ok(RunKey::new(project_id, chat_id))
    }

    /// The suggested run id, if one was given and is usable.
    ///
    /// Run ids name artifact files, so they are limited to ASCII letters,
    /// digits, `_`, `-` and `.`, and may not start with `.`.
    pub fn suggested_run_id(&self) -> Result<Option<String>, ClientError> {
        let Some(raw) = self.run_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        let allowed = raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !allowed || raw.starts_with('.') || raw.len() > 128 {
            return Err(ClientError::InvalidField {
                field: "run_id".to_string(),
                reason: "only letters, digits, '_', '-' and '.' are allowed".to_string(),
            });
        }
        Ok(Some(raw.to_string()))
    }

    /// Controls with the top-level shorthands applied.
    #[must_use]
    pub fn effective_controls(&self) -> RunControls {
        let mut controls = self.controls.clone();
        if let Some(stage) = self.start_from.as_deref().filter(|s| !s.trim().is_empty()) {
            controls.start_from = Some(stage.trim().to_string());
        }
        if let Some(stage) = self.stop_after.as_deref().filter(|s| !s.trim().is_empty()) {
            controls.stop_after = Some(stage.trim().to_string());
        }
        controls
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, ClientError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ClientError::MissingField(field.to_string()))
}

/// Outcome of a start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    /// A new run was created and spawned.
    Accepted,
    /// The key already had a run; nothing was done.
    AlreadyExists,
}

/// Response to a start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResponse {
    /// The run serving this key.
    pub run_id: String,
    /// Whether it was created now.
    pub status: StartStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_flat_body_parses() {
        let request: StartRequest = serde_json::from_value(json!({
            "project_id": "p1",
            "chat_id": "c1",
            "topic": "fractions",
            "grade_band": "6-8",
            "group_size": 3,
            "flags": {"steps_enabled": true},
            "stop_after": "narrative",
        }))
        .unwrap();
        assert_eq!(request.seed.topic, "fractions");
        assert_eq!(request.seed.group_size, Some(3));
        assert!(request.flags.is_enabled("steps_enabled"));
        assert_eq!(request.effective_controls().stop_after.as_deref(), Some("narrative"));
        assert_eq!(request.key().unwrap(), RunKey::new("p1", "c1"));
    }

    #[test]
    fn test_blank_ids_are_missing() {
        let request = StartRequest::new("  ", "c1", Seed::default());
        assert_eq!(request.key(), Err(ClientError::MissingField("project_id".into())));
        let request = StartRequest {
            project_id: Some("p1".into()),
            ..StartRequest::default()
        };
        assert_eq!(request.key(), Err(ClientError::MissingField("chat_id".into())));
    }

    #[test]
    fn test_suggested_run_id_rules() {
        let base = StartRequest::new("p1", "c1", Seed::default());
        assert_eq!(base.suggested_run_id(), Ok(None));
        assert_eq!(base.clone().with_run_id(" ").suggested_run_id(), Ok(None));
        assert_eq!(
            base.clone().with_run_id("run_p1.c1-2").suggested_run_id(),
            Ok(Some("run_p1.c1-2".into()))
        );
        assert_err!(base.clone().with_run_id("../etc").suggested_run_id());
        assert_err!(base.clone().with_run_id("a/b").suggested_run_id());
        assert_ok!(base.with_run_id("x".repeat(128)).suggested_run_id());
    }
}
