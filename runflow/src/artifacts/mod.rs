//! Artifact and structured log sink.
//!
//! Artifacts are write-once named JSON blobs per run; the row log is an
//! append-only JSON-lines file per run. Email addresses never reach a row.

mod file;
mod redact;

pub use file::FileArtifactSink;
pub use redact::redact;

use crate::errors::ArtifactError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Where an artifact landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Artifact name.
    pub name: String,
    /// Path or URI.
    pub location: String,
    /// Hex SHA-256 of the stored bytes.
    pub sha256: String,
    /// Stored size.
    pub bytes: usize,
}

/// One structured log row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogRow {
    /// Unix seconds.
    pub timestamp: i64,
    /// Owning run.
    pub run_id: String,
    /// Stage that wrote the row.
    pub stage: String,
    /// Model used, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Sampling temperature, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Prompt tokens, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    /// Completion tokens, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    /// What was decided.
    pub decision_summary: String,
    /// Input artifact location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    /// Output artifact location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    /// Warning text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl LogRow {
    /// Creates a row stamped now.
    #[must_use]
    pub fn new(run_id: impl Into<String>, stage: impl Into<String>, decision_summary: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp(),
            run_id: run_id.into(),
            stage: stage.into(),
            decision_summary: decision_summary.into(),
            ..Self::default()
        }
    }

    /// Sets the model and temperature.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>, temperature: Option<f64>) -> Self {
        self.model = Some(model.into());
        self.temperature = temperature;
        self
    }

    /// Sets the artifact locations.
    #[must_use]
    pub fn with_paths(mut self, input: Option<String>, output: Option<String>) -> Self {
        self.input_path = input;
        self.output_path = output;
        self
    }

    /// Sets the warning.
    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    /// Returns the row with free-text fields redacted.
    #[must_use]
    pub fn redacted(mut self) -> Self {
        self.decision_summary = redact(&self.decision_summary);
        self.warning = self.warning.as_deref().map(redact);
        self
    }
}

/// Destination for artifacts and log rows.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Stores a named artifact once. A second write of the same name fails.
    async fn write_artifact(
        &self,
        run_id: &str,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<ArtifactRef, ArtifactError>;

    /// Appends a row to the run's log.
    async fn append_row(&self, row: LogRow) -> Result<(), ArtifactError>;
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpArtifactSink;

#[async_trait]
impl ArtifactSink for NoOpArtifactSink {
    async fn write_artifact(
        &self,
        _run_id: &str,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<ArtifactRef, ArtifactError> {
        let bytes = encode(value)?;
        Ok(artifact_ref(name, String::new(), &bytes))
    }

    async fn append_row(&self, _row: LogRow) -> Result<(), ArtifactError> {
        Ok(())
    }
}

/// Keeps artifacts and rows in memory.
#[derive(Debug, Default)]
pub struct MemoryArtifactSink {
    artifacts: RwLock<HashMap<(String, String), serde_json::Value>>,
    rows: RwLock<Vec<LogRow>>,
}

impl MemoryArtifactSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A stored artifact.
    #[must_use]
    pub fn artifact(&self, run_id: &str, name: &str) -> Option<serde_json::Value> {
        self.artifacts
            .read()
            .get(&(run_id.to_string(), name.to_string()))
            .cloned()
    }

    /// Names stored for a run, sorted.
    #[must_use]
    pub fn artifact_names(&self, run_id: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .artifacts
            .read()
            .keys()
            .filter(|(run, _)| run == run_id)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// All rows in append order.
    #[must_use]
    pub fn rows(&self) -> Vec<LogRow> {
        self.rows.read().clone()
    }
}

#[async_trait]
impl ArtifactSink for MemoryArtifactSink {
    async fn write_artifact(
        &self,
        run_id: &str,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<ArtifactRef, ArtifactError> {
        validate_name(name)?;
        let bytes = encode(value)?;
        let key = (run_id.to_string(), name.to_string());
        let mut artifacts = self.artifacts.write();
        if artifacts.contains_key(&key) {
            return Err(ArtifactError::AlreadyExists(name.to_string()));
        }
        artifacts.insert(key, value.clone());
        Ok(artifact_ref(name, format!("memory://{run_id}/{name}.json"), &bytes))
    }

    async fn append_row(&self, row: LogRow) -> Result<(), ArtifactError> {
        self.rows.write().push(row.redacted());
        Ok(())
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), ArtifactError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !name.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(ArtifactError::InvalidName(name.to_string()))
    }
}

pub(crate) fn encode(value: &serde_json::Value) -> Result<Vec<u8>, ArtifactError> {
    Ok(serde_json::to_vec_pretty(value)?)
}

pub(crate) fn artifact_ref(name: &str, location: String, bytes: &[u8]) -> ArtifactRef {
    ArtifactRef {
        name: name.to_string(),
        location,
        sha256: hex::encode(Sha256::digest(bytes)),
        bytes: bytes.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_sink_is_write_once() {
        let sink = MemoryArtifactSink::new();
        let first = sink.write_artifact("r1", "standards_attempt_1", &json!([1])).await.unwrap();
        assert_eq!(first.sha256.len(), 64);

        let err = sink.write_artifact("r1", "standards_attempt_1", &json!([2])).await.unwrap_err();
        assert!(matches!(err, ArtifactError::AlreadyExists(_)));
        assert_eq!(sink.artifact("r1", "standards_attempt_1"), Some(json!([1])));

        // Same name under another run is fine.
        sink.write_artifact("r2", "standards_attempt_1", &json!([3])).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let sink = MemoryArtifactSink::new();
        for bad in ["", "../escape", "a/b", ".hidden"] {
            let err = sink.write_artifact("r1", bad, &json!({})).await.unwrap_err();
            assert!(matches!(err, ArtifactError::InvalidName(_)), "{bad}");
        }
    }

    #[tokio::test]
    async fn test_rows_are_redacted() {
        let sink = MemoryArtifactSink::new();
        let row = LogRow::new("r1", "persist", "saved for teacher@example.org")
            .with_warning("ping ops@school.edu");
        sink.append_row(row).await.unwrap();

        let rows = sink.rows();
        assert_eq!(rows[0].decision_summary, "saved for [redacted@email]");
        assert_eq!(rows[0].warning.as_deref(), Some("ping [redacted@email]"));
    }

    #[test]
    fn test_digest_is_stable() {
        let a = artifact_ref("x", String::new(), b"abc");
        assert_eq!(
            a.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(a.bytes, 3);
    }
}
