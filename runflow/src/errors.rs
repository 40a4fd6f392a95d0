//! Error types for the runflow core.
//!
//! Every collaborator has its own error type. Stages convert whatever they
//! hit into a [`StageError`], and the worker is the only place a
//! `StageError` turns into a terminal run failure.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The umbrella error type for runflow operations outside a running stage.
#[derive(Debug, Error)]
pub enum RunflowError {
    /// The request was malformed.
    #[error("{0}")]
    Client(#[from] ClientError),

    /// The requested run or project does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A persistence call failed.
    #[error("{0}")]
    Persistence(#[from] PersistenceError),

    /// The pipeline definition is invalid.
    #[error("{0}")]
    Pipeline(#[from] PipelineValidationError),

    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Publishing to an event stream failed.
    #[error("{0}")]
    EventBus(#[from] EventBusError),
}

/// A bad or incomplete start request. The run is never created.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// A required field was absent or blank.
    #[error("missing required field '{0}'")]
    MissingField(String),

    /// A field was present but could not be accepted.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The offending field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ClientError {
    /// Short machine-readable code for HTTP error bodies.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::InvalidField { .. } => "invalid_field",
        }
    }
}

/// Classification of a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    /// Input or output did not match the stage contract.
    Validation,
    /// A declared bundle dependency was absent.
    MissingDependency,
    /// A stage read a bundle key it did not declare.
    UndeclaredDependency,
    /// The generation capability failed.
    Generation,
    /// The persistence capability failed.
    Persistence,
    /// The artifact sink failed.
    Artifact,
    /// The stage exceeded its time budget.
    Timeout,
    /// The run was cancelled while the stage was active.
    Cancelled,
    /// Anything else, including panics.
    Internal,
}

impl fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::MissingDependency => write!(f, "missing_dependency"),
            Self::UndeclaredDependency => write!(f, "undeclared_dependency"),
            Self::Generation => write!(f, "generation"),
            Self::Persistence => write!(f, "persistence"),
            Self::Artifact => write!(f, "artifact"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// A failure attributed to one pipeline stage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("stage '{stage}' failed ({kind}): {message}")]
pub struct StageError {
    /// The stage that detected the failure.
    pub stage: String,
    /// The failure class.
    pub kind: StageErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl StageError {
    /// Creates a new stage error.
    #[must_use]
    pub fn new(stage: impl Into<String>, kind: StageErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            kind,
            message: message.into(),
        }
    }

    /// The stage input or output violated its contract.
    #[must_use]
    pub fn validation(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, StageErrorKind::Validation, message)
    }

    /// A declared dependency has no entry in the bundle.
    #[must_use]
    pub fn missing_dependency(stage: impl Into<String>, key: &str) -> Self {
        Self::new(
            stage,
            StageErrorKind::MissingDependency,
            format!("missing dependency '{key}': bundle has no output for it"),
        )
    }

    /// The stage asked for a key it never declared.
    #[must_use]
    pub fn undeclared_dependency(stage: impl Into<String>, key: &str) -> Self {
        Self::new(
            stage,
            StageErrorKind::UndeclaredDependency,
            format!("access to undeclared dependency '{key}'"),
        )
    }

    /// Wraps a generation failure.
    #[must_use]
    pub fn generation(stage: impl Into<String>, err: &GenerationError) -> Self {
        Self::new(stage, StageErrorKind::Generation, err.to_string())
    }

    /// Wraps a persistence failure.
    #[must_use]
    pub fn persistence(stage: impl Into<String>, err: &PersistenceError) -> Self {
        Self::new(stage, StageErrorKind::Persistence, err.to_string())
    }

    /// Wraps an artifact sink failure.
    #[must_use]
    pub fn artifact(stage: impl Into<String>, err: &ArtifactError) -> Self {
        Self::new(stage, StageErrorKind::Artifact, err.to_string())
    }

    /// The stage ran past its timeout.
    #[must_use]
    pub fn timeout(stage: impl Into<String>, after: Duration) -> Self {
        Self::new(
            stage,
            StageErrorKind::Timeout,
            format!("timed out after {}ms", after.as_millis()),
        )
    }

    /// The run was cancelled.
    #[must_use]
    pub fn cancelled(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(stage, StageErrorKind::Cancelled, reason)
    }

    /// Unexpected internal failure.
    #[must_use]
    pub fn internal(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, StageErrorKind::Internal, message)
    }

    /// Payload for the terminal `error` event.
    #[must_use]
    pub fn to_event_data(&self, run_id: &str) -> serde_json::Value {
        serde_json::json!({
            "run_id": run_id,
            "message": self.to_string(),
            "stage": self.stage,
            "kind": self.kind,
        })
    }
}

/// Failure of the generation capability.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Transport-level failure.
    #[error("generation request failed: {0}")]
    Request(String),

    /// The endpoint answered with a non-success status.
    #[error("generation API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// The endpoint throttled us.
    #[error("generation rate limited")]
    RateLimited,

    /// The content could not be interpreted.
    #[error("could not parse generation output: {0}")]
    Parse(String),

    /// The endpoint returned nothing usable.
    #[error("generation returned an empty response")]
    EmptyResponse,

    /// No credentials are configured.
    #[error("no API key configured for generation")]
    MissingApiKey,

    /// Provider construction failed.
    #[error("generation provider misconfigured: {0}")]
    Config(String),
}

impl GenerationError {
    /// Whether a retry with a narrowing hint might help.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Api { .. } | Self::RateLimited | Self::Parse(_))
    }
}

/// Failure of the persistence capability.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistenceError {
    /// The backend rejected or failed the operation.
    #[error("persistence backend error: {0}")]
    Backend(String),

    /// A document could not be encoded or decoded.
    #[error("persistence serialization error: {0}")]
    Serialization(String),
}

/// Failure of the artifact sink.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// A write-once artifact with this name already exists.
    #[error("artifact '{0}' already exists")]
    AlreadyExists(String),

    /// The artifact name is not a plain file stem.
    #[error("invalid artifact name '{0}'")]
    InvalidName(String),

    /// Filesystem failure.
    #[error("artifact IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding failure.
    #[error("artifact serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure publishing to a run's event stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventBusError {
    /// The stream already carried its terminal event.
    #[error("event stream for run '{0}' is closed")]
    StreamClosed(String),

    /// The receiving half was dropped.
    #[error("event stream for run '{0}' has no receiver")]
    Disconnected(String),

    /// Stages may not publish terminal event types.
    #[error("event type '{0}' is reserved for the run worker")]
    ReservedEventType(String),
}

/// Error raised when a pipeline definition is invalid.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// What went wrong.
    pub message: String,
    /// Stages involved.
    pub stages: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the involved stages.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}

/// Configuration loading failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held an unusable value.
    #[error("invalid value '{value}' for {key}")]
    InvalidValue {
        /// Variable or field name.
        key: String,
        /// The raw value.
        value: String,
    },

    /// A setting is out of its allowed range.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// JSON could not be parsed.
    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_display_names_stage_and_kind() {
        let err = StageError::validation("standards", "no candidates left");
        assert_eq!(
            err.to_string(),
            "stage 'standards' failed (validation): no candidates left"
        );
    }

    #[test]
    fn test_missing_dependency_message() {
        let err = StageError::missing_dependency("narrative", "standards");
        assert_eq!(err.kind, StageErrorKind::MissingDependency);
        assert!(err.message.contains("'standards'"));
    }

    #[test]
    fn test_event_data_shape() {
        let err = StageError::timeout("spec", Duration::from_millis(250));
        let data = err.to_event_data("run_1");
        assert_eq!(data["run_id"], "run_1");
        assert_eq!(data["stage"], "spec");
        assert_eq!(data["kind"], "timeout");
        assert!(data["message"].as_str().unwrap_or_default().contains("250ms"));
    }

    #[test]
    fn test_generation_retryable() {
        assert!(GenerationError::Parse("x".into()).is_retryable());
        assert!(GenerationError::RateLimited.is_retryable());
        assert!(!GenerationError::EmptyResponse.is_retryable());
        assert!(!GenerationError::MissingApiKey.is_retryable());
    }

    #[test]
    fn test_client_error_codes() {
        assert_eq!(ClientError::MissingField("chat_id".into()).code(), "missing_field");
        let err = ClientError::InvalidField {
            field: "run_id".into(),
            reason: "blank".into(),
        };
        assert_eq!(err.code(), "invalid_field");
    }
}
