//! Stage reasoning notes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a thought.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtKind {
    /// Looking at inputs.
    Analyzing,
    /// Laying out an approach.
    Planning,
    /// Choosing between options.
    Deciding,
    /// Doing the work.
    Processing,
    /// Checking results.
    Validating,
    /// Something looks off.
    Warning,
    /// Something failed.
    Error,
    /// Work finished.
    Success,
    /// Anything else.
    Info,
}

impl fmt::Display for ThoughtKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Analyzing => "analyzing",
            Self::Planning => "planning",
            Self::Deciding => "deciding",
            Self::Processing => "processing",
            Self::Validating => "validating",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Success => "success",
            Self::Info => "info",
        };
        f.write_str(s)
    }
}

/// One reasoning note recorded by a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    /// The stage that wrote it.
    pub stage: String,
    /// Category.
    pub kind: ThoughtKind,
    /// Text.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// When it was recorded (ISO 8601).
    pub at: String,
}

/// Append-only log of thoughts for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThoughtLog(Vec<Thought>);

impl ThoughtLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a thought.
    pub fn push(&mut self, thought: Thought) {
        self.0.push(thought);
    }

    /// All thoughts in order.
    #[must_use]
    pub fn entries(&self) -> &[Thought] {
        &self.0
    }

    /// Number of thoughts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
