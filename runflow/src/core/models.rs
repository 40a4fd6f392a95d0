//! Value objects exchanged between stages.

use serde::{Deserialize, Serialize};

/// Schema version stamped on stage outputs.
pub const SCHEMA_VERSION: &str = "0.1";

/// The caller's input for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Seed {
    /// Optional project title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Free-text topic.
    #[serde(default)]
    pub topic: String,
    /// Requested grade band, e.g. `6-8`. Empty means unconstrained.
    #[serde(default)]
    pub grade_band: String,
    /// Optional life skill to weave in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub life_skill: Option<String>,
    /// Students per group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_size: Option<u32>,
    /// Requested session length in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_min: Option<u32>,
    /// Owner contact; redacted from logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,
    /// Free-form extra constraints merged into the spec guards.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub constraints: serde_json::Map<String, serde_json::Value>,
}

impl Seed {
    /// Creates a seed for a topic and grade band.
    #[must_use]
    pub fn new(topic: impl Into<String>, grade_band: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            grade_band: grade_band.into(),
            ..Self::default()
        }
    }

    /// Sets the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the session length.
    #[must_use]
    pub const fn with_duration(mut self, minutes: u32) -> Self {
        self.duration_min = Some(minutes);
        self
    }

    /// Sets the group size.
    #[must_use]
    pub const fn with_group_size(mut self, size: u32) -> Self {
        self.group_size = Some(size);
        self
    }
}

/// Concrete, constrained specification trusted by downstream stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    /// Detected subject area.
    pub subject: String,
    /// Grade band copied from the seed.
    pub grade_band: String,
    /// Target skills, never empty.
    pub skills: Vec<String>,
    /// Session length in minutes, always positive.
    pub time_minutes: u32,
    /// Content and safety guards.
    pub guards: serde_json::Map<String, serde_json::Value>,
    /// Output schema version.
    pub schema_version: String,
}

/// One curriculum standard accepted for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardTarget {
    /// Standard code, e.g. `7.G.3`.
    pub code: String,
    /// Short description.
    pub description: String,
    /// Expected evidence of mastery.
    pub evidence_note: String,
}

impl StandardTarget {
    /// Creates a new target.
    #[must_use]
    pub fn new(
        code: impl Into<String>,
        description: impl Into<String>,
        evidence_note: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            evidence_note: evidence_note.into(),
        }
    }
}
