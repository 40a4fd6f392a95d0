//! Runtime configuration.
//!
//! Every field has a serde default, so a partial JSON file is valid.
//! [`RunflowConfig::from_env`] overlays environment variables on top.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunflowConfig {
    /// Event stream settings.
    #[serde(default)]
    pub events: EventsConfig,
    /// Pipeline execution settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Standards mapping settings.
    #[serde(default)]
    pub standards: StandardsConfig,
    /// Generation endpoint settings.
    #[serde(default)]
    pub generation: GenerationConfig,
    /// Artifact sink settings.
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
}

/// Event stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Pending events held per run before publishers wait.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    crate::events::DEFAULT_CHANNEL_CAPACITY
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Pipeline execution settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Per-stage timeout. `None` disables it.
    #[serde(default)]
    pub stage_timeout_seconds: Option<f64>,
}

impl PipelineConfig {
    /// Stage timeout as a `Duration`.
    #[must_use]
    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_seconds.map(Duration::from_secs_f64)
    }
}

/// Standards mapping settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardsConfig {
    /// Maximum accepted targets.
    #[serde(default = "default_max_standards")]
    pub max_standards: usize,
}

fn default_max_standards() -> usize {
    3
}

impl Default for StandardsConfig {
    fn default() -> Self {
        Self {
            max_standards: default_max_standards(),
        }
    }
}

/// OpenAI-compatible endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Base URL, without the `/chat/completions` suffix.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Bearer token.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Default model.
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Request timeout in seconds.
    #[serde(default = "default_generation_timeout")]
    pub timeout_seconds: f64,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_generation_timeout() -> f64 {
    120.0
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: None,
            model: default_model(),
            temperature: None,
            timeout_seconds: default_generation_timeout(),
        }
    }
}

impl GenerationConfig {
    /// Gets timeout as Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds)
    }
}

/// Artifact sink settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Root directory. `None` discards artifacts.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl RunflowConfig {
    /// Parses a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Overlays values from `lookup`, which maps variable names to values.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RUNFLOW_EVENT_CAPACITY") {
            self.events.channel_capacity = parse_var("RUNFLOW_EVENT_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("RUNFLOW_STAGE_TIMEOUT_SECS") {
            self.pipeline.stage_timeout_seconds = Some(parse_var("RUNFLOW_STAGE_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("RUNFLOW_MAX_STANDARDS") {
            self.standards.max_standards = parse_var("RUNFLOW_MAX_STANDARDS", &v)?;
        }
        if let Some(v) = lookup("RUNFLOW_ARTIFACT_DIR").filter(|v| !v.trim().is_empty()) {
            self.artifacts.dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("OPENAI_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.generation.api_key = Some(v);
        }
        if let Some(v) = lookup("OPENAI_BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.generation.api_base = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("OPENAI_MODEL").filter(|v| !v.trim().is_empty()) {
            self.generation.model = v;
        }
        self.validate()?;
        Ok(self)
    }

    /// Rejects settings that cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.events.channel_capacity == 0 {
            return Err(ConfigError::Invalid("events.channel_capacity must be positive".into()));
        }
        if self.standards.max_standards == 0 {
            return Err(ConfigError::Invalid("standards.max_standards must be positive".into()));
        }
        if let Some(t) = self.pipeline.stage_timeout_seconds {
            if !(t.is_finite() && t > 0.0) {
                return Err(ConfigError::Invalid(
                    "pipeline.stage_timeout_seconds must be positive".into(),
                ));
            }
        }
        if !(self.generation.timeout_seconds.is_finite() && self.generation.timeout_seconds > 0.0) {
            return Err(ConfigError::Invalid("generation.timeout_seconds must be positive".into()));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RunflowConfig::default();
        assert_eq!(config.events.channel_capacity, 4096);
        assert_eq!(config.standards.max_standards, 3);
        assert_eq!(config.generation.model, "gpt-4o-mini");
        assert!(config.pipeline.stage_timeout().is_none());
        assert!(config.artifacts.dir.is_none());
    }

    #[test]
    fn test_partial_json() {
        let config = RunflowConfig::from_json_str(r#"{"standards": {"max_standards": 2}}"#).unwrap();
        assert_eq!(config.standards.max_standards, 2);
        assert_eq!(config.events.channel_capacity, 4096);
    }

    #[test]
    fn test_env_overlay() {
        let config = RunflowConfig::default()
            .with_env(env(&[
                ("OPENAI_API_KEY", "sk-test"),
                ("OPENAI_BASE_URL", "https://openrouter.ai/api/v1/"),
                ("RUNFLOW_STAGE_TIMEOUT_SECS", "2.5"),
                ("RUNFLOW_ARTIFACT_DIR", "/tmp/runs"),
            ]))
            .unwrap();
        assert_eq!(config.generation.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.generation.api_base, "https://openrouter.ai/api/v1");
        assert_eq!(config.pipeline.stage_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.artifacts.dir, Some(PathBuf::from("/tmp/runs")));
    }

    #[test]
    fn test_invalid_env_value_is_an_error() {
        let err = RunflowConfig::default()
            .with_env(env(&[("RUNFLOW_MAX_STANDARDS", "three")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "RUNFLOW_MAX_STANDARDS"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = RunflowConfig::from_json_str(r#"{"events": {"channel_capacity": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut config = RunflowConfig::default();
        config.generation.api_key = Some("secret".into());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
