//! Mock stages for testing.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::errors::{StageError, StageErrorKind};
use crate::pipeline::{RunState, Stage, StageContext};

/// A stage that reads its dependencies, stores a fixed output and counts calls.
#[derive(Debug)]
pub struct RecordingStage {
    name: String,
    dependencies: Vec<String>,
    output: serde_json::Value,
    flag: Option<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl RecordingStage {
    /// Creates a stage whose output is `{"stage": name}`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            output: json!({ "stage": name }),
            name,
            dependencies: Vec::new(),
            flag: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Declares required dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(|d| (*d).to_string()).collect();
        self
    }

    /// Sets the stored output.
    #[must_use]
    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = output;
        self
    }

    /// Runs only when `flag` is enabled.
    #[must_use]
    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flag = Some(flag.into());
        self
    }

    /// Sleeps before finishing.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the number of times the stage ran.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<&str> {
        self.dependencies.iter().map(String::as_str).collect()
    }

    fn is_enabled(&self, state: &RunState) -> bool {
        self.flag.as_deref().map_or(true, |f| state.flags.is_enabled(f))
    }

    async fn run(&self, mut state: RunState, ctx: &StageContext) -> Result<RunState, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for dep in &self.dependencies {
            ctx.input::<serde_json::Value>(&state, dep)?;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        ctx.store_output(&mut state, &self.output)?;
        Ok(state)
    }
}

/// A stage that always fails.
#[derive(Debug)]
pub struct FailingStage {
    name: String,
    kind: StageErrorKind,
    message: String,
}

impl FailingStage {
    /// Creates a failing stage.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: StageErrorKind, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            message: message.into(),
        }
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _state: RunState, _ctx: &StageContext) -> Result<RunState, StageError> {
        Err(StageError::new(&self.name, self.kind, &self.message))
    }
}

/// A stage that panics.
#[derive(Debug)]
pub struct PanickingStage {
    name: String,
}

impl PanickingStage {
    /// Creates a panicking stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for PanickingStage {
    fn name(&self) -> &str {
        &self.name
    }

    #[allow(clippy::panic)]
    async fn run(&self, _state: RunState, _ctx: &StageContext) -> Result<RunState, StageError> {
        panic!("{} exploded", self.name)
    }
}
