//! # Runflow
//!
//! Orchestration core for long-running, multi-stage generation runs.
//!
//! Runflow provides:
//!
//! - **Idempotent admission**: duplicate `(project_id, chat_id)` starts collapse
//!   into one run, even when they race
//! - **Per-run event streams**: ordered, bounded, never lossy, ending with
//!   exactly one terminal event
//! - **Background workers**: one task per run, the sole writer of its record
//! - **Stage pipelines**: declared bundle dependencies, replay bounds,
//!   timeouts and cooperative cancellation
//! - **Standards mapping**: generate, filter by grade band, reverse-validate,
//!   retry once
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use runflow::prelude::*;
//!
//! let service = RunService::new(RunflowConfig::from_env()?, provider, repository)?;
//! let started = service.start(StartRequest::new("p1", "c1", Seed::new("fractions", "6-8")))?;
//! let mut events = Box::pin(service.subscribe(&started.run_id)?);
//! while let Some(event) = events.next().await {
//!     println!("{}: {}", event.event_type, event.data);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod artifacts;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod generation;
pub mod persistence;
pub mod pipeline;
pub mod registry;
pub mod runtime;
pub mod stages;
pub mod telemetry;
pub mod testing;
pub mod utils;
pub mod worker;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::artifacts::{ArtifactSink, FileArtifactSink, LogRow, MemoryArtifactSink, NoOpArtifactSink};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::RunflowConfig;
    pub use crate::core::{
        event_types, RunControls, RunEvent, RunFlags, RunKey, RunRecord, RunStatus, Seed, Spec,
        StandardTarget, ThoughtKind,
    };
    pub use crate::errors::{
        ClientError, GenerationError, PersistenceError, RunflowError, StageError, StageErrorKind,
    };
    pub use crate::events::{EventBus, EventSink};
    #[cfg(feature = "openai")]
    pub use crate::generation::OpenAiProvider;
    pub use crate::generation::{GenerationProvider, GenerationRequest, GenerationResponse};
    pub use crate::persistence::{InMemoryProjectRepository, ProjectRepository};
    pub use crate::pipeline::{Bundle, Pipeline, PipelineBuilder, RunState, Stage, StageContext};
    pub use crate::runtime::{RunService, StartRequest, StartResponse, StartStatus};
    pub use crate::stages::project_pipeline;
    pub use crate::telemetry::{init_tracing, LogFormat};
    pub use crate::utils::{generate_run_id, iso_timestamp, Timestamp};
}
