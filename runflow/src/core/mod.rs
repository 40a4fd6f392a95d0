//! Core domain model types for runflow.
//!
//! - Run lifecycle status and record
//! - Events carried on the per-run stream
//! - Stage value objects and thoughts

mod event;
mod models;
mod record;
mod status;
mod thought;

pub use event::{types as event_types, RunEvent};
pub use models::{Seed, Spec, StandardTarget, SCHEMA_VERSION};
pub use record::{RunControls, RunFlags, RunKey, RunRecord};
pub use status::RunStatus;
pub use thought::{Thought, ThoughtKind, ThoughtLog};
