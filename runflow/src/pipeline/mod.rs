//! Pipeline contract and execution.
//!
//! A [`Pipeline`] is a fixed ordered list of [`Stage`]s built with
//! [`PipelineBuilder`]. Each stage receives the [`RunState`] by value and
//! returns it with its own bundle entry added.

mod builder;
mod context;
mod executor;
mod stage;
mod state;

pub use builder::PipelineBuilder;
pub use context::{PipelineContext, StageContext};
pub use executor::{NoOpObserver, Pipeline, PipelineObserver, PIPELINE_STAGE};
pub use stage::{shape_of, Stage};
pub use state::{Bundle, RunState};
