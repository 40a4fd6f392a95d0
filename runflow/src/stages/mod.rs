//! The project generation stages.
//!
//! `spec → standards → narrative → steps → data → persist`. Steps and data
//! run only when their flags are on; persist runs unless its flag is off.

pub mod data;
pub mod narrative;
pub mod persist;
pub mod spec;
pub mod standards;
pub mod steps;

pub use data::{DataOutput, DataStage, DATA_FLAG, DATA_STAGE};
pub use narrative::{NarrativeOutput, NarrativeStage, Role, World, NARRATIVE_STAGE};
pub use persist::{PersistOutput, PersistStage, PERSIST_FLAG, PERSIST_STAGE, PROJECT_SCHEMA_VERSION};
pub use spec::{SpecBuilderStage, SPEC_STAGE};
pub use standards::{GradeBand, StandardsOutput, StandardsStage, STANDARDS_STAGE};
pub use steps::{StepsOutput, StepsStage, STEPS_FLAG, STEPS_STAGE};

use crate::config::RunflowConfig;
use crate::errors::PipelineValidationError;
use crate::generation::GenerationProvider;
use crate::persistence::ProjectRepository;
use crate::pipeline::{Pipeline, PipelineBuilder};
use std::sync::Arc;

/// Name of the project pipeline.
pub const PROJECT_PIPELINE: &str = "project";

/// Builds the full project pipeline.
pub fn project_pipeline(
    provider: Arc<dyn GenerationProvider>,
    repository: Arc<dyn ProjectRepository>,
    config: &RunflowConfig,
) -> Result<Pipeline, PipelineValidationError> {
    let standards = StandardsStage::new(provider, config.standards.max_standards)
        .with_temperature(config.generation.temperature);

    PipelineBuilder::new(PROJECT_PIPELINE)
        .stage(Arc::new(SpecBuilderStage::new()))?
        .stage(Arc::new(standards))?
        .stage(Arc::new(NarrativeStage::new()))?
        .stage(Arc::new(StepsStage::new()))?
        .stage(Arc::new(DataStage::new()))?
        .stage(Arc::new(PersistStage::new(repository)))?
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryProjectRepository;
    use crate::testing::ScriptedProvider;

    #[test]
    fn test_project_pipeline_order() {
        let pipeline = project_pipeline(
            Arc::new(ScriptedProvider::new()),
            Arc::new(InMemoryProjectRepository::new()),
            &RunflowConfig::default(),
        )
        .unwrap();
        assert_eq!(
            pipeline.stage_names(),
            vec!["spec", "standards", "narrative", "steps", "data", "persist"]
        );
    }
}
