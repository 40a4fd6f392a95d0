//! Pipeline builder with validation.

use super::{Pipeline, Stage};
use crate::errors::PipelineValidationError;
use std::collections::HashSet;
use std::sync::Arc;

/// Builder for creating validated pipelines.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
    names: HashSet<String>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            names: HashSet::new(),
        }
    }

    /// Appends a stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken or a dependency does not name
    /// an earlier stage.
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Result<Self, PipelineValidationError> {
        let name = stage.name().to_string();
        if name.trim().is_empty() {
            return Err(PipelineValidationError::new("Stage name must not be empty"));
        }
        if self.names.contains(&name) {
            return Err(PipelineValidationError::new(format!(
                "Duplicate stage name '{name}'"
            ))
            .with_stages(vec![name]));
        }

        for dep in stage.dependencies().into_iter().chain(stage.optional_dependencies()) {
            if dep == name {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{name}' cannot depend on itself"
                ))
                .with_stages(vec![name]));
            }
            if !self.names.contains(dep) {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{name}' depends on unknown stage '{dep}'; add the dependency before the stage that depends on it"
                ))
                .with_stages(vec![name.clone(), dep.to_string()]));
            }
        }

        self.names.insert(name);
        self.stages.push(stage);
        Ok(self)
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if no stage was added.
    pub fn build(self) -> Result<Pipeline, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Pipeline '{}' has no stages",
                self.name
            )));
        }
        Ok(Pipeline::new(self.name, self.stages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingStage;

    fn stage(name: &str, deps: &[&str]) -> Arc<dyn Stage> {
        Arc::new(RecordingStage::new(name).with_dependencies(deps))
    }

    #[test]
    fn test_builds_in_order() {
        let pipeline = PipelineBuilder::new("p")
            .stage(stage("a", &[]))
            .and_then(|b| b.stage(stage("b", &["a"])))
            .and_then(PipelineBuilder::build)
            .unwrap();
        assert_eq!(pipeline.stage_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_missing_dependency_rejected() {
        let err = PipelineBuilder::new("p").stage(stage("b", &["a"])).unwrap_err();
        assert!(err.message.contains("unknown stage 'a'"));
        assert_eq!(err.stages, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_forward_reference_rejected() {
        let err = PipelineBuilder::new("p")
            .stage(stage("a", &["b"]))
            .unwrap_err();
        assert!(err.message.contains("'b'"));
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = PipelineBuilder::new("p")
            .stage(stage("a", &[]))
            .and_then(|b| b.stage(stage("a", &[])))
            .unwrap_err();
        assert!(err.message.contains("Duplicate"));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(PipelineBuilder::new("p").build().is_err());
    }
}
