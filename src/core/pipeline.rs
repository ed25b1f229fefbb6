//! PS-005: Pipeline construction and artifact hand-off validation.
//!
//! A pipeline is only constructed through [`build_pipeline`], which enforces:
//! - at least one stage, and at least one action per stage
//! - unique stage orders (stages are sorted by order)
//! - each artifact produced exactly once
//! - every input produced by the immediately preceding stage
//! - build actions declare `commands` and `artifacts`

use super::error::{Error, Result};
use super::types::{ActionKind, Stage};
use std::collections::HashMap;
use tracing::debug;

/// Parameters every build action must declare. Their contents are opaque here.
pub const BUILD_PARAMETERS: [&str; 2] = ["commands", "artifacts"];

/// A validated, ordered sequence of stages.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    name: String,
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stages sorted by order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Name of the stage producing `artifact`, if any.
    pub fn producer_of(&self, artifact: &str) -> Option<&str> {
        self.stages
            .iter()
            .find(|s| s.outputs().any(|o| o == artifact))
            .map(|s| s.name.as_str())
    }
}

/// Validate stages and assemble a pipeline.
pub fn build_pipeline(name: impl Into<String>, stages: Vec<Stage>) -> Result<Pipeline> {
    let name = name.into();
    if stages.is_empty() {
        return Err(Error::EmptyPipeline);
    }
    if let Some(empty) = stages.iter().find(|s| s.actions.is_empty()) {
        return Err(Error::EmptyStage(empty.name.clone()));
    }

    let mut seen_orders: HashMap<u32, &str> = HashMap::new();
    for stage in &stages {
        if let Some(first) = seen_orders.insert(stage.order, stage.name.as_str()) {
            return Err(Error::DuplicateOrder {
                order: stage.order,
                first: first.to_string(),
                second: stage.name.clone(),
            });
        }
    }

    let mut stages = stages;
    stages.sort_by_key(|s| s.order);

    // artifact id -> (stage position, stage name)
    let mut producers: HashMap<&str, (usize, &str)> = HashMap::new();
    for (pos, stage) in stages.iter().enumerate() {
        for artifact in stage.outputs() {
            if let Some((_, first)) = producers.insert(artifact, (pos, stage.name.as_str())) {
                return Err(Error::DuplicateArtifact {
                    artifact: artifact.to_string(),
                    first: first.to_string(),
                    second: stage.name.clone(),
                });
            }
        }
    }

    for (pos, stage) in stages.iter().enumerate() {
        for action in &stage.actions {
            for input in &action.inputs {
                match producers.get(input.as_str()) {
                    Some(&(producer_pos, producer)) if producer_pos + 1 == pos => {
                        debug!(artifact = %input, from = producer, to = %stage.name, "artifact hand-off");
                    }
                    Some(&(producer_pos, producer)) if producer_pos + 1 < pos => {
                        return Err(Error::SkippedStage {
                            artifact: input.clone(),
                            producer: producer.to_string(),
                            consumer: stage.name.clone(),
                        });
                    }
                    _ => {
                        return Err(Error::DanglingArtifact {
                            stage: stage.name.clone(),
                            action: action.name.clone(),
                            artifact: input.clone(),
                        });
                    }
                }
            }

            if action.kind == ActionKind::Build {
                for parameter in BUILD_PARAMETERS {
                    if !action.parameters.contains_key(parameter) {
                        return Err(Error::MissingParameter {
                            action: action.name.clone(),
                            parameter: parameter.to_string(),
                        });
                    }
                }
            }
        }
    }

    Ok(Pipeline { name, stages })
}
