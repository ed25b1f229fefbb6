//! PS-000: Error taxonomy.
//!
//! Every build-time failure (graph, rule, pipeline, output) is a variant of
//! [`Error`]. Stage execution failures are not errors: they surface as a
//! `failed` stage status in the run result. Only the CLI turns a failed run
//! into [`Error::PipelineFailed`] to set its exit status.

use thiserror::Error;

/// Errors raised while building, validating, provisioning or exporting a stack.
#[derive(Debug, Error)]
pub enum Error {
    #[error("resource '{0}' is already declared")]
    DuplicateId(String),

    #[error("unknown resource '{0}'")]
    UnknownNode(String),

    #[error("resource '{node}' has no attribute '{attribute}'")]
    UnknownAttribute { node: String, attribute: String },

    #[error("attribute '{attribute}' of '{node}' is not available until '{node}' is provisioned")]
    AttributeUnavailable { node: String, attribute: String },

    #[error("dependency cycle detected involving: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("invalid rule on '{group}': {reason}")]
    InvalidRule { group: String, reason: String },

    #[error("pipeline has no stages")]
    EmptyPipeline,

    #[error("stage '{0}' has no actions")]
    EmptyStage(String),

    #[error("stages '{first}' and '{second}' share order {order}")]
    DuplicateOrder {
        order: u32,
        first: String,
        second: String,
    },

    #[error("artifact '{artifact}' is produced by both '{first}' and '{second}'")]
    DuplicateArtifact {
        artifact: String,
        first: String,
        second: String,
    },

    #[error("action '{action}' in stage '{stage}' consumes '{artifact}', which no prior stage produces")]
    DanglingArtifact {
        stage: String,
        action: String,
        artifact: String,
    },

    #[error("stage '{consumer}' consumes '{artifact}' from '{producer}', which is not the immediately preceding stage")]
    SkippedStage {
        artifact: String,
        producer: String,
        consumer: String,
    },

    #[error("action '{action}' is missing required parameter '{parameter}'")]
    MissingParameter { action: String, parameter: String },

    #[error("output '{name}' cannot be resolved from {node}.{attribute}: {reason}")]
    UnresolvedOutput {
        name: String,
        node: String,
        attribute: String,
        reason: String,
    },

    #[error("template error: {0}")]
    Template(String),

    #[error("pipeline '{pipeline}' failed at stage '{stage}'")]
    PipelineFailed { pipeline: String, stage: String },

    #[error("provisioning '{node}' failed: {message}")]
    Backend { node: String, message: String },

    #[error("{} validation error(s): {}", .0.len(), .0.join("; "))]
    Config(Vec<String>),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("state error: {0}")]
    State(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
