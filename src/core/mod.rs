//! Core provisioning model and delivery pipeline.

pub mod apply;
pub mod error;
pub mod executor;
pub mod graph;
pub mod outputs;
pub mod parser;
pub mod pipeline;
pub mod planner;
pub mod resolver;
pub mod stack;
pub mod state;
pub mod types;
