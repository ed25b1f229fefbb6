//! Pipestack: declarative provisioning graph and delivery pipeline.
//!
//! Resources form a dependency graph that is validated before anything is
//! provisioned. A Source → Build pipeline hands artifacts stage to stage,
//! and stack outputs expose what provisioning produced.

pub mod backend;
pub mod cli;
pub mod core;
pub mod provenance;
pub mod runner;
