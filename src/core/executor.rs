//! PS-006: Pipeline executor: per-stage state machine with fail-fast halt.
//!
//! Stages run strictly in order: pending → running → succeeded | failed.
//! A failed stage halts the run; later stages stay pending and nothing the
//! failed stage produced is published. Failures are reported through the
//! returned [`PipelineRun`], never as an error.

use super::pipeline::Pipeline;
use super::types::{
    Action, Artifact, Payload, PipelineStatus, ProvenanceEvent, Stage, StageStatus,
};
use crate::provenance::eventlog;
use indexmap::IndexMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Payloads returned by an action, keyed by artifact id.
pub type ActionOutputs = IndexMap<String, Payload>;

/// Performs the work of a single action (checkout, build, deploy).
pub trait ActionRunner {
    fn run(
        &mut self,
        stage: &Stage,
        action: &Action,
        inputs: &[&Artifact],
    ) -> Result<ActionOutputs, String>;
}

impl<F> ActionRunner for F
where
    F: FnMut(&Stage, &Action, &[&Artifact]) -> Result<ActionOutputs, String>,
{
    fn run(
        &mut self,
        stage: &Stage,
        action: &Action,
        inputs: &[&Artifact],
    ) -> Result<ActionOutputs, String> {
        self(stage, action, inputs)
    }
}

/// Outcome of one stage in a run.
#[derive(Debug, Clone)]
pub struct StageRecord {
    pub name: String,
    pub order: u32,
    pub status: StageStatus,
    pub error: Option<String>,
    pub duration: Duration,
    /// Artifacts published by this stage
    pub artifacts: Vec<String>,
}

impl StageRecord {
    fn advance(&mut self, next: StageStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal stage transition {} -> {}",
            self.status,
            next
        );
        self.status = next;
    }
}

/// Result of executing a pipeline once.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub pipeline: String,
    pub run_id: String,
    pub status: PipelineStatus,
    pub stages: Vec<StageRecord>,
    /// Artifacts published by succeeded stages
    pub artifacts: IndexMap<String, Artifact>,
    pub events: Vec<ProvenanceEvent>,
    pub total_duration: Duration,
}

impl PipelineRun {
    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn artifact(&self, id: &str) -> Option<&Artifact> {
        self.artifacts.get(id)
    }

    pub fn succeeded(&self) -> bool {
        self.status == PipelineStatus::Succeeded
    }

    /// The stage that halted the run, if any.
    pub fn failed_stage(&self) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.status == StageStatus::Failed)
    }
}

/// Execute every stage of `pipeline` in order.
pub fn execute(pipeline: &Pipeline, runner: &mut dyn ActionRunner) -> PipelineRun {
    let start = Instant::now();
    let run_id = eventlog::generate_run_id();
    let mut events = Vec::new();
    let mut published: IndexMap<String, Artifact> = IndexMap::new();
    let mut records: Vec<StageRecord> = pipeline
        .stages()
        .iter()
        .map(|s| StageRecord {
            name: s.name.clone(),
            order: s.order,
            status: StageStatus::Pending,
            error: None,
            duration: Duration::ZERO,
            artifacts: Vec::new(),
        })
        .collect();

    info!(pipeline = pipeline.name(), run_id = %run_id, stages = records.len(), "pipeline started");

    for (stage, record) in pipeline.stages().iter().zip(records.iter_mut()) {
        record.advance(StageStatus::Running);
        events.push(ProvenanceEvent::StageStarted {
            pipeline: pipeline.name().to_string(),
            stage: stage.name.clone(),
            order: stage.order,
        });
        info!(stage = %stage.name, order = stage.order, "stage running");

        let stage_start = Instant::now();
        let outcome = run_stage(stage, &published, runner);
        record.duration = stage_start.elapsed();

        match outcome {
            Ok(produced) => {
                record.artifacts = produced.iter().map(|a| a.id.clone()).collect();
                for artifact in produced {
                    published.insert(artifact.id.clone(), artifact);
                }
                record.advance(StageStatus::Succeeded);
                events.push(ProvenanceEvent::StageSucceeded {
                    pipeline: pipeline.name().to_string(),
                    stage: stage.name.clone(),
                    artifacts: record.artifacts.clone(),
                    duration_seconds: record.duration.as_secs_f64(),
                });
                info!(stage = %stage.name, artifacts = ?record.artifacts, "stage succeeded");
            }
            Err(error) => {
                warn!(stage = %stage.name, error = %error, "stage failed; halting pipeline");
                record.advance(StageStatus::Failed);
                record.error = Some(error.clone());
                events.push(ProvenanceEvent::StageFailed {
                    pipeline: pipeline.name().to_string(),
                    stage: stage.name.clone(),
                    error,
                    duration_seconds: record.duration.as_secs_f64(),
                });
                break;
            }
        }
    }

    let status = if records.iter().all(|r| r.status == StageStatus::Succeeded) {
        PipelineStatus::Succeeded
    } else {
        PipelineStatus::Failed
    };
    let total_duration = start.elapsed();
    events.push(ProvenanceEvent::PipelineCompleted {
        pipeline: pipeline.name().to_string(),
        run_id: run_id.clone(),
        status,
        total_seconds: total_duration.as_secs_f64(),
    });
    info!(pipeline = pipeline.name(), status = %status, "pipeline completed");

    PipelineRun {
        pipeline: pipeline.name().to_string(),
        run_id,
        status,
        stages: records,
        artifacts: published,
        events,
        total_duration,
    }
}

/// Run all actions of a stage. Outputs are returned only if every action
/// succeeded and produced everything it declared.
fn run_stage(
    stage: &Stage,
    published: &IndexMap<String, Artifact>,
    runner: &mut dyn ActionRunner,
) -> Result<Vec<Artifact>, String> {
    let mut produced = Vec::new();

    for action in &stage.actions {
        let inputs = action
            .inputs
            .iter()
            .map(|id| {
                published
                    .get(id)
                    .ok_or_else(|| format!("input artifact '{}' is not available", id))
            })
            .collect::<Result<Vec<&Artifact>, String>>()?;

        let mut outputs = runner
            .run(stage, action, &inputs)
            .map_err(|e| format!("{}: {}", action.name, e))?;

        for id in &action.outputs {
            let payload = outputs.shift_remove(id).ok_or_else(|| {
                format!("{}: declared output '{}' was not produced", action.name, id)
            })?;
            produced.push(Artifact {
                id: id.clone(),
                producer_stage: stage.name.clone(),
                payload,
            });
        }
        for extra in outputs.keys() {
            warn!(action = %action.name, artifact = %extra, "ignoring undeclared output");
        }
    }

    Ok(produced)
}
