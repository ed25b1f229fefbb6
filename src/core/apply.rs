//! PS-018: Apply: orchestration loop for provisioning and delivery.
//!
//! compile → plan → provision in creation order → export outputs → lock →
//! resolve pipeline parameters → execute pipeline → events.

use super::error::{Error, Result};
use super::executor::{self, PipelineRun};
use super::outputs;
use super::parser::{self, Blueprint};
use super::pipeline::{build_pipeline, Pipeline};
use super::planner;
use super::resolver;
use super::stack::{DependencyAttributes, Stack};
use super::state;
use super::types::{
    Attributes, ExecutionPlan, PlanAction, ProvenanceEvent, ResourceLock, ResourceNode,
    ResourceStatus, StackConfig, StackLock,
};
use crate::backend::simulated::SimulatedProvisioner;
use crate::backend::{LockedProvisioner, Provisioner};
use crate::provenance::{eventlog, hasher};
use crate::runner::LocalRunner;
use indexmap::IndexMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Configuration for an apply run.
pub struct ApplyConfig<'a> {
    pub config: &'a StackConfig,
    pub state_dir: &'a Path,
    /// Directory source actions resolve checkouts against
    pub workspace: &'a Path,
    pub force: bool,
    pub dry_run: bool,
    pub skip_pipeline: bool,
}

/// Outcome of an apply run.
#[derive(Debug)]
pub struct ApplyResult {
    pub plan: ExecutionPlan,
    pub provisioned: usize,
    pub unchanged: usize,
    pub outputs: IndexMap<String, String>,
    pub run: Option<PipelineRun>,
    pub total_duration: Duration,
}

impl ApplyResult {
    /// True unless the pipeline ran and failed.
    pub fn succeeded(&self) -> bool {
        self.run.as_ref().map_or(true, PipelineRun::succeeded)
    }
}

/// Compile the stack and plan it against the current lock.
pub fn plan_stack(config: &StackConfig, state_dir: &Path) -> Result<(Blueprint, ExecutionPlan, Option<StackLock>)> {
    let blueprint = parser::compile(config)?;
    let order = blueprint.graph.validate()?;
    let lock = state::load_lock(state_dir, &config.name)?;
    let plan = planner::plan(&config.name, &blueprint.graph, &order, lock.as_ref());
    Ok((blueprint, plan, lock))
}

/// Execute the apply loop against the simulated backend.
pub fn apply(cfg: &ApplyConfig<'_>) -> Result<ApplyResult> {
    let mut simulated = SimulatedProvisioner::new(&cfg.config.backend);
    apply_with(cfg, &mut simulated)
}

/// Execute the apply loop, provisioning changed nodes through `provisioner`.
///
/// The lock is saved on every path that has called the backend: after a
/// provisioning failure, after an export failure and after success.
pub fn apply_with(cfg: &ApplyConfig<'_>, provisioner: &mut dyn Provisioner) -> Result<ApplyResult> {
    let start = Instant::now();
    let config = cfg.config;
    let (blueprint, plan, lock) = plan_stack(config, cfg.state_dir)?;
    let previous = if cfg.force { None } else { lock.as_ref() };
    let plan = if cfg.force {
        planner::plan(&config.name, &blueprint.graph, &plan.execution_order, None)
    } else {
        plan
    };

    if cfg.dry_run {
        return Ok(ApplyResult {
            plan,
            provisioned: 0,
            unchanged: 0,
            outputs: IndexMap::new(),
            run: None,
            total_duration: start.elapsed(),
        });
    }

    let run_id = eventlog::generate_run_id();
    let mut events = vec![ProvenanceEvent::ProvisionStarted {
        stack: config.name.clone(),
        run_id: run_id.clone(),
        pipestack_version: env!("CARGO_PKG_VERSION").to_string(),
    }];
    info!(stack = %config.name, run_id = %run_id, to_create = plan.to_create, to_update = plan.to_update, "apply started");

    let mut backend = LockedProvisioner::new(provisioner, &plan, previous);
    let mut stack = Stack::new(blueprint.graph)?;
    let mut new_lock = seeded_lock(&config.name, &plan, lock.as_ref());
    let mut provisioned = 0;
    let mut unchanged = 0;

    let walk = provision_recording(
        &mut stack,
        &mut backend,
        &plan,
        &config.name,
        &mut new_lock,
        &mut events,
        (&mut provisioned, &mut unchanged),
    );
    if let Err(e) = walk {
        persist(cfg, &new_lock, &events)?;
        return Err(e);
    }

    let exported = match outputs::export(&blueprint.outputs, &stack) {
        Ok(exported) => exported,
        Err(e) => {
            warn!(error = %e, "output export failed; saving provisioned state");
            new_lock.outputs.clear();
            persist(cfg, &new_lock, &events)?;
            return Err(e);
        }
    };
    new_lock.outputs.clone_from(&exported);
    events.push(ProvenanceEvent::OutputsExported {
        stack: config.name.clone(),
        outputs: exported.keys().cloned().collect(),
    });
    persist(cfg, &new_lock, &events)?;

    let run = match (&blueprint.pipeline, cfg.skip_pipeline) {
        (Some(pipeline), false) => Some(run_resolved(cfg, pipeline, &stack)?),
        _ => None,
    };

    Ok(ApplyResult {
        plan,
        provisioned,
        unchanged,
        outputs: exported,
        run,
        total_duration: start.elapsed(),
    })
}

/// Fresh lock carrying the previous entries of every node still declared, in
/// creation order, plus the previous outputs. Nodes the walk does not reach
/// keep their earlier state.
fn seeded_lock(stack_name: &str, plan: &ExecutionPlan, previous: Option<&StackLock>) -> StackLock {
    let mut lock = state::new_lock(stack_name);
    if let Some(previous) = previous {
        for id in &plan.execution_order {
            if let Some(entry) = previous.resources.get(id) {
                lock.resources.insert(id.clone(), entry.clone());
            }
        }
        lock.outputs.clone_from(&previous.outputs);
    }
    lock
}

/// Walk the stack, recording every node into the lock and the event list.
fn provision_recording(
    stack: &mut Stack,
    backend: &mut LockedProvisioner<'_>,
    plan: &ExecutionPlan,
    stack_name: &str,
    lock: &mut StackLock,
    events: &mut Vec<ProvenanceEvent>,
    counters: (&mut usize, &mut usize),
) -> Result<()> {
    let (provisioned, unchanged) = counters;
    loop {
        let Some(id) = stack.next_pending().map(str::to_string) else {
            return Ok(());
        };
        let node = stack
            .graph()
            .node(&id)
            .cloned()
            .ok_or_else(|| Error::UnknownNode(id.clone()))?;
        let hash = hasher::hash_node(&node);
        let noop = plan
            .changes
            .iter()
            .any(|c| c.resource_id == id && c.action == PlanAction::NoOp);

        match stack.provision_next(&mut *backend) {
            Ok(_) => {
                let attributes = stack.attributes(&id).cloned().unwrap_or_default();
                lock.resources.insert(
                    id.clone(),
                    ResourceLock {
                        kind: node.kind,
                        status: ResourceStatus::Provisioned,
                        applied_at: Some(eventlog::now_iso8601()),
                        hash: hash.clone(),
                        attributes,
                    },
                );
                if noop {
                    *unchanged += 1;
                    events.push(ProvenanceEvent::ResourceUnchanged {
                        stack: stack_name.to_string(),
                        resource: id,
                    });
                } else {
                    *provisioned += 1;
                    events.push(ProvenanceEvent::ResourceProvisioned {
                        stack: stack_name.to_string(),
                        resource: id,
                        kind: node.kind,
                        hash,
                    });
                }
            }
            Err(e) => {
                warn!(resource = %id, error = %e, "provisioning failed; stopping");
                lock.resources.insert(
                    id.clone(),
                    ResourceLock {
                        kind: node.kind,
                        status: ResourceStatus::Failed,
                        applied_at: Some(eventlog::now_iso8601()),
                        hash,
                        attributes: IndexMap::new(),
                    },
                );
                events.push(ProvenanceEvent::ResourceFailed {
                    stack: stack_name.to_string(),
                    resource: id,
                    error: e.to_string(),
                });
                return Err(e);
            }
        }
    }
}

/// Save the lock and append events, as the stack policy allows.
fn persist(cfg: &ApplyConfig<'_>, lock: &StackLock, events: &[ProvenanceEvent]) -> Result<()> {
    if cfg.config.policy.lock_file {
        state::save_lock(cfg.state_dir, lock)?;
    }
    if cfg.config.policy.tripwire {
        eventlog::append_events(cfg.state_dir, &cfg.config.name, events)?;
    }
    Ok(())
}

/// Resolve action parameters against the stack and execute the pipeline.
fn run_resolved(cfg: &ApplyConfig<'_>, pipeline: &Pipeline, stack: &Stack) -> Result<PipelineRun> {
    let stages = resolver::resolve_stages(pipeline.stages(), &cfg.config.params, stack)?;
    let resolved = build_pipeline(pipeline.name(), stages)?;
    let mut runner = LocalRunner::new(cfg.workspace, state::build_dir(cfg.state_dir, &cfg.config.name));
    let run = executor::execute(&resolved, &mut runner);
    if cfg.config.policy.tripwire {
        eventlog::append_events(cfg.state_dir, &cfg.config.name, &run.events)?;
    }
    Ok(run)
}

/// Execute the pipeline against an already provisioned stack.
/// Fails if the stack has changes that `apply` has not provisioned yet.
pub fn run_pipeline(cfg: &ApplyConfig<'_>) -> Result<PipelineRun> {
    let (blueprint, plan, lock) = plan_stack(cfg.config, cfg.state_dir)?;
    let pipeline = blueprint
        .pipeline
        .ok_or_else(|| Error::State(format!("stack '{}' declares no pipeline", cfg.config.name)))?;
    let pending: Vec<&str> = plan
        .changes
        .iter()
        .filter(|c| c.action != PlanAction::NoOp)
        .map(|c| c.resource_id.as_str())
        .collect();
    if !pending.is_empty() {
        return Err(Error::State(format!(
            "stack '{}' has unprovisioned changes ({}); run apply first",
            cfg.config.name,
            pending.join(", ")
        )));
    }

    // Every node is served from the lock, so the inner backend is never called.
    let mut unreachable = Refuse;
    let mut backend = LockedProvisioner::new(&mut unreachable, &plan, lock.as_ref());
    let mut stack = Stack::new(blueprint.graph)?;
    stack.provision_all(&mut backend)?;
    run_resolved(cfg, &pipeline, &stack)
}

struct Refuse;

impl Provisioner for Refuse {
    fn provision(
        &mut self,
        node: &ResourceNode,
        _deps: &DependencyAttributes<'_>,
    ) -> std::result::Result<Attributes, String> {
        Err(format!("'{}' is not in the lock", node.id))
    }
}
