//! PS-012: Plan generation: diff the desired graph against the state lock.

use super::graph::ResourceGraph;
use super::types::{
    ExecutionPlan, PlanAction, PlannedChange, ResourceKind, ResourceNode, ResourceStatus,
    StackLock,
};
use crate::provenance::hasher;
use std::collections::HashMap;

/// Generate an execution plan by comparing the graph to the lock.
/// `order` must be the graph's creation order.
pub fn plan(
    stack_name: &str,
    graph: &ResourceGraph,
    order: &[String],
    lock: Option<&StackLock>,
) -> ExecutionPlan {
    let mut changes = Vec::new();
    let mut to_create = 0u32;
    let mut to_update = 0u32;
    let mut unchanged = 0u32;
    let mut levels: HashMap<&str, usize> = HashMap::new();

    for resource_id in order {
        let Some(node) = graph.node(resource_id) else {
            continue;
        };

        let level = node
            .depends_on
            .iter()
            .filter_map(|d| levels.get(d.as_str()))
            .map(|l| l + 1)
            .max()
            .unwrap_or(0);
        levels.insert(resource_id.as_str(), level);

        let action = determine_action(node, lock);
        match action {
            PlanAction::Create => to_create += 1,
            PlanAction::Update => to_update += 1,
            PlanAction::NoOp => unchanged += 1,
        }

        changes.push(PlannedChange {
            resource_id: resource_id.clone(),
            kind: node.kind,
            action,
            level,
            description: describe_action(node, action),
        });
    }

    ExecutionPlan {
        name: stack_name.to_string(),
        changes,
        execution_order: order.to_vec(),
        to_create,
        to_update,
        unchanged,
    }
}

/// Determine what to do with a node given the previous lock.
fn determine_action(node: &ResourceNode, lock: Option<&StackLock>) -> PlanAction {
    let Some(previous) = lock.and_then(|l| l.resources.get(&node.id)) else {
        return PlanAction::Create;
    };
    if previous.status != ResourceStatus::Provisioned {
        // Previously failed, retry
        return PlanAction::Update;
    }
    if previous.hash == hasher::hash_node(node) {
        PlanAction::NoOp
    } else {
        PlanAction::Update
    }
}

/// Human-readable description of a planned action.
fn describe_action(node: &ResourceNode, action: PlanAction) -> String {
    let id = &node.id;
    match action {
        PlanAction::Create => match node.kind {
            ResourceKind::Network => format!(
                "{}: create network {}",
                id,
                node.property_str("cidr").unwrap_or_default()
            ),
            ResourceKind::SecurityGroup => {
                let rules: Vec<String> = node.rules.iter().map(ToString::to_string).collect();
                format!("{}: create security group [{}]", id, rules.join(", "))
            }
            ResourceKind::ComputeInstance => format!(
                "{}: launch {} instance",
                id,
                node.property_str("instance_type").unwrap_or_default()
            ),
            ResourceKind::SourceRepo | ResourceKind::ImageRegistry => format!(
                "{}: create {} {}",
                id,
                node.kind,
                node.property_str("repository_name").unwrap_or_default()
            ),
            _ => format!("{}: create {}", id, node.kind),
        },
        PlanAction::Update => format!("{}: update (desired state changed)", id),
        PlanAction::NoOp => format!("{}: no changes", id),
    }
}
