//! Provisioning backends.
//!
//! A [`Provisioner`] materializes one resource node at a time and returns
//! the attributes the node exposes (ids, DNS names, URLs).

pub mod simulated;

use crate::core::stack::DependencyAttributes;
use crate::core::types::{Attributes, ExecutionPlan, PlanAction, ResourceNode, StackLock};
use indexmap::IndexMap;
use tracing::debug;

/// Creates or updates a single resource.
pub trait Provisioner {
    /// Provision `node`. `deps` holds the attributes of every node it depends on.
    fn provision(
        &mut self,
        node: &ResourceNode,
        deps: &DependencyAttributes<'_>,
    ) -> Result<Attributes, String>;
}

/// Reuses locked attributes for nodes the plan leaves unchanged and
/// delegates everything else.
pub struct LockedProvisioner<'a> {
    inner: &'a mut dyn Provisioner,
    reuse: IndexMap<String, Attributes>,
}

impl<'a> LockedProvisioner<'a> {
    pub fn new(inner: &'a mut dyn Provisioner, plan: &ExecutionPlan, lock: Option<&StackLock>) -> Self {
        let reuse = plan
            .changes
            .iter()
            .filter(|c| c.action == PlanAction::NoOp)
            .filter_map(|c| {
                lock.and_then(|l| l.resources.get(&c.resource_id))
                    .map(|r| (c.resource_id.clone(), r.attributes.clone()))
            })
            .collect();
        Self { inner, reuse }
    }

    /// Whether `id` will be served from the lock.
    pub fn is_reused(&self, id: &str) -> bool {
        self.reuse.contains_key(id)
    }
}

impl Provisioner for LockedProvisioner<'_> {
    fn provision(
        &mut self,
        node: &ResourceNode,
        deps: &DependencyAttributes<'_>,
    ) -> Result<Attributes, String> {
        if let Some(attributes) = self.reuse.get(&node.id) {
            debug!(resource = %node.id, "unchanged; reusing locked attributes");
            return Ok(attributes.clone());
        }
        self.inner.provision(node, deps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::ResourceGraph;
    use crate::core::planner::plan;
    use crate::core::stack::Stack;
    use crate::core::state::new_lock;
    use crate::core::types::{ResourceKind, ResourceLock, ResourceStatus};
    use crate::provenance::hasher;

    struct Counting(usize);

    impl Provisioner for Counting {
        fn provision(
            &mut self,
            node: &ResourceNode,
            _deps: &DependencyAttributes<'_>,
        ) -> Result<Attributes, String> {
            self.0 += 1;
            let mut attrs = Attributes::new();
            attrs.insert("id".to_string(), format!("fresh-{}", node.id));
            Ok(attrs)
        }
    }

    #[test]
    fn test_ps013_locked_provisioner_reuses_unchanged() {
        let mut g = ResourceGraph::new();
        let vpc = ResourceNode::new("vpc", ResourceKind::Network).with_property("cidr", "10.0.0.0/16");
        g.add_node(vpc.clone()).unwrap();
        g.add_node(ResourceNode::new("repo", ResourceKind::SourceRepo)).unwrap();

        let mut lock = new_lock("s");
        let mut locked_attrs = Attributes::new();
        locked_attrs.insert("id".to_string(), "locked-vpc".to_string());
        lock.resources.insert(
            "vpc".to_string(),
            ResourceLock {
                kind: ResourceKind::Network,
                status: ResourceStatus::Provisioned,
                applied_at: None,
                hash: hasher::hash_node(&vpc),
                attributes: locked_attrs,
            },
        );

        let order = g.validate().unwrap();
        let p = plan("s", &g, &order, Some(&lock));
        let mut inner = Counting(0);
        {
            let mut backend = LockedProvisioner::new(&mut inner, &p, Some(&lock));
            assert!(backend.is_reused("vpc"));
            assert!(!backend.is_reused("repo"));
            let mut stack = Stack::new(g).unwrap();
            stack.provision_all(&mut backend).unwrap();
            assert_eq!(stack.resolve_attribute("vpc", "id").unwrap(), "locked-vpc");
            assert_eq!(stack.resolve_attribute("repo", "id").unwrap(), "fresh-repo");
        }
        assert_eq!(inner.0, 1);
    }
}
