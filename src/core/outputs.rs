//! PS-007: Output exporter: named values read from a materialized stack.

use super::error::{Error, Result};
use super::stack::Stack;
use indexmap::IndexMap;
use tracing::debug;

/// Binds an exported name to an attribute of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBinding {
    pub name: String,
    pub source_node_id: String,
    pub attribute: String,
}

impl OutputBinding {
    pub fn new(
        name: impl Into<String>,
        source_node_id: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_node_id: source_node_id.into(),
            attribute: attribute.into(),
        }
    }
}

/// Resolve every binding. The first unresolvable binding fails the export.
pub fn export(bindings: &[OutputBinding], stack: &Stack) -> Result<IndexMap<String, String>> {
    let mut values = IndexMap::with_capacity(bindings.len());
    for binding in bindings {
        let value = stack
            .resolve_attribute(&binding.source_node_id, &binding.attribute)
            .map_err(|e| Error::UnresolvedOutput {
                name: binding.name.clone(),
                node: binding.source_node_id.clone(),
                attribute: binding.attribute.clone(),
                reason: e.to_string(),
            })?;
        debug!(output = %binding.name, value = %value, "exported");
        values.insert(binding.name.clone(), value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::simulated::SimulatedProvisioner;
    use crate::core::graph::ResourceGraph;
    use crate::core::types::{ResourceKind, ResourceNode};

    fn stack() -> Stack {
        let mut g = ResourceGraph::new();
        g.add_node(ResourceNode::new("vpc", ResourceKind::Network).with_property("cidr", "10.0.0.0/16"))
            .unwrap();
        g.add_node(ResourceNode::new("sg", ResourceKind::SecurityGroup).depending_on(["vpc"]))
            .unwrap();
        g.add_node(
            ResourceNode::new("instance", ResourceKind::ComputeInstance)
                .with_property("instance_type", "t2.micro")
                .depending_on(["sg"]),
        )
        .unwrap();
        g.add_node(
            ResourceNode::new("registry", ResourceKind::ImageRegistry)
                .with_property("repository_name", "flask-app"),
        )
        .unwrap();
        Stack::new(g).unwrap()
    }

    fn bindings() -> Vec<OutputBinding> {
        vec![
            OutputBinding::new("instancePublicDnsName", "instance", "publicDnsName"),
            OutputBinding::new("registryUri", "registry", "repositoryUri"),
        ]
    }

    #[test]
    fn test_ps007_export_after_provisioning() {
        let mut s = stack();
        s.provision_all(&mut SimulatedProvisioner::default()).unwrap();
        let out = export(&bindings(), &s).unwrap();
        let names: Vec<_> = out.keys().cloned().collect();
        assert_eq!(names, vec!["instancePublicDnsName", "registryUri"]);
        assert!(out["instancePublicDnsName"].ends_with(".compute.amazonaws.com"));
        assert!(out["registryUri"].ends_with("/flask-app"));
    }

    #[test]
    fn test_ps007_unprovisioned_is_unresolved() {
        let s = stack();
        let err = export(&bindings(), &s).unwrap_err();
        assert!(matches!(err, Error::UnresolvedOutput { ref name, .. } if name == "instancePublicDnsName"));
    }

    #[test]
    fn test_ps007_unknown_attribute_is_unresolved() {
        let mut s = stack();
        s.provision_all(&mut SimulatedProvisioner::default()).unwrap();
        let err = export(&[OutputBinding::new("x", "vpc", "publicIp")], &s).unwrap_err();
        match err {
            Error::UnresolvedOutput { node, attribute, reason, .. } => {
                assert_eq!(node, "vpc");
                assert_eq!(attribute, "publicIp");
                assert!(reason.contains("no attribute"));
            }
            other => panic!("expected unresolved output, got {other:?}"),
        }
    }

    #[test]
    fn test_ps007_empty_bindings() {
        assert!(export(&[], &stack()).unwrap().is_empty());
    }
}
