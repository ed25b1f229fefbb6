//! PS-004: Stack: a validated, read-only graph being materialized.
//!
//! Provisioning walks the creation order one node at a time. A node's
//! attributes become resolvable only once the walk has reached it.

use super::error::{Error, Result};
use super::graph::ResourceGraph;
use super::types::{value_to_string, Attributes, ResourceNode};
use crate::backend::Provisioner;
use indexmap::IndexMap;
use tracing::{debug, info};

/// Attributes of a node's dependencies, keyed by dependency id.
pub type DependencyAttributes<'a> = IndexMap<&'a str, &'a Attributes>;

#[derive(Debug)]
pub struct Stack {
    graph: ResourceGraph,
    order: Vec<String>,
    provisioned: IndexMap<String, Attributes>,
}

impl Stack {
    /// Validate and freeze a graph.
    pub fn new(graph: ResourceGraph) -> Result<Self> {
        let order = graph.validate()?;
        Ok(Self {
            graph,
            order,
            provisioned: IndexMap::new(),
        })
    }

    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    /// Required creation order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn is_provisioned(&self, id: &str) -> bool {
        self.provisioned.contains_key(id)
    }

    pub fn is_complete(&self) -> bool {
        self.provisioned.len() == self.order.len()
    }

    /// Ids provisioned so far, in creation order.
    pub fn provisioned(&self) -> impl Iterator<Item = (&str, &Attributes)> {
        self.provisioned.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Id of the next node to provision, if any.
    pub fn next_pending(&self) -> Option<&str> {
        self.order.get(self.provisioned.len()).map(String::as_str)
    }

    /// Attributes of a provisioned node.
    pub fn attributes(&self, id: &str) -> Option<&Attributes> {
        self.provisioned.get(id)
    }

    /// Provision the next node in order. Returns its id, or `None` when the
    /// whole stack is materialized. On failure the walk does not advance.
    pub fn provision_next(&mut self, backend: &mut dyn Provisioner) -> Result<Option<String>> {
        let Some(id) = self.next_pending().map(str::to_string) else {
            return Ok(None);
        };
        let node = self
            .graph
            .node(&id)
            .ok_or_else(|| Error::UnknownNode(id.clone()))?;

        let deps: DependencyAttributes<'_> = node
            .depends_on
            .iter()
            .filter_map(|d| self.provisioned.get(d).map(|a| (d.as_str(), a)))
            .collect();

        debug!(resource = %id, kind = %node.kind, "provisioning");
        let produced = backend
            .provision(node, &deps)
            .map_err(|message| Error::Backend {
                node: id.clone(),
                message,
            })?;

        let attributes = merge_attributes(node, produced);
        info!(resource = %id, kind = %node.kind, attributes = attributes.len(), "provisioned");
        self.provisioned.insert(id.clone(), attributes);
        Ok(Some(id))
    }

    /// Provision every remaining node. Returns the ids provisioned by this call.
    pub fn provision_all(&mut self, backend: &mut dyn Provisioner) -> Result<Vec<String>> {
        let mut done = Vec::new();
        while let Some(id) = self.provision_next(backend)? {
            done.push(id);
        }
        Ok(done)
    }

    /// Read an attribute of a provisioned node.
    pub fn resolve_attribute(&self, id: &str, attribute: &str) -> Result<String> {
        if !self.graph.contains(id) {
            return Err(Error::UnknownNode(id.to_string()));
        }
        let attrs = self
            .provisioned
            .get(id)
            .ok_or_else(|| Error::AttributeUnavailable {
                node: id.to_string(),
                attribute: attribute.to_string(),
            })?;
        attrs
            .get(attribute)
            .cloned()
            .ok_or_else(|| Error::UnknownAttribute {
                node: id.to_string(),
                attribute: attribute.to_string(),
            })
    }
}

/// Backend attributes take precedence over declared scalar properties.
fn merge_attributes(node: &ResourceNode, produced: Attributes) -> Attributes {
    let mut merged: Attributes = node
        .properties
        .iter()
        .filter(|(_, v)| !v.is_mapping() && !v.is_sequence())
        .map(|(k, v)| (k.clone(), value_to_string(v)))
        .collect();
    merged.extend(produced);
    merged
}
