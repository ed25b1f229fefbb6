//! PS-003: Resource graph: node arena, dependency edges, creation order.
//!
//! Nodes live in an arena addressed by their string id. Edges are the
//! `depends_on` sets of each node. The creation order is computed with
//! Kahn's algorithm with deterministic (alphabetical) tie-breaking.

use super::error::{Error, Result};
use super::types::{Protocol, ResourceKind, ResourceNode, SecurityRule};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use tracing::{debug, warn};

/// The dependency-ordered collection of resource nodes (build phase).
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: Vec<ResourceNode>,
    index: HashMap<String, usize>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&ResourceNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.iter()
    }

    /// Add a node. Its `depends_on` entries are checked by [`validate`](Self::validate).
    pub fn add_node(&mut self, node: ResourceNode) -> Result<()> {
        if self.index.contains_key(&node.id) {
            return Err(Error::DuplicateId(node.id));
        }
        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Record that `from` must be created after `to`.
    pub fn add_dependency(&mut self, from: &str, to: &str) -> Result<()> {
        let from_idx = *self
            .index
            .get(from)
            .ok_or_else(|| Error::UnknownNode(from.to_string()))?;
        if !self.index.contains_key(to) {
            return Err(Error::UnknownNode(to.to_string()));
        }
        if let Some(mut path) = self.path_between(to, from) {
            path.insert(0, from.to_string());
            return Err(Error::Cycle(path));
        }
        self.nodes[from_idx].depends_on.insert(to.to_string());
        Ok(())
    }

    /// Depth-first search along `depends_on` edges from `start` to `target`.
    /// Returns the visited path when `target` is reachable.
    fn path_between(&self, start: &str, target: &str) -> Option<Vec<String>> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<(&str, Vec<String>)> = vec![(start, vec![start.to_string()])];

        while let Some((current, path)) = stack.pop() {
            if current == target {
                return Some(path);
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(node) = self.node(current) {
                for dep in node.depends_on.iter().rev() {
                    if !visited.contains(dep.as_str()) {
                        let mut next = path.clone();
                        next.push(dep.clone());
                        stack.push((dep.as_str(), next));
                    }
                }
            }
        }
        None
    }

    /// Attach a security rule to a security group node.
    pub fn attach_rule(&mut self, group_id: &str, rule: SecurityRule) -> Result<()> {
        let idx = *self
            .index
            .get(group_id)
            .ok_or_else(|| Error::UnknownNode(group_id.to_string()))?;
        let node = &mut self.nodes[idx];
        if node.kind != ResourceKind::SecurityGroup {
            return Err(Error::InvalidRule {
                group: group_id.to_string(),
                reason: format!("'{}' is a {}, not a security_group", group_id, node.kind),
            });
        }
        check_rule(&rule).map_err(|reason| Error::InvalidRule {
            group: group_id.to_string(),
            reason,
        })?;
        if node.rules.contains(&rule) {
            warn!(group = group_id, rule = %rule, "duplicate security rule attached");
        }
        node.rules.push(rule);
        Ok(())
    }

    /// Compute the creation order. Fails on dangling references and cycles.
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut in_degree: Vec<usize> = vec![0; self.nodes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];

        for (idx, node) in self.nodes.iter().enumerate() {
            for dep in &node.depends_on {
                let dep_idx = *self
                    .index
                    .get(dep)
                    .ok_or_else(|| Error::UnknownNode(dep.clone()))?;
                dependents[dep_idx].push(idx);
                in_degree[idx] += 1;
            }
        }

        let by_id = |a: &usize, b: &usize| self.nodes[*a].id.cmp(&self.nodes[*b].id);

        let mut ready: Vec<usize> = (0..self.nodes.len()).filter(|&i| in_degree[i] == 0).collect();
        ready.sort_by(by_id);
        let mut queue: VecDeque<usize> = ready.into();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(current) = queue.pop_front() {
            order.push(self.nodes[current].id.clone());

            let mut next_ready = Vec::new();
            for &child in &dependents[current] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    next_ready.push(child);
                }
            }
            next_ready.sort_by(by_id);
            queue.extend(next_ready);
        }

        if order.len() != self.nodes.len() {
            let mut members: Vec<String> = self
                .nodes
                .iter()
                .enumerate()
                .filter(|(i, _)| in_degree[*i] > 0)
                .map(|(_, n)| n.id.clone())
                .collect();
            members.sort();
            return Err(Error::Cycle(members));
        }

        debug!(order = ?order, "resource graph validated");
        Ok(order)
    }

    /// Group nodes into dependency levels. Nodes in the same level have no
    /// ordering requirement between them.
    pub fn levels(&self) -> Result<Vec<Vec<String>>> {
        let order = self.validate()?;
        let mut level_of: HashMap<&str, usize> = HashMap::new();
        let mut levels: Vec<Vec<String>> = Vec::new();

        for id in &order {
            let node = &self.nodes[self.index[id]];
            let level = node
                .depends_on
                .iter()
                .map(|d| level_of[d.as_str()] + 1)
                .max()
                .unwrap_or(0);
            level_of.insert(id.as_str(), level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(id.clone());
        }
        Ok(levels)
    }

    /// Attribute lookup on a graph that has not been provisioned.
    ///
    /// Unknown ids always fail with [`Error::UnknownNode`]; known ids have no
    /// attributes yet. Provisioned attributes are served by
    /// [`Stack::resolve_attribute`](super::stack::Stack::resolve_attribute).
    pub fn resolve_attribute(&self, id: &str, attribute: &str) -> Result<String> {
        if !self.contains(id) {
            return Err(Error::UnknownNode(id.to_string()));
        }
        Err(Error::AttributeUnavailable {
            node: id.to_string(),
            attribute: attribute.to_string(),
        })
    }
}

/// Check a rule's port, protocol and CIDR against the accepted domain.
pub fn check_rule(rule: &SecurityRule) -> std::result::Result<(), String> {
    if rule.port > u32::from(u16::MAX) {
        return Err(format!("port {} is outside 0-65535", rule.port));
    }
    if matches!(rule.protocol, Protocol::Icmp | Protocol::All) && rule.port != 0 {
        return Err(format!("{} rules do not take a port (got {})", rule.protocol, rule.port));
    }
    check_cidr(&rule.source_cidr)
}

fn check_cidr(cidr: &str) -> std::result::Result<(), String> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| format!("'{}' is not in ADDR/PREFIX form", cidr))?;
    addr.parse::<Ipv4Addr>()
        .map_err(|_| format!("'{}' is not an IPv4 address", addr))?;
    match prefix.parse::<u8>() {
        Ok(p) if p <= 32 => Ok(()),
        _ => Err(format!("'{}' is not a valid prefix length", prefix)),
    }
}
