// Graph ownership: nodes and edges are mutated only through these operations,
// which keep every edge endpoint pointing at an existing node.

use crate::types::{Edge, Node, NodeId};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A directed workflow graph.
///
/// Node-list order and edge-declaration order are significant: entry
/// selection and fan-out both follow them, so both collections are kept as
/// ordered vectors. The graph round-trips through plain JSON
/// `{"nodes": [...], "edges": [...]}` for save/load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Edges leaving `id`, in declaration order.
    pub fn outgoing<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| &e.source == id)
    }

    /// Edges arriving at `id`, in declaration order.
    pub fn incoming<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| &e.target == id)
    }

    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if self.node(&node.id).is_some() {
            bail!("node {} already exists", node.id);
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Update a node's label and/or merge keys into its config.
    pub fn update_node(
        &mut self,
        id: &NodeId,
        label: Option<String>,
        config: Option<Map<String, Value>>,
    ) -> Result<()> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| &n.id == id)
            .ok_or_else(|| anyhow::anyhow!("node {id} not found"))?;

        if let Some(label) = label {
            node.label = label;
        }
        if let Some(config) = config {
            for (key, value) in config {
                node.config.insert(key, value);
            }
        }
        Ok(())
    }

    /// Remove a node and every edge that references it.
    pub fn remove_node(&mut self, id: &NodeId) -> Result<()> {
        let before = self.nodes.len();
        self.nodes.retain(|n| &n.id != id);
        if self.nodes.len() == before {
            bail!("node {id} not found");
        }
        self.edges.retain(|e| &e.source != id && &e.target != id);
        Ok(())
    }

    /// Add an edge. Both endpoints must reference existing nodes.
    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        if self.node(&edge.source).is_none() {
            bail!("edge {} references unknown source node {}", edge.id, edge.source);
        }
        if self.node(&edge.target).is_none() {
            bail!("edge {} references unknown target node {}", edge.id, edge.target);
        }
        if self.edges.iter().any(|e| e.id == edge.id) {
            bail!("edge {} already exists", edge.id);
        }
        self.edges.push(edge);
        Ok(())
    }

    pub fn remove_edge(&mut self, id: &str) -> Result<()> {
        let before = self.edges.len();
        self.edges.retain(|e| e.id != id);
        if self.edges.len() == before {
            bail!("edge {id} not found");
        }
        Ok(())
    }

    /// Check the invariants that the mutation operations maintain. Useful for
    /// graphs deserialized from the interchange format, which bypass them.
    pub fn validate(&self) -> Result<()> {
        for (i, node) in self.nodes.iter().enumerate() {
            if self.nodes[..i].iter().any(|n| n.id == node.id) {
                bail!("duplicate node id {}", node.id);
            }
        }
        for edge in &self.edges {
            if self.node(&edge.source).is_none() {
                bail!("edge {} references unknown source node {}", edge.id, edge.source);
            }
            if self.node(&edge.target).is_none() {
                bail!("edge {} references unknown target node {}", edge.id, edge.target);
            }
        }
        Ok(())
    }
}
