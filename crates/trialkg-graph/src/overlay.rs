//! Request-scoped overlay on top of the background graph.
//!
//! An overlay holds nodes that are not part of the canonical entity space
//! (one per trial arm) and edges from them into background entities. It only
//! ever borrows the background graph immutably, so any number of overlays can
//! be built concurrently against one shared [`KnowledgeGraph`].

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{KgError, KgResult};
use crate::graph::{KnowledgeGraph, NodeIx};

/// Index of a node within one overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayNodeId(u32);

impl OverlayNodeId {
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Metadata carried by an overlay edge. Serialized as a flat map with the
/// relation and provenance alongside the context attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeMeta {
    pub relation: String,
    pub provenance: String,
    #[serde(flatten)]
    pub attrs: BTreeMap<String, String>,
}

impl EdgeMeta {
    pub fn new(relation: impl Into<String>, provenance: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            provenance: provenance.into(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayEdge {
    pub target: NodeIx,
    pub key: u32,
    pub meta: EdgeMeta,
}

#[derive(Debug, Clone, Default)]
struct OverlayNode {
    key: String,
    neighbors: Vec<NodeIx>,
    parallel: AHashMap<NodeIx, Vec<OverlayEdge>>,
}

pub struct GraphOverlay<'g> {
    base: &'g KnowledgeGraph,
    nodes: Vec<OverlayNode>,
    by_key: AHashMap<String, OverlayNodeId>,
    edge_count: usize,
}

impl<'g> GraphOverlay<'g> {
    pub fn new(base: &'g KnowledgeGraph) -> Self {
        Self {
            base,
            nodes: Vec::new(),
            by_key: AHashMap::new(),
            edge_count: 0,
        }
    }

    pub fn base(&self) -> &'g KnowledgeGraph {
        self.base
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Add an overlay node. Re-adding an existing key returns the same node;
    /// a key that names a background entity is rejected.
    pub fn add_node(&mut self, key: &str) -> KgResult<OverlayNodeId> {
        if let Some(&id) = self.by_key.get(key) {
            return Ok(id);
        }
        if self.base.contains(key) {
            return Err(KgError::OverlayKeyCollision(key.to_string()));
        }
        let id = OverlayNodeId(self.nodes.len() as u32);
        self.nodes.push(OverlayNode {
            key: key.to_string(),
            ..OverlayNode::default()
        });
        self.by_key.insert(key.to_string(), id);
        Ok(id)
    }

    pub fn node_key(&self, node: OverlayNodeId) -> Option<&str> {
        self.nodes.get(node.0 as usize).map(|n| n.key.as_str())
    }

    pub fn node_by_key(&self, key: &str) -> Option<OverlayNodeId> {
        self.by_key.get(key).copied()
    }

    /// Add `node -> target` where `target` is a background entity id.
    /// Returns the edge key, or `None` when `target` is not in the background
    /// graph (nothing is added in that case).
    pub fn add_edge(&mut self, node: OverlayNodeId, target: &str, meta: EdgeMeta) -> Option<u32> {
        let target = self.base.node(target)?;
        let overlay_node = self.nodes.get_mut(node.0 as usize)?;
        let group = overlay_node.parallel.entry(target).or_default();
        if group.is_empty() {
            overlay_node.neighbors.push(target);
        }
        let key = group.len() as u32;
        group.push(OverlayEdge { target, key, meta });
        self.edge_count += 1;
        Some(key)
    }

    /// Out-edges of an overlay node in native order: neighbors by first
    /// insertion, parallel edges by key.
    pub fn edges_from(&self, node: OverlayNodeId) -> impl Iterator<Item = &OverlayEdge> + '_ {
        self.nodes
            .get(node.0 as usize)
            .into_iter()
            .flat_map(|n| {
                n.neighbors
                    .iter()
                    .filter_map(move |v| n.parallel.get(v))
                    .flatten()
            })
    }

    /// Background entity id of an edge's target.
    pub fn target_id(&self, edge: &OverlayEdge) -> &'g str {
        self.base.entity_id(edge.target).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> KnowledgeGraph {
        let mut g = KnowledgeGraph::new();
        g.add_edge("DB001", "D001", "treats", "drugbank", &[]);
        g.add_edge("D002", "D001", "mesh-child", "mesh-tree", &[]);
        g
    }

    #[test]
    fn overlay_edges_are_keyed_per_target() {
        let g = base();
        let mut overlay = GraphOverlay::new(&g);
        let arm = overlay.add_node("NCT1::arm::0").unwrap();
        assert_eq!(overlay.add_edge(arm, "DB001", EdgeMeta::new("arm-drug", "t")), Some(0));
        assert_eq!(overlay.add_edge(arm, "D001", EdgeMeta::new("arm-condition", "t")), Some(0));
        assert_eq!(overlay.add_edge(arm, "DB001", EdgeMeta::new("arm-medication", "t")), Some(1));
        assert_eq!(overlay.add_edge(arm, "missing", EdgeMeta::new("arm-drug", "t")), None);

        let seen: Vec<(&str, &str, u32)> = overlay
            .edges_from(arm)
            .map(|e| (overlay.target_id(e), e.meta.relation.as_str(), e.key))
            .collect();
        assert_eq!(
            seen,
            vec![
                ("DB001", "arm-drug", 0),
                ("DB001", "arm-medication", 1),
                ("D001", "arm-condition", 0)
            ]
        );
        assert_eq!(overlay.edge_count(), 3);
    }

    #[test]
    fn overlay_leaves_base_untouched() {
        let g = base();
        let (nodes, edges) = (g.node_count(), g.edge_count());
        {
            let mut a = GraphOverlay::new(&g);
            let mut b = GraphOverlay::new(&g);
            let na = a.add_node("NCT1::arm::0").unwrap();
            let nb = b.add_node("NCT2::arm::0").unwrap();
            a.add_edge(na, "D001", EdgeMeta::new("arm-condition", "t"));
            b.add_edge(nb, "D002", EdgeMeta::new("arm-condition", "t"));
            assert!(a.node_by_key("NCT2::arm::0").is_none());
            assert!(b.node_by_key("NCT1::arm::0").is_none());
        }
        assert_eq!((g.node_count(), g.edge_count()), (nodes, edges));
    }

    #[test]
    fn overlay_key_cannot_shadow_background_entity() {
        let g = base();
        let mut overlay = GraphOverlay::new(&g);
        assert!(matches!(
            overlay.add_node("D001"),
            Err(KgError::OverlayKeyCollision(_))
        ));
    }

    #[test]
    fn edge_meta_serializes_flat() {
        let meta = EdgeMeta::new("arm-intervention-drug", "drug-matcher")
            .with_attr("intervention", "Rosuvastatin");
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["relation"], "arm-intervention-drug");
        assert_eq!(json["intervention"], "Rosuvastatin");
    }
}
