//! Background knowledge graph: a directed multigraph over entity ids.
//!
//! Storage mirrors a multi-edge adjacency map:
//! - every entity id is interned to a dense [`NodeIx`];
//! - every edge lives in one `Vec<Edge>` and is addressed by its edge id;
//! - per source node, out-neighbors are kept in first-insertion order, and the
//!   parallel edges between one `(source, target)` pair are kept in insertion
//!   order. An edge's *key* is its position within that parallel group.
//!
//! Iterating `out_edges(u)` walks neighbors in first-insertion order and, per
//! neighbor, parallel edges by key. That order is stable for unchanged inputs.

use ahash::AHashMap;
use std::collections::BTreeMap;

use crate::{StrId, StringInterner};

/// Dense node index into the background graph.
pub type NodeIx = u32;

/// A stored edge. Relation tag, provenance and attributes are interned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub source: NodeIx,
    pub target: NodeIx,
    pub relation: StrId,
    pub provenance: StrId,
    pub key: u32,
    pub attrs: Vec<(StrId, StrId)>,
}

/// Edge with its strings resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRef<'g> {
    pub source: &'g str,
    pub target: &'g str,
    pub relation: &'g str,
    pub provenance: &'g str,
    pub key: u32,
    pub attrs: BTreeMap<&'g str, &'g str>,
}

#[derive(Debug, Default)]
pub struct KnowledgeGraph {
    interner: StringInterner,
    node_ids: Vec<String>,
    node_index: AHashMap<String, NodeIx>,
    edges: Vec<Edge>,
    /// source -> out-neighbors in first-insertion order
    neighbors: Vec<Vec<NodeIx>>,
    /// (source, target) -> edge ids, position == edge key
    parallel: AHashMap<(NodeIx, NodeIx), Vec<u32>>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.node_ids.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Add `id` as a node if absent.
    pub fn add_node(&mut self, id: &str) -> NodeIx {
        if let Some(&ix) = self.node_index.get(id) {
            return ix;
        }
        let ix = self.node_ids.len() as NodeIx;
        self.node_index.insert(id.to_string(), ix);
        self.node_ids.push(id.to_string());
        self.neighbors.push(Vec::new());
        ix
    }

    pub fn node(&self, id: &str) -> Option<NodeIx> {
        self.node_index.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_index.contains_key(id)
    }

    pub fn entity_id(&self, node: NodeIx) -> Option<&str> {
        self.node_ids.get(node as usize).map(String::as_str)
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = &str> {
        self.node_ids.iter().map(String::as_str)
    }

    /// Add an edge `source -[relation]-> target`, creating missing endpoints.
    /// Returns the new edge's id.
    pub fn add_edge(
        &mut self,
        source: &str,
        target: &str,
        relation: &str,
        provenance: &str,
        attrs: &[(&str, &str)],
    ) -> u32 {
        let u = self.add_node(source);
        let v = self.add_node(target);
        let relation = self.interner.intern(relation);
        let provenance = self.interner.intern(provenance);
        let attrs = attrs
            .iter()
            .map(|(k, val)| (self.interner.intern(k), self.interner.intern(val)))
            .collect();
        self.push_edge(u, v, relation, provenance, attrs)
    }

    fn push_edge(
        &mut self,
        u: NodeIx,
        v: NodeIx,
        relation: StrId,
        provenance: StrId,
        attrs: Vec<(StrId, StrId)>,
    ) -> u32 {
        let edge_id = self.edges.len() as u32;
        let group = self.parallel.entry((u, v)).or_default();
        if group.is_empty() {
            self.neighbors[u as usize].push(v);
        }
        let key = group.len() as u32;
        group.push(edge_id);
        self.edges.push(Edge {
            source: u,
            target: v,
            relation,
            provenance,
            key,
            attrs,
        });
        edge_id
    }

    pub fn edge(&self, edge_id: u32) -> Option<&Edge> {
        self.edges.get(edge_id as usize)
    }

    /// All edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    /// Out-edges of `source` in native iteration order.
    pub fn out_edges(&self, source: NodeIx) -> impl Iterator<Item = &Edge> + '_ {
        self.neighbors
            .get(source as usize)
            .into_iter()
            .flatten()
            .flat_map(move |&v| {
                self.parallel
                    .get(&(source, v))
                    .into_iter()
                    .flatten()
                    .map(|&id| &self.edges[id as usize])
            })
    }

    /// Whether some edge `source -[relation]-> target` exists.
    pub fn has_edge(&self, source: NodeIx, target: NodeIx, relation: &str) -> bool {
        let Some(relation) = self.interner.id_of(relation) else {
            return false;
        };
        self.parallel
            .get(&(source, target))
            .map(|ids| {
                ids.iter()
                    .any(|&id| self.edges[id as usize].relation == relation)
            })
            .unwrap_or(false)
    }

    pub fn relation_id(&self, relation: &str) -> Option<StrId> {
        self.interner.id_of(relation)
    }

    pub fn relation_count(&self, relation: &str) -> usize {
        match self.interner.id_of(relation) {
            Some(rel) => self.edges.iter().filter(|e| e.relation == rel).count(),
            None => 0,
        }
    }

    pub fn lookup(&self, id: StrId) -> &str {
        self.interner.lookup(id).unwrap_or_default()
    }

    /// Resolve an edge's interned strings.
    pub fn edge_ref<'g>(&'g self, edge: &'g Edge) -> EdgeRef<'g> {
        EdgeRef {
            source: self.entity_id(edge.source).unwrap_or_default(),
            target: self.entity_id(edge.target).unwrap_or_default(),
            relation: self.lookup(edge.relation),
            provenance: self.lookup(edge.provenance),
            key: edge.key,
            attrs: edge
                .attrs
                .iter()
                .map(|&(k, v)| (self.lookup(k), self.lookup(v)))
                .collect(),
        }
    }
}
