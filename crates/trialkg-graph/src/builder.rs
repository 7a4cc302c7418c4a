//! Background knowledge graph construction.
//!
//! The builder runs once during process initialization. It loads every
//! configured source, expands hierarchical relations, applies merge edges to
//! the canonical resolver and assigns (or loads) compact kg ids. The result,
//! [`BackgroundKg`], is immutable and meant to be shared via `Arc` by every
//! request handler.
//!
//! Building twice from the same inputs yields the same graph: sources load in
//! configuration order, and hierarchy expansion walks nodes in index order.

use rayon::prelude::*;
use roaring::RoaringBitmap;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use crate::error::KgResult;
use crate::graph::{KnowledgeGraph, NodeIx};
use crate::resolver::{CanonicalResolver, CompactIdTable, FrozenResolver};
use crate::sources::{
    mesh_parent_child_pairs, read_compact_table, read_edge_dump, read_mesh_tree, EdgeRecord,
    KgSourcesConfig, MESH_CHILD_RELATION, MESH_TREE_PROVENANCE,
};

pub const INFERRED_ATTR: &str = "inferred";
pub const DEPTH_ATTR: &str = "depth";

/// Counters reported after a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    pub nodes: usize,
    pub edges: usize,
    pub source_edges: usize,
    pub hierarchy_edges: usize,
    pub inferred_edges: usize,
    pub merge_edges: usize,
    pub classes: usize,
    pub compact_ids: usize,
}

/// The built, read-only background graph plus its entity resolution.
#[derive(Debug)]
pub struct BackgroundKg {
    graph: KnowledgeGraph,
    resolver: FrozenResolver,
    compact_ids: CompactIdTable,
    stats: BuildStats,
}

impl BackgroundKg {
    /// Assemble from parts already built elsewhere (tests, custom loaders).
    /// Every graph node is registered with the resolver before freezing.
    pub fn from_parts(
        graph: KnowledgeGraph,
        mut resolver: CanonicalResolver,
        compact_ids: Option<CompactIdTable>,
    ) -> Self {
        for id in graph.entity_ids() {
            resolver.insert(id);
        }
        let resolver = resolver.freeze();
        let compact_ids = compact_ids.unwrap_or_else(|| CompactIdTable::assign(&resolver));
        let stats = BuildStats {
            nodes: graph.node_count(),
            edges: graph.edge_count(),
            source_edges: graph.edge_count(),
            classes: resolver.class_count(),
            compact_ids: compact_ids.len(),
            ..BuildStats::default()
        };
        Self {
            graph,
            resolver,
            compact_ids,
            stats,
        }
    }

    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    pub fn resolver(&self) -> &FrozenResolver {
        &self.resolver
    }

    pub fn compact_ids(&self) -> &CompactIdTable {
        &self.compact_ids
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    pub fn resolve_to_compact_id(&self, entity: &str) -> KgResult<u32> {
        self.resolver
            .resolve_to_compact_id(&self.compact_ids, entity)
    }
}

pub struct KnowledgeGraphBuilder {
    config: KgSourcesConfig,
}

impl KnowledgeGraphBuilder {
    pub fn new(config: KgSourcesConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &KgSourcesConfig {
        &self.config
    }

    /// Build and wrap in a shared handle.
    pub fn build_shared(&self) -> KgResult<Arc<BackgroundKg>> {
        self.build().map(Arc::new)
    }

    pub fn build(&self) -> KgResult<BackgroundKg> {
        let started = Instant::now();
        let mut stats = BuildStats::default();
        let mut graph = KnowledgeGraph::new();

        // Dumps are independent; read them in parallel, insert in config order.
        // Every read finishes before the first failure in config order is
        // reported, so the error does not depend on scheduling.
        let reads: Vec<KgResult<Vec<EdgeRecord>>> = self
            .config
            .edge_files
            .par_iter()
            .map(|p| read_edge_dump(&self.config.resolve(p)))
            .collect();
        let dumps = reads.into_iter().collect::<KgResult<Vec<_>>>()?;
        for (path, records) in self.config.edge_files.iter().zip(&dumps) {
            tracing::debug!(path = %path.display(), edges = records.len(), "loaded edge dump");
            for r in records {
                let attrs: Vec<(&str, &str)> = r
                    .attrs
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                graph.add_edge(
                    &r.source,
                    &r.target,
                    &r.relation,
                    r.provenance.as_deref().unwrap_or_default(),
                    &attrs,
                );
            }
            stats.source_edges += records.len();
        }

        if let Some(tree_path) = &self.config.mesh_tree {
            let entries = read_mesh_tree(&self.config.resolve(tree_path))?;
            for (parent, child) in mesh_parent_child_pairs(&entries) {
                let (u, v) = (graph.add_node(&parent), graph.add_node(&child));
                if graph.has_edge(u, v, MESH_CHILD_RELATION) {
                    continue;
                }
                graph.add_edge(&parent, &child, MESH_CHILD_RELATION, MESH_TREE_PROVENANCE, &[]);
                stats.hierarchy_edges += 1;
            }
        }

        for relation in &self.config.transitive_relations {
            stats.inferred_edges +=
                expand_transitive(&mut graph, relation, self.config.max_hierarchy_depth);
        }

        let mut resolver = CanonicalResolver::new();
        for id in graph.entity_ids() {
            resolver.insert(id);
        }
        for edge in graph.edges() {
            let relation = graph.lookup(edge.relation);
            if !self.config.is_merge_relation(relation) {
                continue;
            }
            let (Some(u), Some(v)) = (graph.entity_id(edge.source), graph.entity_id(edge.target))
            else {
                continue;
            };
            resolver.union(u, v);
            stats.merge_edges += 1;
        }
        let resolver = resolver.freeze();

        let compact_ids = match &self.config.compact_ids {
            Some(path) => {
                let table = read_compact_table(&self.config.resolve(path))?;
                CompactIdTable::from_entity_table(&resolver, &table)?
            }
            None => CompactIdTable::assign(&resolver),
        };

        stats.nodes = graph.node_count();
        stats.edges = graph.edge_count();
        stats.classes = resolver.class_count();
        stats.compact_ids = compact_ids.len();
        if stats.compact_ids < stats.classes {
            tracing::warn!(
                classes = stats.classes,
                compact_ids = stats.compact_ids,
                "compact id table does not cover every entity class"
            );
        }

        tracing::info!(
            nodes = stats.nodes,
            edges = stats.edges,
            merges = stats.merge_edges,
            classes = stats.classes,
            inferred = stats.inferred_edges,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "background knowledge graph built"
        );

        Ok(BackgroundKg {
            graph,
            resolver,
            compact_ids,
            stats,
        })
    }
}

/// Add `ancestor -[relation]-> descendant` for every descendant reachable in
/// two or more hops (up to `max_depth`) over the direct `relation` edges.
/// Returns the number of edges added.
fn expand_transitive(graph: &mut KnowledgeGraph, relation: &str, max_depth: usize) -> usize {
    let Some(rel) = graph.relation_id(relation) else {
        return 0;
    };

    let mut children: BTreeMap<NodeIx, Vec<NodeIx>> = BTreeMap::new();
    for edge in graph.edges() {
        if edge.relation == rel && edge.source != edge.target {
            let kids = children.entry(edge.source).or_default();
            if !kids.contains(&edge.target) {
                kids.push(edge.target);
            }
        }
    }

    let mut additions: Vec<(NodeIx, NodeIx, usize)> = Vec::new();
    for (&root, direct) in &children {
        let mut visited = RoaringBitmap::new();
        visited.insert(root);
        let mut queue: VecDeque<(NodeIx, usize)> = VecDeque::new();
        for &kid in direct {
            if visited.insert(kid) {
                queue.push_back((kid, 1));
            }
        }
        while let Some((node, depth)) = queue.pop_front() {
            if depth >= 2 && !graph.has_edge(root, node, relation) {
                additions.push((root, node, depth));
            }
            if depth >= max_depth {
                continue;
            }
            if let Some(kids) = children.get(&node) {
                for &kid in kids {
                    if visited.insert(kid) {
                        queue.push_back((kid, depth + 1));
                    }
                }
            }
        }
    }

    let added = additions.len();
    for (u, v, depth) in additions {
        let (Some(source), Some(target)) = (graph.entity_id(u), graph.entity_id(v)) else {
            continue;
        };
        let (source, target) = (source.to_string(), target.to_string());
        let depth = depth.to_string();
        graph.add_edge(
            &source,
            &target,
            relation,
            "hierarchy-expansion",
            &[(INFERRED_ATTR, "transitive"), (DEPTH_ATTR, depth.as_str())],
        );
    }
    if added > 0 {
        tracing::debug!(relation, added, "expanded hierarchy transitively");
    }
    added
}
