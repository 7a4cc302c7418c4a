//! trialkg-graph: the shared background knowledge graph.
//!
//! Layers, leaf-first:
//! 1. **Canonical entity resolution** (`resolver`): an arena-indexed
//!    disjoint-set over ontology ids, plus the compact `kg_id` table.
//! 2. **Background graph** (`graph`): an interned directed multigraph whose
//!    edges carry a relation tag, provenance and attributes.
//! 3. **Builder** (`builder`, `sources`): loads drug/disease/concept dumps,
//!    expands hierarchies, applies merge edges. Runs once per process.
//! 4. **Overlay** (`overlay`): request-scoped nodes and edges layered over the
//!    background graph without mutating it.

pub mod builder;
pub mod error;
pub mod graph;
pub mod overlay;
pub mod resolver;
pub mod sources;

use ahash::AHashMap;

pub use builder::{BackgroundKg, BuildStats, KnowledgeGraphBuilder};
pub use error::{KgError, KgResult};
pub use graph::{Edge, EdgeRef, KnowledgeGraph, NodeIx};
pub use overlay::{EdgeMeta, GraphOverlay, OverlayEdge, OverlayNodeId};
pub use resolver::{CanonicalResolver, CompactIdTable, FrozenResolver};
pub use sources::{EdgeRecord, KgSourcesConfig};

// ============================================================================
// String Interning
// ============================================================================

/// Interned string ID (relation tags, provenance, attribute keys/values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct StrId(u32);

impl StrId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Build-time string interner. The graph is immutable once built, so plain
/// maps are enough here.
#[derive(Debug, Default)]
pub struct StringInterner {
    str_to_id: AHashMap<String, StrId>,
    id_to_str: Vec<String>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> StrId {
        if let Some(&id) = self.str_to_id.get(s) {
            return id;
        }
        let id = StrId(self.id_to_str.len() as u32);
        self.str_to_id.insert(s.to_string(), id);
        self.id_to_str.push(s.to_string());
        id
    }

    /// Look up an existing ID for a string without inserting.
    pub fn id_of(&self, s: &str) -> Option<StrId> {
        self.str_to_id.get(s).copied()
    }

    pub fn lookup(&self, id: StrId) -> Option<&str> {
        self.id_to_str.get(id.0 as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.id_to_str.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_str.is_empty()
    }
}
