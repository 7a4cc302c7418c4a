//! Canonical entity resolution.
//!
//! Entity ids from different ontologies (MeSH descriptors, DrugBank ids, UMLS
//! concepts, ...) are merged into equivalence classes whenever a merge edge
//! asserts they denote the same concept. The resolver is an arena-indexed
//! disjoint-set: every external id is interned to a dense `u32` once, and the
//! parent/rank arrays are addressed by that index only.
//!
//! Two phases:
//! - [`CanonicalResolver`] is the mutable form used while the background graph
//!   is being built (`union`, `find` with path compression).
//! - [`FrozenResolver`] is produced once the build completes. Every parent
//!   pointer is flattened to its root, so `find` is a single lookup on `&self`
//!   and the resolver can be shared across request handlers without locking.

use ahash::AHashMap;
use std::collections::HashMap;

use crate::error::{KgError, KgResult};

// ============================================================================
// Mutable disjoint-set
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct CanonicalResolver {
    index: AHashMap<String, u32>,
    ids: Vec<String>,
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl CanonicalResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entity ids the resolver has seen.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Register `id` as a singleton class if it has not been seen yet.
    pub fn insert(&mut self, id: &str) -> u32 {
        if let Some(&ix) = self.index.get(id) {
            return ix;
        }
        let ix = self.ids.len() as u32;
        self.index.insert(id.to_string(), ix);
        self.ids.push(id.to_string());
        self.parent.push(ix);
        self.rank.push(0);
        ix
    }

    fn find_ix(&mut self, x: u32) -> u32 {
        let mut root = x;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        let mut cur = x;
        while self.parent[cur as usize] != cur {
            let next = self.parent[cur as usize];
            self.parent[cur as usize] = root;
            cur = next;
        }
        root
    }

    /// Merge the classes of `a` and `b`. Idempotent.
    pub fn union(&mut self, a: &str, b: &str) {
        let ia = self.insert(a);
        let ib = self.insert(b);
        let ra = self.find_ix(ia);
        let rb = self.find_ix(ib);
        if ra == rb {
            return;
        }
        let (rka, rkb) = (self.rank[ra as usize], self.rank[rb as usize]);
        if rka < rkb {
            self.parent[ra as usize] = rb;
        } else if rka > rkb {
            self.parent[rb as usize] = ra;
        } else {
            self.parent[rb as usize] = ra;
            self.rank[ra as usize] = rka.saturating_add(1);
        }
    }

    /// Representative of `a`'s class. An id that was never seen is its own
    /// representative.
    pub fn find(&mut self, a: &str) -> String {
        match self.index.get(a).copied() {
            Some(ix) => {
                let root = self.find_ix(ix);
                self.ids[root as usize].clone()
            }
            None => a.to_string(),
        }
    }

    pub fn same_class(&mut self, a: &str, b: &str) -> bool {
        self.find(a) == self.find(b)
    }

    /// Look up `find(a)` in `table`.
    pub fn resolve_to_compact_id(&mut self, table: &CompactIdTable, a: &str) -> KgResult<u32> {
        let representative = self.find(a);
        table
            .get(&representative)
            .ok_or_else(|| KgError::UnknownEntity {
                entity: a.to_string(),
                representative,
            })
    }

    /// Flatten every class and hand out the read-only form.
    pub fn freeze(mut self) -> FrozenResolver {
        let root: Vec<u32> = (0..self.ids.len() as u32)
            .map(|ix| self.find_ix(ix))
            .collect();
        FrozenResolver {
            index: self.index,
            ids: self.ids,
            root,
        }
    }
}

// ============================================================================
// Read-only resolver
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct FrozenResolver {
    index: AHashMap<String, u32>,
    ids: Vec<String>,
    root: Vec<u32>,
}

impl FrozenResolver {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn find<'a>(&'a self, a: &'a str) -> &'a str {
        match self.index.get(a) {
            Some(&ix) => &self.ids[self.root[ix as usize] as usize],
            None => a,
        }
    }

    pub fn resolve_to_compact_id(&self, table: &CompactIdTable, a: &str) -> KgResult<u32> {
        let representative = self.find(a);
        table
            .get(representative)
            .ok_or_else(|| KgError::UnknownEntity {
                entity: a.to_string(),
                representative: representative.to_string(),
            })
    }

    /// Equivalence classes as sorted member lists, ordered by their smallest
    /// member. Independent of the order the unions were applied in.
    pub fn classes(&self) -> Vec<Vec<&str>> {
        let mut by_root: AHashMap<u32, Vec<&str>> = AHashMap::new();
        for (ix, id) in self.ids.iter().enumerate() {
            by_root
                .entry(self.root[ix])
                .or_default()
                .push(id.as_str());
        }
        let mut classes: Vec<Vec<&str>> = by_root
            .into_values()
            .map(|mut members| {
                members.sort_unstable();
                members
            })
            .collect();
        classes.sort_unstable_by(|a, b| a[0].cmp(b[0]));
        classes
    }

    pub fn class_count(&self) -> usize {
        self.root
            .iter()
            .enumerate()
            .filter(|(ix, root)| *ix as u32 == **root)
            .count()
    }
}

// ============================================================================
// Compact id table
// ============================================================================

/// Dense `kg_id` per class representative.
#[derive(Debug, Default, Clone)]
pub struct CompactIdTable {
    by_representative: AHashMap<String, u32>,
}

impl CompactIdTable {
    /// Assign dense ids `0..n` to every class of `resolver`, in the order of
    /// each class's smallest member id.
    pub fn assign(resolver: &FrozenResolver) -> Self {
        let mut by_representative = AHashMap::new();
        for (kg_id, class) in resolver.classes().into_iter().enumerate() {
            let representative = resolver.find(class[0]).to_string();
            by_representative.insert(representative, kg_id as u32);
        }
        Self { by_representative }
    }

    /// Normalize a precomputed `entity -> kg_id` table onto the resolver's
    /// representatives. Members of one class must agree on their id.
    ///
    /// Classes with no listed member stay unassigned and surface later as
    /// [`KgError::UnknownEntity`].
    pub fn from_entity_table(
        resolver: &FrozenResolver,
        entity_ids: &HashMap<String, u32>,
    ) -> KgResult<Self> {
        let mut entries: Vec<(&String, &u32)> = entity_ids.iter().collect();
        entries.sort_unstable();

        let mut by_representative: AHashMap<String, u32> = AHashMap::new();
        for (entity, &kg_id) in entries {
            let representative = resolver.find(entity);
            match by_representative.get(representative) {
                Some(&existing) if existing != kg_id => {
                    return Err(KgError::CompactIdConflict {
                        representative: representative.to_string(),
                        first: existing.min(kg_id),
                        second: existing.max(kg_id),
                    });
                }
                Some(_) => {}
                None => {
                    by_representative.insert(representative.to_string(), kg_id);
                }
            }
        }
        Ok(Self { by_representative })
    }

    pub fn get(&self, representative: &str) -> Option<u32> {
        self.by_representative.get(representative).copied()
    }

    pub fn len(&self) -> usize {
        self.by_representative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_representative.is_empty()
    }
}
