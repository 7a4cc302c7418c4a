//! Drug and disease id matching.
//!
//! The attachment step only needs "ids per intervention" and "ids per
//! trial"; where they come from is a collaborator concern behind
//! [`DrugMatcher`] / [`DiseaseMatcher`]. [`Lexicon`] is the file-backed
//! implementation: a JSON object mapping surface terms to entity ids,
//! matched case-insensitively on whole terms.

use ahash::AHashMap;
use std::path::Path;

use crate::error::{IngestError, IngestResult};
use crate::trial::{Intervention, Trial};

pub trait DrugMatcher: Send + Sync {
    /// Drug ids for one intervention, most relevant first.
    fn match_intervention(&self, intervention: &Intervention) -> Vec<String>;
}

pub trait DiseaseMatcher: Send + Sync {
    /// Disease (MeSH) ids for a trial's conditions.
    fn match_conditions(&self, trial: &Trial) -> Vec<String>;
}

fn push_unique(out: &mut Vec<String>, ids: &[String]) {
    for id in ids {
        if !out.contains(id) {
            out.push(id.clone());
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    terms: AHashMap<String, Vec<String>>,
}

impl Lexicon {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(term: &str) -> String {
        term.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    pub fn insert(&mut self, term: &str, id: impl Into<String>) {
        let id = id.into();
        let ids = self.terms.entry(Self::normalize(term)).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    /// Parse `{"term": ["id", ...]}` (a single string id is accepted too).
    pub fn from_json(text: &str) -> IngestResult<Self> {
        let raw: AHashMap<String, serde_json::Value> = serde_json::from_str(text)?;
        let mut lexicon = Self::new();
        for (term, ids) in raw {
            match ids {
                serde_json::Value::String(id) => lexicon.insert(&term, id),
                serde_json::Value::Array(items) => items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .for_each(|id| lexicon.insert(&term, id)),
                _ => tracing::warn!(term = %term, "lexicon entry is neither an id nor a list"),
            }
        }
        Ok(lexicon)
    }

    pub fn load(path: &Path) -> IngestResult<Self> {
        let text = std::fs::read_to_string(path).map_err(IngestError::io(path))?;
        let lexicon = Self::from_json(&text)?;
        tracing::info!(path = %path.display(), terms = lexicon.len(), "loaded lexicon");
        Ok(lexicon)
    }

    pub fn lookup(&self, term: &str) -> &[String] {
        self.terms
            .get(&Self::normalize(term))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl DrugMatcher for Lexicon {
    fn match_intervention(&self, intervention: &Intervention) -> Vec<String> {
        let mut out = Vec::new();
        push_unique(&mut out, self.lookup(&intervention.intervention_name));
        for other in &intervention.other_name {
            push_unique(&mut out, self.lookup(other));
        }
        out
    }
}

impl DiseaseMatcher for Lexicon {
    /// Registry condition MeSH ids are taken as-is; condition strings and
    /// MeSH terms go through the lexicon.
    fn match_conditions(&self, trial: &Trial) -> Vec<String> {
        let mut out = Vec::new();
        for mesh in &trial.condition_mesh_terms {
            if !mesh.id.is_empty() && !out.contains(&mesh.id) {
                out.push(mesh.id.clone());
            }
            push_unique(&mut out, self.lookup(&mesh.term));
        }
        for condition in &trial.condition {
            push_unique(&mut out, self.lookup(condition));
        }
        out
    }
}

/// Fill `drug_ids` on every intervention.
pub fn annotate_drugs(matcher: &dyn DrugMatcher, trial: &mut Trial) {
    for intervention in &mut trial.intervention {
        intervention.drug_ids = matcher.match_intervention(intervention);
    }
}

/// Fill the trial's `mesh_ids`.
pub fn annotate_diseases(matcher: &dyn DiseaseMatcher, trial: &mut Trial) {
    trial.mesh_ids = matcher.match_conditions(trial);
}
