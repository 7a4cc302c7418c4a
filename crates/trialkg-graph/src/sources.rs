//! On-disk ontology/drug/disease dumps consumed by the graph builder.
//!
//! Formats:
//! - **edge dumps** (`*.jsonl`): one JSON object per line,
//!   `{"source": .., "target": .., "relation": .., "provenance": .., "attrs": {..}}`.
//!   `provenance` defaults to the file stem, `attrs` to empty. Blank lines and
//!   lines starting with `#` are skipped.
//! - **MeSH tree** (`*.tsv`): `descriptor_id<TAB>tree_number` per line, e.g.
//!   `D003924\tC18.452.394.750.149`.
//! - **compact id table** (`*.json`): one JSON object `{"entity": kg_id, ..}`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{KgError, KgResult};

pub const DEFAULT_MERGE_RELATION: &str = "KG-MERGE-SAME";
pub const MESH_CHILD_RELATION: &str = "mesh-child";
pub const MESH_TREE_PROVENANCE: &str = "mesh-tree";

fn default_merge_relations() -> Vec<String> {
    vec![DEFAULT_MERGE_RELATION.to_string()]
}

fn default_transitive_relations() -> Vec<String> {
    vec![MESH_CHILD_RELATION.to_string()]
}

fn default_max_hierarchy_depth() -> usize {
    16
}

/// Where the background graph's inputs live and how they are interpreted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KgSourcesConfig {
    /// Base directory; relative paths below resolve against it.
    #[serde(default)]
    pub data_dir: PathBuf,
    /// Edge dumps, loaded in this order.
    #[serde(default)]
    pub edge_files: Vec<PathBuf>,
    /// MeSH descriptor tree numbers (disease taxonomy).
    #[serde(default)]
    pub mesh_tree: Option<PathBuf>,
    /// Precomputed `entity -> kg_id` table. When absent, ids are assigned.
    #[serde(default)]
    pub compact_ids: Option<PathBuf>,
    /// Relation tags that assert cross-source identity.
    #[serde(default = "default_merge_relations")]
    pub merge_relations: Vec<String>,
    /// Hierarchical relation tags (edges point broader -> narrower) that are
    /// expanded transitively.
    #[serde(default = "default_transitive_relations")]
    pub transitive_relations: Vec<String>,
    #[serde(default = "default_max_hierarchy_depth")]
    pub max_hierarchy_depth: usize,
}

impl Default for KgSourcesConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::new(),
            edge_files: Vec::new(),
            mesh_tree: None,
            compact_ids: None,
            merge_relations: default_merge_relations(),
            transitive_relations: default_transitive_relations(),
            max_hierarchy_depth: default_max_hierarchy_depth(),
        }
    }
}

impl KgSourcesConfig {
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    pub fn is_merge_relation(&self, relation: &str) -> bool {
        self.merge_relations.iter().any(|r| r == relation)
    }
}

/// One line of an edge dump.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EdgeRecord {
    pub source: String,
    pub target: String,
    pub relation: String,
    #[serde(default)]
    pub provenance: Option<String>,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
}

fn open(path: &Path) -> KgResult<File> {
    if !path.exists() {
        return Err(KgError::DataSourceMissing {
            path: path.to_path_buf(),
        });
    }
    File::open(path).map_err(|source| KgError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> KgError + '_ {
    move |source| KgError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Read an edge dump; records without provenance get the file stem.
pub fn read_edge_dump(path: &Path) -> KgResult<Vec<EdgeRecord>> {
    let reader = BufReader::new(open(path)?);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut out = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line.map_err(io_err(path))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut record: EdgeRecord =
            serde_json::from_str(trimmed).map_err(|e| KgError::Parse {
                path: path.to_path_buf(),
                line: n + 1,
                message: e.to_string(),
            })?;
        if record.provenance.is_none() {
            record.provenance = Some(stem.clone());
        }
        out.push(record);
    }
    Ok(out)
}

/// Read `(descriptor_id, tree_number)` pairs.
pub fn read_mesh_tree(path: &Path) -> KgResult<Vec<(String, String)>> {
    let reader = BufReader::new(open(path)?);
    let mut out = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line.map_err(io_err(path))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut cols = trimmed.split('\t');
        match (cols.next(), cols.next()) {
            (Some(id), Some(tree)) if !id.is_empty() && !tree.trim().is_empty() => {
                out.push((id.to_string(), tree.trim().to_string()));
            }
            _ => {
                return Err(KgError::Parse {
                    path: path.to_path_buf(),
                    line: n + 1,
                    message: "expected `descriptor_id<TAB>tree_number`".to_string(),
                })
            }
        }
    }
    Ok(out)
}

/// Parent tree number, e.g. `C18.452.394` -> `C18.452`. Top-level numbers
/// have no parent.
pub fn parent_tree_number(tree_number: &str) -> Option<&str> {
    tree_number.rsplit_once('.').map(|(parent, _)| parent)
}

/// Direct `(parent_descriptor, child_descriptor)` pairs implied by a MeSH
/// tree, deduplicated, in first-seen order.
pub fn mesh_parent_child_pairs(entries: &[(String, String)]) -> Vec<(String, String)> {
    let by_tree: HashMap<&str, &str> = entries
        .iter()
        .map(|(id, tree)| (tree.as_str(), id.as_str()))
        .collect();

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for (child, tree) in entries {
        let Some(parent_tree) = parent_tree_number(tree) else {
            continue;
        };
        let Some(&parent) = by_tree.get(parent_tree) else {
            continue;
        };
        if parent == child {
            continue;
        }
        if seen.insert((parent, child.as_str())) {
            out.push((parent.to_string(), child.clone()));
        }
    }
    out
}

pub fn read_compact_table(path: &Path) -> KgResult<HashMap<String, u32>> {
    let reader = BufReader::new(open(path)?);
    serde_json::from_reader(reader).map_err(|e| KgError::Parse {
        path: path.to_path_buf(),
        line: e.line(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn edge_dump_defaults_provenance_to_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drugbank.jsonl");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "# comment").unwrap();
        writeln!(
            f,
            r#"{{"source":"DB00945","target":"MESH:D010146","relation":"treats"}}"#
        )
        .unwrap();
        writeln!(f).unwrap();
        writeln!(
            f,
            r#"{{"source":"DB00945","target":"UMLS:C0004057","relation":"KG-MERGE-SAME","provenance":"umls-xref","attrs":{{"via":"RXNORM"}}}}"#
        )
        .unwrap();

        let records = read_edge_dump(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].provenance.as_deref(), Some("drugbank"));
        assert_eq!(records[1].provenance.as_deref(), Some("umls-xref"));
        assert_eq!(records[1].attrs.get("via").map(String::as_str), Some("RXNORM"));
    }

    #[test]
    fn malformed_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"source\":\"a\",\"target\":\"b\",\"relation\":\"r\"}\nnot json\n").unwrap();
        let err = read_edge_dump(&path).unwrap_err();
        assert!(matches!(err, KgError::Parse { line: 2, .. }));
    }

    #[test]
    fn missing_source_is_data_source_missing() {
        let err = read_edge_dump(Path::new("/definitely/not/here.jsonl")).unwrap_err();
        assert!(matches!(err, KgError::DataSourceMissing { .. }));
    }

    #[test]
    fn mesh_tree_yields_direct_parent_child_pairs() {
        let entries = vec![
            ("D004066".to_string(), "C06".to_string()),
            ("D008107".to_string(), "C06.552".to_string()),
            ("D006505".to_string(), "C06.552.380".to_string()),
            // Second tree position for the same descriptor under the same parent.
            ("D006505".to_string(), "C06.552.381".to_string()),
            ("D999999".to_string(), "Z99.001".to_string()),
        ];
        let pairs = mesh_parent_child_pairs(&entries);
        assert_eq!(
            pairs,
            vec![
                ("D004066".to_string(), "D008107".to_string()),
                ("D008107".to_string(), "D006505".to_string()),
            ]
        );
    }

    #[test]
    fn parent_tree_number_strips_last_segment() {
        assert_eq!(parent_tree_number("C18.452.394"), Some("C18.452"));
        assert_eq!(parent_tree_number("C18"), None);
    }
}
