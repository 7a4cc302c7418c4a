//! Integration tests for the complete trialkg pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Source files → Background graph (merges, MeSH hierarchy, compact ids)
//! - Trial JSON / registry study → Attachment → Arm records
//! - One shared background graph → many concurrent overlays
//!
//! Run with: cargo test --test integration_tests

use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::tempdir;

use trialkg_features::{TrialAttachmentBuilder, TrialPipeline};
use trialkg_graph::{BackgroundKg, KgError, KgSourcesConfig, KnowledgeGraphBuilder};
use trialkg_ingest::{parse_study, Lexicon, Trial};

// ============================================================================
// Fixtures
// ============================================================================

fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn sources(dir: &Path) -> KgSourcesConfig {
    write(
        dir,
        "drugbank.jsonl",
        r#"{"source":"DB01098","target":"D009202","relation":"treats"}
{"source":"DB00758","target":"D000787","relation":"treats"}
"#,
    );
    write(
        dir,
        "xrefs.jsonl",
        r#"# cross-ontology identity
{"source":"C0027051","target":"D009202","relation":"KG-MERGE-SAME","provenance":"umls-mesh"}
{"source":"301542","target":"DB01098","relation":"KG-MERGE-SAME","provenance":"rxnorm-drugbank"}
"#,
    );
    write(
        dir,
        "mtrees.tsv",
        "D002318\tC14\nD006331\tC14.280\nD009203\tC14.280.647\nD009202\tC14.280.647.500\nD000787\tC14.280.647.187\n",
    );
    KgSourcesConfig {
        data_dir: dir.to_path_buf(),
        edge_files: vec!["drugbank.jsonl".into(), "xrefs.jsonl".into()],
        mesh_tree: Some("mtrees.tsv".into()),
        ..KgSourcesConfig::default()
    }
}

fn background() -> (tempfile::TempDir, Arc<BackgroundKg>) {
    let dir = tempdir().unwrap();
    let kg = KnowledgeGraphBuilder::new(sources(dir.path()))
        .build_shared()
        .expect("background graph builds");
    (dir, kg)
}

fn lexicon(entries: &[(&str, &str)]) -> Lexicon {
    let mut lex = Lexicon::new();
    for (term, id) in entries {
        lex.insert(term, *id);
    }
    lex
}

fn pipeline(kg: Arc<BackgroundKg>) -> TrialPipeline {
    TrialPipeline::new(kg)
        .with_drug_matcher(Box::new(lexicon(&[
            ("rosuvastatin", "DB01098"),
            ("clopidogrel", "DB00758"),
        ])))
        .with_disease_matcher(Box::new(lexicon(&[
            ("periprocedural myocardial necrosis", "C0027051"),
            ("angina pectoris", "D000787"),
        ])))
}

fn parsed_trial() -> Trial {
    Trial::from_json(
        r#"{
        "nct_id": "NCT01007279",
        "arm_group": [
            {"arm_group_label": "ROSUVASTATIN", "arm_group_type": "EXPERIMENTAL", "description": "statin load"},
            {"arm_group_label": "CLOPIDOGREL", "arm_group_type": "ACTIVE_COMPARATOR"}
        ],
        "intervention": [
            {"intervention_name": "Rosuvastatin", "intervention_type": "Drug", "description": "40 mg",
             "arm_group_label": ["Rosuvastatin"]},
            {"intervention_name": "Clopidogrel", "intervention_type": "Drug", "description": "600 mg",
             "arm_group_label": ["CLOPIDOGREL"]}
        ],
        "condition": ["Periprocedural Myocardial Necrosis"],
        "primary_outcome": [{"measure": "Myocardial enzymes arise"}],
        "brief_summary": "Statin loading before PCI.",
        "eligibility_criteria": "Stable angina.",
        "phase": ["PHASE3"],
        "enrollment": {"count": 160, "type": "ESTIMATED"},
        "gender_sex": "ALL",
        "minimum_age": "18 Years",
        "maximum_age": "80 Years"
    }"#,
    )
    .unwrap()
}

fn registry_study(nct: &str) -> serde_json::Value {
    serde_json::json!({
        "protocolSection": {
            "identificationModule": {"nctId": nct},
            "armsInterventionsModule": {
                "armGroups": [{"label": "Clopidogrel 600", "type": "EXPERIMENTAL"}],
                "interventions": [{"type": "DRUG", "name": "Clopidogrel", "armGroupLabels": ["Clopidogrel 600"]}]
            },
            "conditionsModule": {"conditions": ["Angina Pectoris"]},
            "designModule": {"phases": ["PHASE2"], "enrollmentInfo": {"count": 50, "type": "ANTICIPATED"}},
            "eligibilityModule": {"sex": "FEMALE"}
        }
    })
}

// ============================================================================
// Background graph
// ============================================================================

#[test]
fn test_background_graph_merges_and_hierarchy() {
    let (_dir, kg) = background();
    let stats = kg.stats();
    assert_eq!(stats.source_edges, 4);
    assert_eq!(stats.merge_edges, 2);
    assert!(stats.hierarchy_edges >= 4);
    assert!(stats.inferred_edges > 0);

    // Merged ids share one kg id.
    assert_eq!(
        kg.resolve_to_compact_id("C0027051").unwrap(),
        kg.resolve_to_compact_id("D009202").unwrap()
    );
    assert_ne!(
        kg.resolve_to_compact_id("D009202").unwrap(),
        kg.resolve_to_compact_id("D000787").unwrap()
    );

    // Broader concept reaches the narrow one directly after expansion.
    let g = kg.graph();
    let (root, leaf) = (g.node("D002318").unwrap(), g.node("D009202").unwrap());
    assert!(g.has_edge(root, leaf, "mesh-child"));
}

#[test]
fn test_rebuild_is_idempotent() {
    let dir = tempdir().unwrap();
    let config = sources(dir.path());
    let a = KnowledgeGraphBuilder::new(config.clone()).build().unwrap();
    let b = KnowledgeGraphBuilder::new(config).build().unwrap();
    assert_eq!(a.stats(), b.stats());
    for id in ["DB01098", "C0027051", "D000787", "301542"] {
        assert_eq!(
            a.resolve_to_compact_id(id).unwrap(),
            b.resolve_to_compact_id(id).unwrap()
        );
    }
}

#[test]
fn test_missing_source_is_reported() {
    let dir = tempdir().unwrap();
    let mut config = sources(dir.path());
    config.edge_files.push("chembl.jsonl".into());
    let err = KnowledgeGraphBuilder::new(config).build().unwrap_err();
    match err {
        KgError::DataSourceMissing { path } => assert!(path.ends_with("chembl.jsonl")),
        other => panic!("unexpected error: {other}"),
    }
}

// ============================================================================
// End to end
// ============================================================================

#[test]
fn test_parsed_trial_to_arm_records() {
    let (_dir, kg) = background();
    let records = pipeline(kg.clone()).process(parsed_trial()).unwrap();
    assert_eq!(records.len(), 2);

    let statin = &records[0];
    assert_eq!(statin.arm_label, "ROSUVASTATIN");
    assert_eq!(statin.arm_idx, 0);
    assert_eq!(
        statin.arm_text,
        "Rosuvastatin  40 mg  Periprocedural Myocardial Necrosis  Myocardial enzymes arise  \
         ROSUVASTATIN statin load Statin loading before PCI. Stable angina."
    );
    let relations: Vec<&str> = statin
        .trial_arm_edges
        .iter()
        .map(|e| e.relation.as_str())
        .collect();
    assert_eq!(relations, vec!["arm-intervention-drug", "arm-condition"]);
    assert_eq!(
        statin.trial_arm_edges[0].kg_id,
        kg.resolve_to_compact_id("301542").unwrap()
    );
    assert_eq!(
        statin.trial_arm_edges[1].kg_id,
        kg.resolve_to_compact_id("D009202").unwrap()
    );

    // Attribute vector: 2x8 age bins + sex + enrollment + phase.
    let feats = &statin.trial_attribute_feats_vec;
    assert_eq!(feats.len(), 26);
    assert_eq!(&feats[16..19], &[1.0, 0.0, 0.0]);
    assert!((feats[19] - 161f64.ln()).abs() < 1e-12);
    assert_eq!(&feats[21..26], &[0.0, 0.0, 0.0, 1.0, 0.0]);
    assert_eq!(records[1].trial_attribute_feats_vec, *feats);
}

#[test]
fn test_registry_study_to_arm_records() {
    let (_dir, kg) = background();
    let trial = parse_study(&registry_study("NCT09999999")).unwrap();
    let records = pipeline(kg).process(trial).unwrap();
    assert_eq!(records.len(), 1);
    let feats = &records[0].trial_attribute_feats_vec;
    assert_eq!(&feats[16..19], &[0.0, 0.0, 1.0]);
    assert_eq!(feats[20], 1.0);
    assert_eq!(&feats[21..26], &[0.0, 0.0, 1.0, 0.0, 0.0]);
    assert!(records[0].arm_text.starts_with("Clopidogrel  "));
}

#[test]
fn test_unknown_phase_fails_only_that_trial() {
    let (_dir, kg) = background();
    let mut bad = parsed_trial();
    bad.nct_id = "NCT00000666".into();
    bad.phase = vec!["PHASE5".into()];
    let items = pipeline(kg).process_batch(vec![parsed_trial(), bad]);
    assert!(items[0].is_ok());
    assert!(items[1].error.as_deref().unwrap().contains("PHASE5"));
}

// ============================================================================
// Overlay isolation and concurrency
// ============================================================================

#[test]
fn test_overlay_isolation_across_trials() {
    let (_dir, kg) = background();
    let before = (kg.graph().node_count(), kg.graph().edge_count());

    let mut first = parsed_trial();
    first.mesh_ids = vec!["D009202".into()];
    let mut second = parse_study(&registry_study("NCT09999999")).unwrap();
    second.mesh_ids = vec!["D000787".into()];

    let a = TrialAttachmentBuilder::new(&kg).build(&first).unwrap();
    let b = TrialAttachmentBuilder::new(&kg).build(&second).unwrap();
    assert!(a.overlay().node_by_key("NCT09999999::arm::0").is_none());
    assert!(b.overlay().node_by_key("NCT01007279::arm::0").is_none());
    assert_eq!(a.overlay().node_count(), 2);
    assert_eq!(b.overlay().node_count(), 1);
    assert_eq!((kg.graph().node_count(), kg.graph().edge_count()), before);
}

#[test]
fn test_concurrent_featurization_matches_sequential() {
    let (_dir, kg) = background();
    let pipeline = pipeline(kg.clone());
    let trials: Vec<Trial> = (0..32)
        .map(|i| {
            let mut t = parsed_trial();
            t.nct_id = format!("NCT{i:08}");
            t
        })
        .collect();

    let sequential: Vec<_> = trials
        .iter()
        .map(|t| pipeline.process(t.clone()).unwrap())
        .collect();
    let parallel: Vec<_> = trials
        .par_iter()
        .map(|t| pipeline.process(t.clone()).unwrap())
        .collect();
    assert_eq!(sequential, parallel);

    let batch = pipeline.process_batch(trials);
    assert!(batch.iter().all(|i| i.is_ok()));
    assert_eq!(kg.graph().edge_count(), kg.stats().edges);
}
