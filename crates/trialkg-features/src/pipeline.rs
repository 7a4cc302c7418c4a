//! Per-request pipeline over a shared background graph.
//!
//! A [`TrialPipeline`] holds an `Arc<BackgroundKg>` plus the stateless
//! request-side components. `process` runs the configured collaborators
//! (tools, matchers) on an owned trial, then attaches and extracts. Each
//! call builds its own overlay, so one pipeline can serve many threads.

use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use trialkg_graph::BackgroundKg;
use trialkg_ingest::{
    annotate_diseases, annotate_drugs, CriteriaParser, DiseaseMatcher, DrugMatcher, Lexicon,
    MedicationExtractor, Trial,
};

use crate::attach::TrialAttachmentBuilder;
use crate::config::PipelineConfig;
use crate::error::{FeatureError, FeatureResult};
use crate::extract::{ArmRecord, FeatureExtractor};

pub struct TrialPipeline {
    kg: Arc<BackgroundKg>,
    use_population: bool,
    skip_unknown: bool,
    extractor: FeatureExtractor,
    medication: Option<MedicationExtractor>,
    criteria: Option<CriteriaParser>,
    drug_matcher: Option<Box<dyn DrugMatcher>>,
    disease_matcher: Option<Box<dyn DiseaseMatcher>>,
}

/// Outcome of one trial in a batch.
#[derive(Debug, Serialize)]
pub struct BatchItem {
    pub nct_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<ArmRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItem {
    fn from_result(nct_id: String, result: FeatureResult<Vec<ArmRecord>>) -> Self {
        match result {
            Ok(records) => Self {
                nct_id,
                records: Some(records),
                error: None,
            },
            Err(e) => Self {
                nct_id,
                records: None,
                error: Some(e.to_string()),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl TrialPipeline {
    /// Pipeline with default attributes and no collaborators configured.
    pub fn new(kg: Arc<BackgroundKg>) -> Self {
        Self {
            kg,
            use_population: false,
            skip_unknown: false,
            extractor: FeatureExtractor::default(),
            medication: None,
            criteria: None,
            drug_matcher: None,
            disease_matcher: None,
        }
    }

    /// Build from configuration, loading lexicons eagerly.
    pub fn from_config(kg: Arc<BackgroundKg>, config: &PipelineConfig) -> FeatureResult<Self> {
        let mut pipeline = Self::new(kg);
        pipeline.use_population = config.use_population;
        pipeline.skip_unknown = config.skip_unknown_entities;
        pipeline.extractor = FeatureExtractor::new(config.attribute_features()?);
        pipeline.medication = config
            .medication_tool
            .as_ref()
            .map(|t| MedicationExtractor::from_spec(t.tool_spec()));
        pipeline.criteria = config
            .criteria_tool
            .as_ref()
            .map(|t| CriteriaParser::from_spec(t.tool_spec()));
        if let Some(path) = &config.drug_lexicon {
            pipeline.drug_matcher = Some(Box::new(Lexicon::load(path)?));
        }
        if let Some(path) = &config.disease_lexicon {
            pipeline.disease_matcher = Some(Box::new(Lexicon::load(path)?));
        }
        Ok(pipeline)
    }

    pub fn with_drug_matcher(mut self, matcher: Box<dyn DrugMatcher>) -> Self {
        self.drug_matcher = Some(matcher);
        self
    }

    pub fn with_disease_matcher(mut self, matcher: Box<dyn DiseaseMatcher>) -> Self {
        self.disease_matcher = Some(matcher);
        self
    }

    pub fn with_extractor(mut self, extractor: FeatureExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn use_population(mut self, enabled: bool) -> Self {
        self.use_population = enabled;
        self
    }

    pub fn skip_unknown_entities(mut self, enabled: bool) -> Self {
        self.skip_unknown = enabled;
        self
    }

    pub fn background(&self) -> &Arc<BackgroundKg> {
        &self.kg
    }

    /// Run the configured collaborators. Annotations that are not
    /// configured are left as they arrived on the record.
    pub fn annotate(&self, trial: &mut Trial) -> FeatureResult<()> {
        if let Some(medication) = &self.medication {
            medication.annotate(trial)?;
        }
        if let Some(criteria) = &self.criteria {
            criteria.annotate(trial)?;
        }
        if let Some(matcher) = &self.drug_matcher {
            annotate_drugs(matcher.as_ref(), trial);
        }
        if let Some(matcher) = &self.disease_matcher {
            annotate_diseases(matcher.as_ref(), trial);
        }
        Ok(())
    }

    /// Attach and extract an already-annotated trial.
    pub fn featurize(&self, trial: &Trial) -> FeatureResult<Vec<ArmRecord>> {
        let started = Instant::now();
        let attachment = TrialAttachmentBuilder::new(&self.kg)
            .use_population(self.use_population)
            .skip_unknown_entities(self.skip_unknown)
            .build(trial)?;
        let records = self.extractor.extract(&self.kg, trial, &attachment)?;
        tracing::info!(
            nct_id = %trial.nct_id,
            arms = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "trial featurized"
        );
        Ok(records)
    }

    /// Annotate then featurize.
    pub fn process(&self, mut trial: Trial) -> FeatureResult<Vec<ArmRecord>> {
        self.annotate(&mut trial)?;
        self.featurize(&trial)
    }

    /// Process many trials in parallel; results keep input order and a
    /// failing trial does not stop the others.
    pub fn process_batch(&self, trials: Vec<Trial>) -> Vec<BatchItem> {
        let items: Vec<BatchItem> = trials
            .into_par_iter()
            .map(|trial| {
                let nct_id = trial.nct_id.clone();
                let result = self.process(trial);
                if let Err(e) = &result {
                    log_failure(&nct_id, e);
                }
                BatchItem::from_result(nct_id, result)
            })
            .collect();
        let failed = items.iter().filter(|i| !i.is_ok()).count();
        tracing::info!(trials = items.len(), failed, "batch finished");
        items
    }
}

fn log_failure(nct_id: &str, e: &FeatureError) {
    match e {
        FeatureError::ExternalTool { .. } => {
            tracing::warn!(nct_id, error = %e, "trial failed in external tool, retryable")
        }
        _ => tracing::error!(nct_id, error = %e, "trial failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trialkg_graph::{CanonicalResolver, KnowledgeGraph};
    use trialkg_ingest::{Arm, Intervention};

    fn kg() -> Arc<BackgroundKg> {
        let mut g = KnowledgeGraph::new();
        g.add_edge("DB01098", "D009202", "treats", "drugbank", &[]);
        Arc::new(BackgroundKg::from_parts(g, CanonicalResolver::new(), None))
    }

    fn trial(nct: &str) -> Trial {
        Trial {
            nct_id: nct.into(),
            arm_group: Some(vec![Arm {
                arm_group_label: "A".into(),
                ..Arm::default()
            }]),
            intervention: vec![Intervention {
                intervention_name: "Rosuvastatin".into(),
                arm_group_label: Some(vec!["a".into()]),
                ..Intervention::default()
            }],
            condition: vec!["Myocardial Necrosis".into()],
            phase: vec!["PHASE2".into()],
            ..Trial::default()
        }
    }

    fn lexicons(pipeline: TrialPipeline) -> TrialPipeline {
        let mut drugs = Lexicon::new();
        drugs.insert("rosuvastatin", "DB01098");
        let mut diseases = Lexicon::new();
        diseases.insert("myocardial necrosis", "D009202");
        pipeline
            .with_drug_matcher(Box::new(drugs))
            .with_disease_matcher(Box::new(diseases))
    }

    #[test]
    fn process_runs_matchers_before_attachment() {
        let pipeline = lexicons(TrialPipeline::new(kg()));
        let records = pipeline.process(trial("NCT1")).unwrap();
        assert_eq!(records.len(), 1);
        let rels: Vec<&str> = records[0]
            .trial_arm_edges
            .iter()
            .map(|e| e.relation.as_str())
            .collect();
        assert_eq!(rels, vec!["arm-intervention-drug", "arm-condition"]);
    }

    #[test]
    fn batch_isolates_failures_and_keeps_order() {
        let pipeline = lexicons(TrialPipeline::new(kg()));
        let mut bad = trial("NCT2");
        bad.arm_group = Some(Vec::new());
        let items = pipeline.process_batch(vec![trial("NCT1"), bad, trial("NCT3")]);
        let ids: Vec<&str> = items.iter().map(|i| i.nct_id.as_str()).collect();
        assert_eq!(ids, vec!["NCT1", "NCT2", "NCT3"]);
        assert!(items[0].is_ok() && items[2].is_ok());
        assert!(items[1].error.as_deref().unwrap().contains("no arms"));
    }

    #[test]
    fn lexicon_hit_outside_the_graph_fails_the_trial() {
        let mut drugs = Lexicon::new();
        drugs.insert("rosuvastatin", "DB-NOT-IN-KG");
        let strict = TrialPipeline::new(kg()).with_drug_matcher(Box::new(drugs.clone()));
        let items = strict.process_batch(vec![trial("NCT1")]);
        let error = items[0].error.as_deref().unwrap();
        assert!(error.contains("DB-NOT-IN-KG"), "{error}");

        let lenient = TrialPipeline::new(kg())
            .with_drug_matcher(Box::new(drugs))
            .skip_unknown_entities(true);
        let records = lenient.process(trial("NCT1")).unwrap();
        assert!(records[0].trial_arm_edges.is_empty());
    }

    #[test]
    fn featurize_uses_existing_annotations() {
        let pipeline = TrialPipeline::new(kg());
        let mut t = trial("NCT1");
        t.mesh_ids = vec!["D009202".into()];
        let records = pipeline.featurize(&t).unwrap();
        assert_eq!(records[0].trial_arm_edges.len(), 1);
    }
}
