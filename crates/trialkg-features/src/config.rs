//! Per-request pipeline configuration (the `[pipeline]` table).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use trialkg_ingest::{CriteriaConfig, MedexConfig, ToolSpec};

use crate::attributes::{AgeBinEncoder, TrialAttributeFeatures, DEFAULT_AGE_BIN_EDGES};
use crate::error::FeatureResult;

fn default_attributes() -> Vec<String> {
    ["age", "gender", "enrollment", "phase"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_age_bins() -> Vec<f64> {
    DEFAULT_AGE_BIN_EDGES.to_vec()
}

/// Medication tool: the MedEx preset or an explicit command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MedicationTool {
    Medex(MedexConfig),
    Command(ToolSpec),
}

impl MedicationTool {
    pub fn tool_spec(&self) -> ToolSpec {
        match self {
            MedicationTool::Medex(cfg) => cfg.tool_spec(),
            MedicationTool::Command(spec) => spec.clone(),
        }
    }
}

/// Eligibility tool: the Criteria2Query preset or an explicit command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CriteriaTool {
    Criteria2Query(CriteriaConfig),
    Command(ToolSpec),
}

impl CriteriaTool {
    pub fn tool_spec(&self) -> ToolSpec {
        match self {
            CriteriaTool::Criteria2Query(cfg) => cfg.tool_spec(),
            CriteriaTool::Command(spec) => spec.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Attach eligibility-criteria concepts to arms.
    #[serde(default)]
    pub use_population: bool,
    /// Drop matched ids the background graph does not know instead of
    /// failing the trial.
    #[serde(default)]
    pub skip_unknown_entities: bool,
    #[serde(default = "default_attributes")]
    pub attributes: Vec<String>,
    #[serde(default = "default_age_bins")]
    pub age_bins: Vec<f64>,
    #[serde(default)]
    pub medication_tool: Option<MedicationTool>,
    #[serde(default)]
    pub criteria_tool: Option<CriteriaTool>,
    /// JSON lexicon `{term: [drug ids]}`.
    #[serde(default)]
    pub drug_lexicon: Option<PathBuf>,
    /// JSON lexicon `{term: [disease ids]}`.
    #[serde(default)]
    pub disease_lexicon: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            use_population: false,
            skip_unknown_entities: false,
            attributes: default_attributes(),
            age_bins: default_age_bins(),
            medication_tool: None,
            criteria_tool: None,
            drug_lexicon: None,
            disease_lexicon: None,
        }
    }
}

impl PipelineConfig {
    /// Resolve relative lexicon paths against `data_dir`.
    pub fn resolve_paths(&mut self, data_dir: &Path) {
        for path in [&mut self.drug_lexicon, &mut self.disease_lexicon]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = data_dir.join(&*path);
            }
        }
    }

    /// Validated attribute layout with the configured age bins.
    pub fn attribute_features(&self) -> FeatureResult<TrialAttributeFeatures> {
        TrialAttributeFeatures::from_names(
            &self.attributes,
            Arc::new(AgeBinEncoder::new(self.age_bins.clone())),
        )
    }
}
