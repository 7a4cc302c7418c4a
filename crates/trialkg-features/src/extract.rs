//! Arm records: structural edges, trial attribute vector and arm text.

use serde::{Deserialize, Serialize};

use trialkg_graph::{BackgroundKg, EdgeMeta};
use trialkg_ingest::Trial;

use crate::attach::{trial_arms, TrialAttachment};
use crate::attributes::TrialAttributeFeatures;
use crate::error::FeatureResult;
use crate::text::TrialText;

/// One edge out of an arm node, with its target resolved to a kg id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmEdge {
    pub kg_id: u32,
    pub relation: String,
    pub key: u32,
    pub data: EdgeMeta,
}

/// Per-arm engine output, handed to the prediction model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmRecord {
    pub nct_id: String,
    pub arm_label: String,
    pub arm_idx: usize,
    pub trial_arm_edges: Vec<ArmEdge>,
    pub arm_text: String,
    pub trial_attribute_feats_vec: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    attributes: TrialAttributeFeatures,
}

impl FeatureExtractor {
    pub fn new(attributes: TrialAttributeFeatures) -> Self {
        Self { attributes }
    }

    pub fn attributes(&self) -> &TrialAttributeFeatures {
        &self.attributes
    }

    /// Edges of one arm in overlay order, each target resolved through the
    /// canonical resolver. An unresolvable target fails the request.
    pub fn arm_edges(
        &self,
        kg: &BackgroundKg,
        attachment: &TrialAttachment<'_>,
        arm_idx: usize,
    ) -> FeatureResult<Vec<ArmEdge>> {
        let Some(arm) = attachment.arms().get(arm_idx) else {
            return Ok(Vec::new());
        };
        let overlay = attachment.overlay();
        overlay
            .edges_from(arm.node)
            .map(|edge| {
                let target = overlay.target_id(edge);
                let kg_id = kg.resolve_to_compact_id(target).map_err(|e| {
                    tracing::error!(nct_id = attachment.nct_id(), entity = target, error = %e, "unresolvable arm edge");
                    e
                })?;
                Ok(ArmEdge {
                    kg_id,
                    relation: edge.meta.relation.clone(),
                    key: edge.key,
                    data: edge.meta.clone(),
                })
            })
            .collect()
    }

    /// One record per arm. The attribute vector is computed once and cloned
    /// into every record.
    pub fn extract(
        &self,
        kg: &BackgroundKg,
        trial: &Trial,
        attachment: &TrialAttachment<'_>,
    ) -> FeatureResult<Vec<ArmRecord>> {
        let arms = trial_arms(trial)?;
        let feats = self.attributes.featurize(trial)?;
        let text = TrialText::new(trial);

        let mut records = Vec::with_capacity(arms.len());
        for (node, arm) in attachment.arms().iter().zip(arms.iter()) {
            records.push(ArmRecord {
                nct_id: trial.nct_id.clone(),
                arm_label: node.label.clone(),
                arm_idx: node.arm_idx,
                trial_arm_edges: self.arm_edges(kg, attachment, node.arm_idx)?,
                arm_text: text.arm_text(trial, arm),
                trial_attribute_feats_vec: feats.clone(),
            });
        }
        Ok(records)
    }
}
