//! Trial attachment: one overlay node per arm, edges to matched entities.
//!
//! Edges are added per arm in a fixed order (intervention drugs, medication
//! mentions, conditions, outcomes, then eligibility concepts when enabled),
//! so the overlay's native iteration order is stable for unchanged input.
//! A matched id that is not in the background graph fails the trial with
//! `UnknownEntity`. With [`TrialAttachmentBuilder::skip_unknown_entities`]
//! such ids are skipped instead and kept in [`TrialAttachment::unresolved`]
//! for audit.

use std::borrow::Cow;

use trialkg_graph::{BackgroundKg, EdgeMeta, GraphOverlay, KgError, OverlayNodeId};
use trialkg_ingest::{Arm, Intervention, Trial};

use crate::error::{FeatureError, FeatureResult};

// ============================================================================
// Relation tags and provenance
// ============================================================================

pub const ARM_INTERVENTION_DRUG: &str = "arm-intervention-drug";
pub const ARM_MEDICATION: &str = "arm-medication";
pub const ARM_CONDITION: &str = "arm-condition";
pub const ARM_OUTCOME: &str = "arm-outcome";
pub const ARM_ELIGIBILITY_INCLUSION: &str = "arm-eligibility-inclusion";
pub const ARM_ELIGIBILITY_EXCLUSION: &str = "arm-eligibility-exclusion";

const DRUG_MATCHER: &str = "drug-matcher";
const MEDICATION_EXTRACTION: &str = "medication-extraction";
const DISEASE_MATCHER: &str = "disease-matcher";
const OUTCOME_EXTRACTION: &str = "outcome-extraction";
const CRITERIA_PARSER: &str = "criteria-parser";

/// Overlay key of an arm node. Never collides with ontology ids in practice;
/// a collision is reported as an error rather than shadowing the entity.
pub fn arm_key(nct_id: &str, arm_idx: usize) -> String {
    format!("{nct_id}::arm::{arm_idx}")
}

/// The arms to attach. A missing or malformed arm list yields the single
/// `"default"` arm; an explicitly empty list is an incomplete trial.
pub fn trial_arms(trial: &Trial) -> FeatureResult<Cow<'_, [Arm]>> {
    match &trial.arm_group {
        Some(arms) if arms.is_empty() => Err(FeatureError::IncompleteTrial {
            nct_id: trial.nct_id.clone(),
        }),
        Some(arms) => Ok(Cow::Borrowed(arms.as_slice())),
        None => {
            tracing::debug!(nct_id = %trial.nct_id, "no arm list, using default arm");
            Ok(Cow::Owned(vec![Arm::default_arm()]))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmNode {
    pub arm_idx: usize,
    pub label: String,
    pub node: OverlayNodeId,
}

pub struct TrialAttachment<'g> {
    nct_id: String,
    overlay: GraphOverlay<'g>,
    arms: Vec<ArmNode>,
    mesh_ids: Vec<String>,
    drug_ids: Vec<String>,
    unresolved: Vec<String>,
}

impl<'g> TrialAttachment<'g> {
    pub fn nct_id(&self) -> &str {
        &self.nct_id
    }

    pub fn overlay(&self) -> &GraphOverlay<'g> {
        &self.overlay
    }

    pub fn arms(&self) -> &[ArmNode] {
        &self.arms
    }

    /// Disease ids matched for the trial (audit).
    pub fn mesh_ids(&self) -> &[String] {
        &self.mesh_ids
    }

    /// Drug ids matched across interventions (audit).
    pub fn drug_ids(&self) -> &[String] {
        &self.drug_ids
    }

    /// Matched ids absent from the background graph.
    pub fn unresolved(&self) -> &[String] {
        &self.unresolved
    }
}

// ============================================================================
// Builder
// ============================================================================

pub struct TrialAttachmentBuilder<'g> {
    kg: &'g BackgroundKg,
    use_population: bool,
    skip_unknown: bool,
}

struct ArmEdges<'o, 'g> {
    nct_id: &'o str,
    overlay: &'o mut GraphOverlay<'g>,
    node: OverlayNodeId,
    skip_unknown: bool,
    unresolved: &'o mut Vec<String>,
    added: usize,
}

impl ArmEdges<'_, '_> {
    fn add(&mut self, target: &str, meta: EdgeMeta) -> FeatureResult<()> {
        if self.overlay.add_edge(self.node, target, meta).is_some() {
            self.added += 1;
            return Ok(());
        }
        if !self.skip_unknown {
            tracing::error!(nct_id = self.nct_id, entity = target, "matched id not in background graph");
            // Never seen by the resolver, so the id is its own representative.
            return Err(KgError::UnknownEntity {
                entity: target.to_string(),
                representative: target.to_string(),
            }
            .into());
        }
        if !self.unresolved.iter().any(|u| u == target) {
            tracing::warn!(nct_id = self.nct_id, entity = target, "matched id not in background graph, skipped");
            self.unresolved.push(target.to_string());
        }
        Ok(())
    }
}

fn intervention_meta(relation: &str, provenance: &str, iv: &Intervention) -> EdgeMeta {
    let meta = EdgeMeta::new(relation, provenance).with_attr("intervention", &iv.intervention_name);
    match &iv.intervention_type {
        Some(kind) => meta.with_attr("intervention_type", kind),
        None => meta,
    }
}

impl<'g> TrialAttachmentBuilder<'g> {
    pub fn new(kg: &'g BackgroundKg) -> Self {
        Self {
            kg,
            use_population: false,
            skip_unknown: false,
        }
    }

    /// Attach eligibility-criteria concepts as well.
    pub fn use_population(mut self, enabled: bool) -> Self {
        self.use_population = enabled;
        self
    }

    /// Skip matched ids that are absent from the background graph instead of
    /// failing the trial. Off by default.
    pub fn skip_unknown_entities(mut self, enabled: bool) -> Self {
        self.skip_unknown = enabled;
        self
    }

    pub fn build(&self, trial: &Trial) -> FeatureResult<TrialAttachment<'g>> {
        let arms = trial_arms(trial)?;
        let mut overlay = GraphOverlay::new(self.kg.graph());
        let mut unresolved = Vec::new();
        let mut arm_nodes = Vec::with_capacity(arms.len());

        for (arm_idx, arm) in arms.iter().enumerate() {
            let node = overlay.add_node(&arm_key(&trial.nct_id, arm_idx))?;
            let mut edges = ArmEdges {
                nct_id: &trial.nct_id,
                overlay: &mut overlay,
                node,
                skip_unknown: self.skip_unknown,
                unresolved: &mut unresolved,
                added: 0,
            };
            self.attach_arm(trial, arm, &mut edges)?;
            tracing::debug!(
                nct_id = %trial.nct_id,
                arm_idx,
                label = %arm.arm_group_label,
                edges = edges.added,
                "attached arm"
            );
            arm_nodes.push(ArmNode {
                arm_idx,
                label: arm.arm_group_label.clone(),
                node,
            });
        }

        tracing::info!(
            nct_id = %trial.nct_id,
            arms = arm_nodes.len(),
            edges = overlay.edge_count(),
            unresolved = unresolved.len(),
            "trial attached"
        );
        Ok(TrialAttachment {
            nct_id: trial.nct_id.clone(),
            overlay,
            arms: arm_nodes,
            mesh_ids: trial.mesh_ids.clone(),
            drug_ids: trial.drug_ids().into_iter().map(str::to_string).collect(),
            unresolved,
        })
    }

    fn attach_arm(
        &self,
        trial: &Trial,
        arm: &Arm,
        edges: &mut ArmEdges<'_, 'g>,
    ) -> FeatureResult<()> {
        let label = arm.arm_group_label.as_str();

        for iv in trial.intervention.iter().filter(|iv| iv.applies_to(label)) {
            for drug in &iv.drug_ids {
                edges.add(drug, intervention_meta(ARM_INTERVENTION_DRUG, DRUG_MATCHER, iv))?;
            }
        }

        for mention in &trial.medications {
            let Some(iv) = trial.intervention.get(mention.intervention_idx) else {
                continue;
            };
            if !iv.applies_to(label) {
                continue;
            }
            for concept in mention.concept_ids() {
                let meta = intervention_meta(ARM_MEDICATION, MEDICATION_EXTRACTION, iv)
                    .with_attr("drug_name", &mention.drug_name);
                edges.add(concept, meta)?;
            }
        }

        for mesh_id in &trial.mesh_ids {
            edges.add(mesh_id, EdgeMeta::new(ARM_CONDITION, DISEASE_MATCHER))?;
        }

        let outcomes = trial
            .primary_outcome
            .iter()
            .map(|o| ("primary", o))
            .chain(trial.secondary_outcome.iter().map(|o| ("secondary", o)));
        for (kind, outcome) in outcomes {
            for concept in &outcome.concept_ids {
                let mut meta =
                    EdgeMeta::new(ARM_OUTCOME, OUTCOME_EXTRACTION).with_attr("outcome_type", kind);
                if let Some(measure) = &outcome.measure {
                    meta = meta.with_attr("measure", measure);
                }
                edges.add(concept, meta)?;
            }
        }

        if !self.use_population {
            return Ok(());
        }
        for criterion in &trial.eligibility_concepts {
            let Some(concept) = criterion.concept_id.as_deref() else {
                continue;
            };
            let relation = if criterion.inclusion {
                ARM_ELIGIBILITY_INCLUSION
            } else {
                ARM_ELIGIBILITY_EXCLUSION
            };
            let mut meta = EdgeMeta::new(relation, CRITERIA_PARSER)
                .with_attr("criterion", &criterion.text)
                .with_attr("category", &criterion.category)
                .with_attr("negated", criterion.negated.to_string());
            if let Some(score) = trial.population_scores.get(concept) {
                meta = meta.with_attr("population_score", score.to_string());
            }
            edges.add(concept, meta)?;
        }
        Ok(())
    }
}
