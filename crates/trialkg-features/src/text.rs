//! Per-arm text for the downstream text encoder.
//!
//! Segments, joined with single spaces in this exact order:
//! 1. matched intervention name
//! 2. matched intervention description
//! 3. all conditions
//! 4. all primary-outcome measures
//! 5. arm label + arm description
//! 6. brief summary
//! 7. eligibility criteria
//!
//! Name, description, each condition and each measure carry one trailing
//! space; an arm without a matching intervention gets empty strings for
//! segments 1 and 2. The layout is a contract with the consumer.

use trialkg_ingest::{Arm, Intervention, Trial};

/// Trial-level segments, computed once and reused for every arm.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrialText {
    conditions: String,
    outcomes: String,
    summary: String,
    criteria: String,
}

impl TrialText {
    pub fn new(trial: &Trial) -> Self {
        let mut conditions = String::new();
        for condition in &trial.condition {
            conditions.push_str(condition);
            conditions.push(' ');
        }
        let mut outcomes = String::new();
        for outcome in &trial.primary_outcome {
            outcomes.push_str(outcome.measure.as_deref().unwrap_or_default());
            outcomes.push(' ');
        }
        Self {
            conditions,
            outcomes,
            summary: trial.brief_summary.clone().unwrap_or_default(),
            criteria: trial.eligibility_criteria.clone().unwrap_or_default(),
        }
    }

    pub fn arm_text(&self, trial: &Trial, arm: &Arm) -> String {
        let (name, desc) = match matched_intervention(trial, &arm.arm_group_label) {
            Some(iv) => (
                format!("{} ", iv.intervention_name),
                format!("{} ", iv.description.as_deref().unwrap_or_default()),
            ),
            None => (String::new(), String::new()),
        };
        let arm_segment = format!(
            "{} {}",
            arm.arm_group_label,
            arm.description.as_deref().unwrap_or_default()
        );
        [
            name.as_str(),
            desc.as_str(),
            self.conditions.as_str(),
            self.outcomes.as_str(),
            arm_segment.as_str(),
            self.summary.as_str(),
            self.criteria.as_str(),
        ]
        .join(" ")
    }
}

/// The intervention whose text describes `arm_label`: the last one listing
/// the label (case-insensitive).
pub fn matched_intervention<'t>(trial: &'t Trial, arm_label: &str) -> Option<&'t Intervention> {
    trial
        .intervention
        .iter()
        .rev()
        .find(|iv| iv.applies_to(arm_label))
}

pub fn arm_text(trial: &Trial, arm: &Arm) -> String {
    TrialText::new(trial).arm_text(trial, arm)
}
