//! Public trials registry (API v2 study JSON) to [`Trial`].
//!
//! Extraction is table-driven: [`FIELD_PATHS`] maps each trial attribute to a
//! dotted path into the study document, and [`lookup`] walks that path
//! returning `None` at the first missing component. Nothing here panics on an
//! unexpected document shape.

use serde_json::{Map, Value};

use crate::error::{IngestError, IngestResult};
use crate::trial::Trial;

pub const REGISTRY_STUDIES_URL: &str = "https://clinicaltrials.gov/api/v2/studies";

/// Trial attribute -> dotted path in the registry study document.
pub const FIELD_PATHS: &[(&str, &str)] = &[
    ("nct_id", "protocolSection.identificationModule.nctId"),
    ("arm_group", "protocolSection.armsInterventionsModule.armGroups"),
    ("intervention", "protocolSection.armsInterventionsModule.interventions"),
    ("condition", "protocolSection.conditionsModule.conditions"),
    ("condition_mesh_terms", "derivedSection.conditionBrowseModule.meshes"),
    ("event_groups", "resultsSection.adverseEventsModule.eventGroups"),
    ("primary_outcome", "protocolSection.outcomesModule.primaryOutcomes"),
    ("secondary_outcome", "protocolSection.outcomesModule.secondaryOutcomes"),
    ("eligibility_criteria", "protocolSection.eligibilityModule.eligibilityCriteria"),
    ("brief_summary", "protocolSection.descriptionModule.briefSummary"),
    ("phase", "protocolSection.designModule.phases"),
    ("enrollment", "protocolSection.designModule.enrollmentInfo"),
    ("gender_sex", "protocolSection.eligibilityModule.sex"),
    ("minimum_age", "protocolSection.eligibilityModule.minimumAge"),
    ("maximum_age", "protocolSection.eligibilityModule.maximumAge"),
];

/// Follow a dotted path through nested objects.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(root, |node, component| node.as_object()?.get(component))
}

pub fn study_url(nct_id: &str) -> String {
    format!("{REGISTRY_STUDIES_URL}/{nct_id}")
}

/// `"DRUG"` / `"drug"` -> `"Drug"`, `"DIETARY_SUPPLEMENT"` -> `"Dietary_Supplement"`.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

fn rename(obj: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(v) = obj.remove(from) {
        obj.insert(to.to_string(), v);
    }
}

fn normalize_interventions(list: &mut Value) {
    let Some(items) = list.as_array_mut() else {
        return;
    };
    for item in items.iter_mut().filter_map(Value::as_object_mut) {
        if let Some(Value::String(kind)) = item.remove("type") {
            item.insert("intervention_type".into(), Value::String(title_case(&kind)));
        }
        rename(item, "name", "intervention_name");
        rename(item, "otherNames", "other_name");
        rename(item, "armGroupLabels", "arm_group_label");
    }
}

fn normalize_arm_groups(list: &mut Value) {
    let Some(items) = list.as_array_mut() else {
        return;
    };
    for item in items.iter_mut().filter_map(Value::as_object_mut) {
        rename(item, "label", "arm_group_label");
        rename(item, "type", "arm_group_type");
    }
}

/// Extract a [`Trial`] from a registry study document.
///
/// Fails with [`IngestError::IncompleteTrial`] when the study lists no arm
/// groups, and [`IngestError::MissingField`] when it has no NCT id.
pub fn parse_study(study: &Value) -> IngestResult<Trial> {
    let mut record = Map::new();
    for (attribute, path) in FIELD_PATHS {
        let value = lookup(study, path).cloned().unwrap_or(Value::Null);
        record.insert((*attribute).to_string(), value);
    }

    let nct_id = match record.get("nct_id") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        _ => return Err(IngestError::MissingField("nct_id")),
    };
    if record.get("arm_group").map_or(true, Value::is_null) {
        return Err(IngestError::IncompleteTrial { nct_id });
    }

    if let Some(arms) = record.get_mut("arm_group") {
        normalize_arm_groups(arms);
    }
    if let Some(interventions) = record.get_mut("intervention") {
        normalize_interventions(interventions);
    }

    let results = match record.remove("event_groups") {
        Some(Value::Null) | None => None,
        Some(groups) => Some(serde_json::json!({
            "reported_events": {"group_list": {"group": groups}}
        })),
    };
    record.insert("clinical_results".into(), results.unwrap_or(Value::Null));

    let trial = Trial::from_value(Value::Object(record))?;
    tracing::debug!(
        nct_id = %trial.nct_id,
        arms = trial.arm_group.as_ref().map_or(0, Vec::len),
        interventions = trial.intervention.len(),
        "parsed registry study"
    );
    Ok(trial)
}
