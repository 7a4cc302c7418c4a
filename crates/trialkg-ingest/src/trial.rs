//! The parsed trial record and its collaborator annotations.
//!
//! Records arrive in the flattened "parsed trial" shape (`nct_id`,
//! `arm_group`, `intervention`, ...). Optional fields are decoded leniently:
//! a malformed optional value degrades to its documented default instead of
//! rejecting the whole record.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::IngestResult;

// ============================================================================
// Record types
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Arm {
    #[serde(alias = "label", default, deserialize_with = "lenient::string_or_empty")]
    pub arm_group_label: String,
    #[serde(
        alias = "type",
        default,
        deserialize_with = "lenient::opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub arm_group_type: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient::opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<String>,
    #[serde(
        alias = "interventionNames",
        default,
        deserialize_with = "lenient::strings",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub intervention_names: Vec<String>,
}

impl Arm {
    /// The arm synthesized when a record carries no usable arm list.
    pub fn default_arm() -> Self {
        Self {
            arm_group_label: "default".to_string(),
            arm_group_type: Some(String::new()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    #[serde(alias = "name", default, deserialize_with = "lenient::string_or_empty")]
    pub intervention_name: String,
    #[serde(alias = "type", default, deserialize_with = "lenient::opt_string")]
    pub intervention_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub description: Option<String>,
    #[serde(alias = "otherNames", default, deserialize_with = "lenient::strings")]
    pub other_name: Vec<String>,
    /// `None` when the registry omitted the list or it was not a list of
    /// labels; such an intervention links to no arm.
    #[serde(alias = "armGroupLabels", default, deserialize_with = "lenient::opt_strings")]
    pub arm_group_label: Option<Vec<String>>,
    /// Drug ids assigned by the drug matcher.
    #[serde(default, deserialize_with = "lenient::strings")]
    pub drug_ids: Vec<String>,
}

impl Intervention {
    /// Whether this intervention lists `arm_label` (case-insensitive).
    pub fn applies_to(&self, arm_label: &str) -> bool {
        let wanted = arm_label.to_lowercase();
        self.arm_group_label
            .iter()
            .flatten()
            .any(|label| label.to_lowercase() == wanted)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub measure: Option<String>,
    #[serde(alias = "timeFrame", default, deserialize_with = "lenient::opt_string")]
    pub time_frame: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub description: Option<String>,
    /// Outcome concept ids assigned by the outcome collaborator.
    #[serde(default, deserialize_with = "lenient::strings")]
    pub concept_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshTerm {
    pub id: String,
    #[serde(default)]
    pub term: String,
}

/// Enrollment as reported by the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Enrollment {
    #[default]
    Missing,
    /// A bare participant count.
    Count(f64),
    /// `{count, type}` where `type` is e.g. `ESTIMATED` / `ANTICIPATED` / `ACTUAL`.
    Reported {
        count: f64,
        #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
}

/// A medication mention produced by the medication-extraction tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationMention {
    pub intervention_idx: usize,
    pub drug_name: String,
    #[serde(default)]
    pub umls_cui: Option<String>,
    #[serde(default)]
    pub rxcui: Option<String>,
    #[serde(default)]
    pub generic_name: Option<String>,
}

impl MedicationMention {
    /// Concept ids this mention can attach through, most specific first.
    pub fn concept_ids(&self) -> impl Iterator<Item = &str> {
        self.rxcui
            .iter()
            .chain(self.umls_cui.iter())
            .map(String::as_str)
    }
}

/// One normalized eligibility criterion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityCriterion {
    pub category: String,
    pub inclusion: bool,
    pub text: String,
    #[serde(default)]
    pub negated: bool,
    #[serde(default)]
    pub concept_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub nct_id: String,
    /// `None` when the record has no arm list (missing or not a list).
    #[serde(default, deserialize_with = "lenient::arm_groups")]
    pub arm_group: Option<Vec<Arm>>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub intervention: Vec<Intervention>,
    #[serde(default, deserialize_with = "lenient::strings")]
    pub condition: Vec<String>,
    #[serde(
        default,
        alias = "intervention_mesh_terms",
        deserialize_with = "lenient::list"
    )]
    pub condition_mesh_terms: Vec<MeshTerm>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub primary_outcome: Vec<Outcome>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub secondary_outcome: Vec<Outcome>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub eligibility_criteria: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub brief_summary: Option<String>,
    #[serde(default, deserialize_with = "lenient::strings")]
    pub phase: Vec<String>,
    #[serde(default, deserialize_with = "lenient::enrollment")]
    pub enrollment: Enrollment,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub gender_sex: Option<String>,
    /// Years.
    #[serde(default, deserialize_with = "lenient::age")]
    pub minimum_age: Option<f64>,
    /// Years.
    #[serde(default, deserialize_with = "lenient::age")]
    pub maximum_age: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinical_results: Option<Value>,
    #[serde(default)]
    pub has_results: bool,

    // Collaborator annotations.
    /// Disease (MeSH) ids matched for the trial.
    #[serde(default, deserialize_with = "lenient::strings")]
    pub mesh_ids: Vec<String>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub medications: Vec<MedicationMention>,
    /// Either a flat list or the nested `{category: {inclusion: [...]}}`
    /// form; the nested form is flattened on decode.
    #[serde(default, alias = "ec_umls", deserialize_with = "lenient::eligibility")]
    pub eligibility_concepts: Vec<EligibilityCriterion>,
    #[serde(default, deserialize_with = "lenient::scores")]
    pub population_scores: BTreeMap<String, f64>,
}

impl Trial {
    pub fn from_json(text: &str) -> IngestResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_value(value: Value) -> IngestResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Every matched drug id across interventions, first occurrence order.
    pub fn drug_ids(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for id in self.intervention.iter().flat_map(|i| i.drug_ids.iter()) {
            if !out.contains(&id.as_str()) {
                out.push(id);
            }
        }
        out
    }
}

// ============================================================================
// Lenient field decoding
// ============================================================================

mod lenient {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::{Map, Value};
    use std::collections::BTreeMap;

    use super::{Arm, EligibilityCriterion, Enrollment};
    use crate::age::parse_age_years;

    fn value<'de, D: Deserializer<'de>>(d: D) -> Result<Value, D::Error> {
        Value::deserialize(d)
    }

    pub fn string_or_empty<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(match value(d)? {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        })
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match value(d)? {
            Value::String(s) => Some(s),
            _ => None,
        })
    }

    fn string_items(items: Vec<Value>) -> Vec<String> {
        items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn strings<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        Ok(match value(d)? {
            Value::Array(items) => string_items(items),
            Value::String(s) => vec![s],
            _ => Vec::new(),
        })
    }

    pub fn opt_strings<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<String>>, D::Error> {
        Ok(match value(d)? {
            Value::Array(items) => Some(string_items(items)),
            _ => None,
        })
    }

    fn items<T: DeserializeOwned>(items: Vec<Value>, what: &str) -> Vec<T> {
        items
            .into_iter()
            .enumerate()
            .filter_map(|(idx, v)| match serde_json::from_value(v) {
                Ok(item) => Some(item),
                Err(e) => {
                    tracing::warn!(field = what, idx, error = %e, "skipping malformed list entry");
                    None
                }
            })
            .collect()
    }

    pub fn list<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        Ok(match value(d)? {
            Value::Array(v) => items(v, std::any::type_name::<T>()),
            _ => Vec::new(),
        })
    }

    pub fn arm_groups<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<Arm>>, D::Error> {
        Ok(match value(d)? {
            Value::Array(v) => Some(items(v, "arm_group")),
            _ => None,
        })
    }

    fn finite(n: Option<f64>) -> Option<f64> {
        n.filter(|x| x.is_finite())
    }

    fn number(v: &Value) -> Option<f64> {
        match v {
            Value::Number(n) => finite(n.as_f64()),
            Value::String(s) => finite(s.trim().parse().ok()),
            _ => None,
        }
    }

    pub fn enrollment<'de, D: Deserializer<'de>>(d: D) -> Result<Enrollment, D::Error> {
        let v = value(d)?;
        Ok(match &v {
            Value::Object(map) => match map.get("count").and_then(number) {
                Some(count) => Enrollment::Reported {
                    count,
                    status: map
                        .get("type")
                        .or_else(|| map.get("status"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                },
                None => Enrollment::Missing,
            },
            other => number(other).map(Enrollment::Count).unwrap_or_default(),
        })
    }

    /// Score maps keep only the entries whose value is a finite number.
    pub fn scores<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, f64>, D::Error> {
        Ok(match value(d)? {
            Value::Object(map) => map
                .into_iter()
                .filter_map(|(k, v)| match number(&v) {
                    Some(score) => Some((k, score)),
                    None => {
                        tracing::warn!(concept = %k, "skipping non-numeric population score");
                        None
                    }
                })
                .collect(),
            _ => BTreeMap::new(),
        })
    }

    pub fn eligibility<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Vec<EligibilityCriterion>, D::Error> {
        Ok(match value(d)? {
            Value::Array(v) => items(v, "eligibility_concepts"),
            Value::Object(categories) => flatten_eligibility(categories),
            _ => Vec::new(),
        })
    }

    fn inclusion_key(key: &str) -> Option<bool> {
        match key.trim().to_ascii_lowercase().as_str() {
            "inclusion" | "inclusion_criteria" | "include" | "true" => Some(true),
            "exclusion" | "exclusion_criteria" | "exclude" | "false" => Some(false),
            _ => None,
        }
    }

    /// `{category: {inclusion|exclusion: [criterion]}}` to a flat list,
    /// inclusion entries first, categories in key order.
    fn flatten_eligibility(categories: Map<String, Value>) -> Vec<EligibilityCriterion> {
        let (mut included, mut excluded) = (Vec::new(), Vec::new());
        for (category, sides) in categories {
            let Value::Object(sides) = sides else {
                tracing::warn!(%category, "skipping eligibility category that is not a map");
                continue;
            };
            for (side, entries) in sides {
                let Some(inclusion) = inclusion_key(&side) else {
                    tracing::warn!(%category, %side, "skipping unknown eligibility side");
                    continue;
                };
                let Value::Array(entries) = entries else {
                    continue;
                };
                let out = if inclusion { &mut included } else { &mut excluded };
                out.extend(
                    entries
                        .into_iter()
                        .filter_map(|e| nested_criterion(&category, inclusion, e)),
                );
            }
        }
        included.append(&mut excluded);
        included
    }

    /// A nested entry is either the criterion text or an object carrying
    /// `text`, `negated`/`neg` and a concept as `concept_id`, `cui` or
    /// `concept.ui`.
    fn nested_criterion(category: &str, inclusion: bool, entry: Value) -> Option<EligibilityCriterion> {
        let (text, negated, concept_id) = match entry {
            Value::String(text) => (text, false, None),
            Value::Object(map) => {
                let field = |names: &[&str]| names.iter().find_map(|n| map.get(*n));
                let text = field(&["text", "term"])
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let negated = field(&["negated", "neg"])
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let concept_id = field(&["concept_id", "cui"])
                    .or_else(|| map.get("concept").and_then(|c| c.get("ui")))
                    .and_then(Value::as_str)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string);
                (text, negated, concept_id)
            }
            _ => return None,
        };
        if text.trim().is_empty() && concept_id.is_none() {
            return None;
        }
        Some(EligibilityCriterion {
            category: category.to_string(),
            inclusion,
            text,
            negated,
            concept_id,
        })
    }

    pub fn age<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(match value(d)? {
            Value::Number(n) => finite(n.as_f64()),
            Value::String(s) => {
                let years = parse_age_years(&s);
                if years.is_none() && !s.trim().is_empty() && s.trim() != "N/A" {
                    tracing::warn!(age = %s, "unparseable age string, treating as absent");
                }
                years
            }
            _ => None,
        })
    }
}
