//! Trial attribute feature vector (phase, enrollment, sex, age).
//!
//! The vector is trial-level: it is computed once per trial and shared by
//! every arm record. Layout follows the configured attribute order; the
//! default is `age, gender, enrollment, phase`, i.e.
//! `[min_age.., max_age.., ALL, MALE, FEMALE, ln(1+n), anticipated, NA, P1, P2, P3, P4]`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use trialkg_ingest::{Enrollment, Trial};

use crate::error::{FeatureError, FeatureResult};

pub const PHASE_SLOTS: usize = 5;
pub const ENROLLMENT_SLOTS: usize = 2;
pub const SEX_SLOTS: usize = 3;
pub const DEFAULT_AGE_BIN_EDGES: [f64; 7] = [1.0, 12.0, 18.0, 30.0, 45.0, 65.0, 75.0];

// ============================================================================
// Component vectors
// ============================================================================

/// `[NA, PHASE1, PHASE2, PHASE3, PHASE4]`, multi-hot.
pub fn phase_vec(nct_id: &str, phases: &[String]) -> FeatureResult<[f64; PHASE_SLOTS]> {
    let mut v = [0.0; PHASE_SLOTS];
    for phase in phases {
        let slot = match phase.as_str() {
            "N/A" => 0,
            "EARLY_PHASE1" | "PHASE1" => 1,
            "PHASE2" => 2,
            "PHASE3" => 3,
            "PHASE4" => 4,
            other => {
                tracing::error!(nct_id, phase = other, "unknown phase");
                return Err(FeatureError::UnknownPhase {
                    nct_id: nct_id.to_string(),
                    phase: other.to_string(),
                });
            }
        };
        v[slot] = 1.0;
    }
    Ok(v)
}

/// `[ln(1 + count), anticipated]`.
pub fn enrollment_vec(enrollment: &Enrollment) -> [f64; ENROLLMENT_SLOTS] {
    match enrollment {
        Enrollment::Reported { count, status } => {
            let anticipated = status.as_deref() == Some("ANTICIPATED");
            [count.ln_1p(), if anticipated { 1.0 } else { 0.0 }]
        }
        Enrollment::Count(count) if count.is_finite() => [count.ln_1p(), 0.0],
        _ => [0.0, 0.0],
    }
}

/// One-hot over `{ALL, MALE, FEMALE}`; anything else is all zeros.
pub fn sex_vec(sex: Option<&str>) -> [f64; SEX_SLOTS] {
    match sex {
        Some("ALL") => [1.0, 0.0, 0.0],
        Some("MALE") => [0.0, 1.0, 0.0],
        Some("FEMALE") => [0.0, 0.0, 1.0],
        _ => [0.0; SEX_SLOTS],
    }
}

// ============================================================================
// Age encoding
// ============================================================================

/// Maps an age in years to a fixed-length vector.
pub trait AgeEncoder: Send + Sync {
    fn len(&self) -> usize;
    fn encode(&self, years: f64) -> Vec<f64>;
}

/// One-hot age bins. `edges` are ascending bin boundaries; an age lands in
/// bin `i` where `i` is the number of edges `<= age`.
#[derive(Debug, Clone, PartialEq)]
pub struct AgeBinEncoder {
    edges: Vec<f64>,
}

impl AgeBinEncoder {
    pub fn new(mut edges: Vec<f64>) -> Self {
        edges.retain(|e| e.is_finite());
        edges.sort_by(f64::total_cmp);
        edges.dedup();
        Self { edges }
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }
}

impl Default for AgeBinEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_AGE_BIN_EDGES.to_vec())
    }
}

impl AgeEncoder for AgeBinEncoder {
    fn len(&self) -> usize {
        self.edges.len() + 1
    }

    fn encode(&self, years: f64) -> Vec<f64> {
        let years = if years.is_finite() { years } else { 0.0 };
        let bin = self.edges.partition_point(|e| *e <= years);
        let mut v = vec![0.0; self.len()];
        v[bin] = 1.0;
        v
    }
}

// ============================================================================
// Attribute layout
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrialAttribute {
    /// Minimum then maximum age, each through the age encoder.
    Age,
    Gender,
    Enrollment,
    Phase,
}

impl TrialAttribute {
    pub const DEFAULT_ORDER: [TrialAttribute; 4] = [
        TrialAttribute::Age,
        TrialAttribute::Gender,
        TrialAttribute::Enrollment,
        TrialAttribute::Phase,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TrialAttribute::Age => "age",
            TrialAttribute::Gender => "gender",
            TrialAttribute::Enrollment => "enrollment",
            TrialAttribute::Phase => "phase",
        }
    }
}

impl fmt::Display for TrialAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrialAttribute {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "age" => Ok(TrialAttribute::Age),
            "gender" => Ok(TrialAttribute::Gender),
            "enrollment" => Ok(TrialAttribute::Enrollment),
            "phase" => Ok(TrialAttribute::Phase),
            // `age_class` has no source vector and is rejected like any
            // other unknown name.
            other => Err(FeatureError::UnknownAttribute(other.to_string())),
        }
    }
}

/// Configured attribute order plus the age encoder.
#[derive(Clone)]
pub struct TrialAttributeFeatures {
    attributes: Vec<TrialAttribute>,
    age_encoder: Arc<dyn AgeEncoder>,
}

impl fmt::Debug for TrialAttributeFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrialAttributeFeatures")
            .field("attributes", &self.attributes)
            .field("age_len", &self.age_encoder.len())
            .finish()
    }
}

impl Default for TrialAttributeFeatures {
    fn default() -> Self {
        Self::new(
            TrialAttribute::DEFAULT_ORDER.to_vec(),
            Arc::new(AgeBinEncoder::default()),
        )
    }
}

impl TrialAttributeFeatures {
    pub fn new(attributes: Vec<TrialAttribute>, age_encoder: Arc<dyn AgeEncoder>) -> Self {
        Self {
            attributes,
            age_encoder,
        }
    }

    pub fn from_names<S: AsRef<str>>(
        names: &[S],
        age_encoder: Arc<dyn AgeEncoder>,
    ) -> FeatureResult<Self> {
        let attributes = names
            .iter()
            .map(|n| n.as_ref().parse())
            .collect::<FeatureResult<Vec<_>>>()?;
        Ok(Self::new(attributes, age_encoder))
    }

    pub fn attributes(&self) -> &[TrialAttribute] {
        &self.attributes
    }

    /// Vector length: `5 + 2 + 3 + 2 * age_len` for the four default attributes.
    pub fn len(&self) -> usize {
        self.attributes
            .iter()
            .map(|a| match a {
                TrialAttribute::Age => 2 * self.age_encoder.len(),
                TrialAttribute::Gender => SEX_SLOTS,
                TrialAttribute::Enrollment => ENROLLMENT_SLOTS,
                TrialAttribute::Phase => PHASE_SLOTS,
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn featurize(&self, trial: &Trial) -> FeatureResult<Vec<f64>> {
        // Phase is validated even when not part of the layout.
        let phase = phase_vec(&trial.nct_id, &trial.phase)?;
        let mut feats = Vec::with_capacity(self.len());
        for attribute in &self.attributes {
            match attribute {
                TrialAttribute::Age => {
                    feats.extend(self.age_encoder.encode(trial.minimum_age.unwrap_or(0.0)));
                    feats.extend(self.age_encoder.encode(trial.maximum_age.unwrap_or(0.0)));
                }
                TrialAttribute::Gender => feats.extend(sex_vec(trial.gender_sex.as_deref())),
                TrialAttribute::Enrollment => feats.extend(enrollment_vec(&trial.enrollment)),
                TrialAttribute::Phase => feats.extend(phase),
            }
        }
        Ok(feats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn phases(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn phase_vector_slots() {
        assert_eq!(phase_vec("T", &phases(&["PHASE3"])).unwrap(), [0.0, 0.0, 0.0, 1.0, 0.0]);
        assert_eq!(
            phase_vec("T", &phases(&["EARLY_PHASE1", "PHASE2"])).unwrap(),
            [0.0, 1.0, 1.0, 0.0, 0.0]
        );
        assert_eq!(phase_vec("T", &phases(&["N/A"])).unwrap(), [1.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(phase_vec("T", &[]).unwrap(), [0.0; 5]);
    }

    #[test]
    fn unknown_phase_fails_fast() {
        match phase_vec("NCT1", &phases(&["PHASE2", "PHASE5"])) {
            Err(FeatureError::UnknownPhase { nct_id, phase }) => {
                assert_eq!(nct_id, "NCT1");
                assert_eq!(phase, "PHASE5");
            }
            other => panic!("expected UnknownPhase, got {other:?}"),
        }
        assert!(phase_vec("T", &phases(&["NA"])).is_err());
    }

    #[test]
    fn enrollment_vector() {
        let estimated = Enrollment::Reported {
            count: 160.0,
            status: Some("ESTIMATED".into()),
        };
        let v = enrollment_vec(&estimated);
        assert_relative_eq!(v[0], 161f64.ln());
        assert_eq!(v[1], 0.0);

        let anticipated = Enrollment::Reported {
            count: 50.0,
            status: Some("ANTICIPATED".into()),
        };
        let v = enrollment_vec(&anticipated);
        assert_relative_eq!(v[0], 51f64.ln());
        assert_eq!(v[1], 1.0);

        assert_eq!(enrollment_vec(&Enrollment::Missing), [0.0, 0.0]);
        assert_eq!(enrollment_vec(&Enrollment::Count(f64::NAN)), [0.0, 0.0]);
        let bare = enrollment_vec(&Enrollment::Count(9.0));
        assert_relative_eq!(bare[0], 10f64.ln());
        assert_eq!(bare[1], 0.0);
    }

    #[test]
    fn sex_vector() {
        assert_eq!(sex_vec(Some("ALL")), [1.0, 0.0, 0.0]);
        assert_eq!(sex_vec(Some("MALE")), [0.0, 1.0, 0.0]);
        assert_eq!(sex_vec(Some("FEMALE")), [0.0, 0.0, 1.0]);
        assert_eq!(sex_vec(None), [0.0, 0.0, 0.0]);
        assert_eq!(sex_vec(Some("OTHER")), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn age_bins() {
        let enc = AgeBinEncoder::default();
        assert_eq!(enc.len(), 8);
        assert_eq!(enc.encode(0.0)[0], 1.0);
        assert_eq!(enc.encode(18.0)[3], 1.0);
        assert_eq!(enc.encode(17.9)[2], 1.0);
        assert_eq!(enc.encode(90.0)[7], 1.0);
        assert_eq!(enc.encode(f64::NAN)[0], 1.0);
        assert_eq!(enc.encode(40.0).iter().sum::<f64>(), 1.0);
    }

    #[test]
    fn attribute_names_parse_and_reject_unknown() {
        let enc: Arc<dyn AgeEncoder> = Arc::new(AgeBinEncoder::default());
        let f = TrialAttributeFeatures::from_names(&["age", "gender", "enrollment", "phase"], enc.clone())
            .unwrap();
        assert_eq!(f.attributes(), &TrialAttribute::DEFAULT_ORDER);
        assert!(matches!(
            TrialAttributeFeatures::from_names(&["age", "age_class"], enc),
            Err(FeatureError::UnknownAttribute(name)) if name == "age_class"
        ));
    }

    #[test]
    fn featurize_default_layout() {
        let trial = Trial {
            nct_id: "NCT01007279".into(),
            phase: phases(&["PHASE3"]),
            enrollment: Enrollment::Reported {
                count: 160.0,
                status: Some("ESTIMATED".into()),
            },
            gender_sex: Some("ALL".into()),
            minimum_age: Some(18.0),
            maximum_age: None,
            ..Trial::default()
        };
        let f = TrialAttributeFeatures::default();
        let v = f.featurize(&trial).unwrap();
        assert_eq!(v.len(), 5 + 2 + 3 + 2 * 8);
        assert_eq!(v.len(), f.len());
        // min age 18 -> bin 3, max age absent -> bin 0
        assert_eq!(v[3], 1.0);
        assert_eq!(v[8], 1.0);
        assert_eq!(&v[16..19], &[1.0, 0.0, 0.0]);
        assert_relative_eq!(v[19], 161f64.ln());
        assert_eq!(v[20], 0.0);
        assert_eq!(&v[21..26], &[0.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn custom_order_changes_layout_only() {
        let trial = Trial {
            phase: phases(&["PHASE1"]),
            gender_sex: Some("FEMALE".into()),
            ..Trial::default()
        };
        let f = TrialAttributeFeatures::new(
            vec![TrialAttribute::Phase, TrialAttribute::Gender],
            Arc::new(AgeBinEncoder::default()),
        );
        assert_eq!(
            f.featurize(&trial).unwrap(),
            vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]
        );
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        const PHASES: [&str; 6] = ["N/A", "EARLY_PHASE1", "PHASE1", "PHASE2", "PHASE3", "PHASE4"];

        fn trial_strategy() -> impl Strategy<Value = Trial> {
            (
                prop::collection::vec(prop::sample::select(PHASES.to_vec()), 0..4),
                prop::option::of(0.0f64..120.0),
                prop::option::of(0.0f64..120.0),
                prop::option::of(0.0f64..1e6),
                prop::option::of(prop::sample::select(vec!["ALL", "MALE", "FEMALE", "X"])),
            )
                .prop_map(|(phase, min, max, count, sex)| Trial {
                    nct_id: "NCT00000001".into(),
                    phase: phase.into_iter().map(str::to_string).collect(),
                    minimum_age: min,
                    maximum_age: max,
                    enrollment: count.map(Enrollment::Count).unwrap_or_default(),
                    gender_sex: sex.map(str::to_string),
                    ..Trial::default()
                })
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                failure_persistence: None,
                ..ProptestConfig::default()
            })]

            #[test]
            fn vector_shape_is_input_independent(trial in trial_strategy()) {
                let f = TrialAttributeFeatures::default();
                let v = f.featurize(&trial).unwrap();
                prop_assert_eq!(v.len(), f.len());
                prop_assert!(v.iter().all(|x| x.is_finite() && *x >= 0.0));
                // Both age blocks are one-hot.
                prop_assert_eq!(v[..8].iter().sum::<f64>(), 1.0);
                prop_assert_eq!(v[8..16].iter().sum::<f64>(), 1.0);
                prop_assert!(v[16..19].iter().sum::<f64>() <= 1.0);
                prop_assert!(v[21..26].iter().all(|x| *x == 0.0 || *x == 1.0));
            }
        }
    }
}
