//! trialkg-ingest: everything between a raw trial record and the
//! attachment step.
//!
//! - `trial`: the parsed trial model with lenient field decoding.
//! - `registry`: registry study JSON -> [`Trial`] via a path table.
//! - `age`: registry age strings to years.
//! - `tool`: deadline-bounded external process runner.
//! - `medex`, `criteria`: adapters for the medication and eligibility tools.
//! - `matcher`: drug/disease id matching behind traits.

pub mod age;
pub mod criteria;
pub mod error;
pub mod matcher;
pub mod medex;
pub mod registry;
pub mod tool;
pub mod trial;

pub use age::parse_age_years;
pub use criteria::{CriteriaConfig, CriteriaParser};
pub use error::{IngestError, IngestResult};
pub use matcher::{annotate_diseases, annotate_drugs, DiseaseMatcher, DrugMatcher, Lexicon};
pub use medex::{MedexConfig, MedicationExtractor};
pub use registry::parse_study;
pub use tool::{run_tool, ToolOutcome, ToolSpec};
pub use trial::{
    Arm, EligibilityCriterion, Enrollment, Intervention, MedicationMention, MeshTerm, Outcome,
    Trial,
};
