//! trialkg-features: from an annotated trial to per-arm records.
//!
//! 1. **Attachment** (`attach`): one overlay node per arm over the shared
//!    background graph, edges to every matched entity.
//! 2. **Extraction** (`extract`): arm edges resolved to kg ids, the trial
//!    attribute vector (`attributes`) and the arm text (`text`).
//! 3. **Pipeline** (`pipeline`): collaborators + attachment + extraction per
//!    request, and parallel batches over one `Arc<BackgroundKg>`.

pub mod attach;
pub mod attributes;
pub mod config;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod text;

pub use attach::{arm_key, trial_arms, ArmNode, TrialAttachment, TrialAttachmentBuilder};
pub use attributes::{
    enrollment_vec, phase_vec, sex_vec, AgeBinEncoder, AgeEncoder, TrialAttribute,
    TrialAttributeFeatures,
};
pub use config::{CriteriaTool, MedicationTool, PipelineConfig};
pub use error::{FeatureError, FeatureResult};
pub use extract::{ArmEdge, ArmRecord, FeatureExtractor};
pub use pipeline::{BatchItem, TrialPipeline};
pub use text::{arm_text, TrialText};
