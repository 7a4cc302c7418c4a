use trialkg_graph::KgError;
use trialkg_ingest::IngestError;

/// Per-request failures. None of these leave shared state modified.
#[derive(Debug, thiserror::Error)]
pub enum FeatureError {
    #[error("trial {nct_id} has no arms")]
    IncompleteTrial { nct_id: String },

    /// A phase string outside the known vocabulary. Not defaulted: it means
    /// the input schema drifted from what the encoder expects.
    #[error("unknown phase `{phase}` in trial {nct_id}")]
    UnknownPhase { nct_id: String, phase: String },

    #[error(transparent)]
    Graph(#[from] KgError),

    /// External NLP tool failed or timed out. Safe to retry.
    #[error("external tool `{tool}` failed: {reason}")]
    ExternalTool { tool: String, reason: String },

    #[error(transparent)]
    Ingest(IngestError),

    #[error("unknown trial attribute `{0}` in feature configuration")]
    UnknownAttribute(String),
}

impl From<IngestError> for FeatureError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::IncompleteTrial { nct_id } => FeatureError::IncompleteTrial { nct_id },
            IngestError::ExternalTool { tool, reason } => FeatureError::ExternalTool { tool, reason },
            other => FeatureError::Ingest(other),
        }
    }
}

pub type FeatureResult<T> = std::result::Result<T, FeatureError>;
