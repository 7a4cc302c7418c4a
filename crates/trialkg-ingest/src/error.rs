use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The record has no arm groups at all.
    #[error("trial {nct_id} has no arms")]
    IncompleteTrial { nct_id: String },

    #[error("registry record is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid trial record: {0}")]
    InvalidRecord(#[from] serde_json::Error),

    #[error("failed to start external tool `{tool}`: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// External tool timed out or exited non-zero.
    #[error("external tool `{tool}` failed: {reason}")]
    ExternalTool { tool: String, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed output from `{tool}`: {message}")]
    ToolOutput { tool: String, message: String },
}

impl IngestError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> IngestError {
        let path = path.into();
        move |source| IngestError::Io { path, source }
    }
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;
