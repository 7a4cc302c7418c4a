use std::path::PathBuf;

/// Errors raised while building or querying the background knowledge graph.
#[derive(Debug, thiserror::Error)]
pub enum KgError {
    /// A required source file was not found. Fatal at startup.
    #[error("required data source missing: {path}")]
    DataSourceMissing { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record in {path} at line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// The representative of `entity` has no compact id. This means the
    /// compact-id table is stale relative to the merge edges applied.
    #[error("entity `{entity}` (representative `{representative}`) has no compact kg id")]
    UnknownEntity {
        entity: String,
        representative: String,
    },

    /// A loaded compact-id table assigns two different ids to one class.
    #[error("compact id table assigns both {first} and {second} to the class of `{representative}`")]
    CompactIdConflict {
        representative: String,
        first: u32,
        second: u32,
    },

    #[error("overlay node key `{0}` collides with a background entity id")]
    OverlayKeyCollision(String),
}

pub type KgResult<T> = std::result::Result<T, KgError>;
