//! `trialkg.toml`: `[sources]` for the background graph, `[pipeline]` for
//! per-request processing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use trialkg_features::PipelineConfig;
use trialkg_graph::KgSourcesConfig;

pub const DATA_DIR_ENV: &str = "TRIALKG_DATA_DIR";
pub const DEFAULT_CONFIG_FILE: &str = "trialkg.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialkgConfig {
    #[serde(default)]
    pub sources: KgSourcesConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl TrialkgConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid trialkg configuration")
    }

    /// Load `path`, or `./trialkg.toml` when present, or defaults.
    ///
    /// The data directory comes from `data_dir` (CLI flag), else
    /// `$TRIALKG_DATA_DIR`, else the file. Relative pipeline paths are
    /// resolved against it.
    pub fn load(path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<Self> {
        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
        };
        let mut config = match &file {
            Some(p) => {
                let text = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read config {}", p.display()))?;
                Self::from_toml(&text).with_context(|| format!("in {}", p.display()))?
            }
            None => Self::default(),
        };
        let env_dir = std::env::var_os(DATA_DIR_ENV).map(PathBuf::from);
        config.apply_data_dir(data_dir.or(env_dir));
        tracing::debug!(config = ?file, data_dir = %config.sources.data_dir.display(), "configuration loaded");
        Ok(config)
    }

    pub fn apply_data_dir(&mut self, data_dir: Option<PathBuf>) {
        if let Some(dir) = data_dir {
            self.sources.data_dir = dir;
        }
        let dir = self.sources.data_dir.clone();
        self.pipeline.resolve_paths(&dir);
    }
}
