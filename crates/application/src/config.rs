//! Application configuration, read from an optional JSON file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tally_bridge::DEFAULT_SCAN_PROMPT;
use tally_engine::GenerationOptions;
use tally_models::{StoreConfig, DEFAULT_PROGRESS_STEP};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Overrides the platform data directory for downloaded models.
    pub models_dir: Option<PathBuf>,
    /// Root of bundled assets (expects a `models/` subdirectory).
    pub assets_dir: Option<PathBuf>,
    pub files_dir: Option<PathBuf>,
    pub progress_step: u8,
    pub system_prompt: Option<String>,
    pub scan_prompt: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            models_dir: None,
            assets_dir: None,
            files_dir: None,
            progress_step: DEFAULT_PROGRESS_STEP,
            system_prompt: None,
            scan_prompt: DEFAULT_SCAN_PROMPT.to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` if given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        let defaults = StoreConfig::default();
        StoreConfig {
            models_dir: self.models_dir.clone().unwrap_or(defaults.models_dir),
            assets_dir: self.assets_dir.clone().or(defaults.assets_dir),
            files_dir: self.files_dir.clone().unwrap_or(defaults.files_dir),
            progress_step: self.progress_step,
        }
    }

    /// Generation defaults applied to every stream.
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            system_prompt: self.system_prompt.clone(),
            ..GenerationOptions::default()
        }
    }
}
