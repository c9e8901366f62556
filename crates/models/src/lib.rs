//! Local model artifacts: where they live, whether they are present,
//! and how they get there.

mod assets;
mod catalog;
mod download;
mod store;
mod tracker;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use assets::ensure_asset_copied;
pub use catalog::{ArtifactSpec, Catalog, ModelArtifact, ARTIFACTS};
pub use store::ModelStore;
pub use tracker::{DownloadSlot, DownloadTracker};

/// Suffix appended to the final file name while a transfer is in flight.
pub const TEMP_SUFFIX: &str = "download";

/// Default progress granularity in percent.
pub const DEFAULT_PROGRESS_STEP: u8 = 10;

/// Why a download did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadFailure {
    /// The server answered outside of [200, 400).
    Status(u16),
    /// The connection failed or dropped mid-transfer.
    Transport(String),
    /// The download was cancelled through [`ModelStore::cancel_download`].
    Cancelled,
}

impl fmt::Display for DownloadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(code) => write!(f, "status {code}"),
            Self::Transport(reason) => write!(f, "{reason}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model {0} not found locally, download it first")]
    NotFound(ModelName),
    #[error("model download failed ({0})")]
    DownloadFailed(DownloadFailure),
    #[error("bundled asset not found: {0}")]
    AssetMissing(String),
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;

/// Logical model names. Each one is bound to exactly one remote URL and one
/// local file for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelName {
    /// Fast 450M vision-language variant.
    Small,
    /// Accurate 1.6B vision-language variant.
    Large,
}

impl ModelName {
    pub const ALL: [ModelName; 2] = [ModelName::Small, ModelName::Large];

    pub fn id(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Large => "large",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Small => "LFM2-VL-450M",
            Self::Large => "LFM2-VL-1.6B",
        }
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ModelName {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" | "450m" | "lfm2-vl-450m" => Ok(Self::Small),
            "large" | "1.6b" | "lfm2-vl-1.6b" => Ok(Self::Large),
            _ => Err(ModelError::UnknownModel(s.to_string())),
        }
    }
}

/// Filesystem and transfer settings for a [`ModelStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding downloaded artifacts.
    pub models_dir: PathBuf,
    /// Root of bundled read-only assets, if the build ships any.
    pub assets_dir: Option<PathBuf>,
    /// App-private directory bundled assets are copied into.
    pub files_dir: PathBuf,
    /// Progress is reported each time the percentage advances by this much.
    pub progress_step: u8,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tally");
        Self {
            models_dir: base.join("models"),
            assets_dir: None,
            files_dir: base.join("files"),
            progress_step: DEFAULT_PROGRESS_STEP,
        }
    }
}

impl StoreConfig {
    /// Config rooted at a single directory; handy for tests and portable installs.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            models_dir: root.join("models"),
            assets_dir: None,
            files_dir: root.join("files"),
            progress_step: DEFAULT_PROGRESS_STEP,
        }
    }

    pub(crate) fn clamped_progress_step(&self) -> u8 {
        self.progress_step.clamp(1, 100)
    }
}
