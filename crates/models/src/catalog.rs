//! Artifact catalog.
//!
//! Separates the static identity of each artifact (remote URL, file name)
//! from where it lands on this machine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::{ModelName, TEMP_SUFFIX};

/// Compile-time description of a downloadable artifact.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactSpec {
    pub name: ModelName,
    pub remote_url: &'static str,
    pub file_name: &'static str,
}

/// Both vision-language bundles, smallest first.
pub static ARTIFACTS: &[ArtifactSpec] = &[
    ArtifactSpec {
        name: ModelName::Small,
        remote_url:
            "https://huggingface.co/LiquidAI/LeapBundles/resolve/main/LFM2-VL-450M_8da4w.bundle",
        file_name: "lfm2-vl-450m.bundle",
    },
    ArtifactSpec {
        name: ModelName::Large,
        remote_url:
            "https://huggingface.co/LiquidAI/LeapBundles/resolve/main/LFM2-VL-1_6B_8da4w.bundle",
        file_name: "LFM2-VL-1_6B_8da4w.bundle",
    },
];

/// A resolved artifact. Built once when the store is created, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
    pub name: ModelName,
    pub remote_url: String,
    pub local_path: PathBuf,
    /// Total size is only learned from the response headers.
    pub size_known_at_runtime: bool,
}

impl ModelArtifact {
    pub fn new(name: ModelName, remote_url: impl Into<String>, local_path: PathBuf) -> Self {
        Self {
            name,
            remote_url: remote_url.into(),
            local_path,
            size_known_at_runtime: true,
        }
    }

    /// Where bytes are written before the final rename.
    pub fn temp_path(&self) -> PathBuf {
        let mut file_name = self
            .local_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        file_name.push(".");
        file_name.push(TEMP_SUFFIX);
        self.local_path.with_file_name(file_name)
    }
}

/// Mapping from every logical name to its resolved artifact.
#[derive(Debug, Clone)]
pub struct Catalog {
    artifacts: BTreeMap<ModelName, ModelArtifact>,
}

impl Catalog {
    /// Resolve the built-in artifacts against `models_dir`.
    pub fn resolve(models_dir: &Path) -> Self {
        Self::from_artifacts(
            ARTIFACTS
                .iter()
                .map(|entry| {
                    let local_path = models_dir.join(entry.file_name);
                    ModelArtifact::new(entry.name, entry.remote_url, local_path)
                })
                .collect(),
        )
    }

    /// Build a catalog from explicit artifacts. Later entries for the same
    /// name replace earlier ones.
    pub fn from_artifacts(artifacts: Vec<ModelArtifact>) -> Self {
        Self {
            artifacts: artifacts.into_iter().map(|a| (a.name, a)).collect(),
        }
    }

    pub fn get(&self, name: ModelName) -> Option<&ModelArtifact> {
        self.artifacts.get(&name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelArtifact> {
        self.artifacts.values()
    }

    pub fn names(&self) -> impl Iterator<Item = ModelName> + '_ {
        self.artifacts.keys().copied()
    }
}
