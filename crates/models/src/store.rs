use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::catalog::{Catalog, ModelArtifact};
use crate::download::download_file;
use crate::tracker::DownloadTracker;
use crate::{ModelError, ModelName, Result, StoreConfig};

/// Resolves, checks and fetches model artifacts on local storage.
///
/// Presence is purely "the final file exists"; content is never inspected.
/// Downloads of the same artifact are serialized, different artifacts may
/// download concurrently.
pub struct ModelStore {
    config: StoreConfig,
    catalog: Catalog,
    client: reqwest::Client,
    downloads: DownloadTracker,
}

impl ModelStore {
    /// Store over the built-in catalog.
    pub fn new(config: StoreConfig) -> Self {
        let catalog = Catalog::resolve(&config.models_dir);
        Self::with_catalog(config, catalog)
    }

    /// Store over an explicit catalog, e.g. one pointing at a mirror.
    pub fn with_catalog(config: StoreConfig, catalog: Catalog) -> Self {
        tracing::debug!("Models directory: {:?}", config.models_dir);
        Self {
            config,
            catalog,
            client: reqwest::Client::new(),
            downloads: DownloadTracker::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn models_dir(&self) -> &Path {
        &self.config.models_dir
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn artifact(&self, name: ModelName) -> Result<&ModelArtifact> {
        self.catalog
            .get(name)
            .ok_or_else(|| ModelError::UnknownModel(name.to_string()))
    }

    /// Final on-disk location of `name`, whether or not it exists yet.
    pub fn local_path(&self, name: ModelName) -> Result<&Path> {
        Ok(&self.artifact(name)?.local_path)
    }

    /// Existence check of the final path only.
    pub fn is_downloaded(&self, name: ModelName) -> bool {
        self.catalog
            .get(name)
            .map(|a| a.local_path.exists())
            .unwrap_or(false)
    }

    /// Every catalog model not currently present locally.
    pub fn missing(&self) -> BTreeSet<ModelName> {
        self.catalog
            .names()
            .filter(|name| !self.is_downloaded(*name))
            .collect()
    }

    pub fn all_downloaded(&self) -> bool {
        self.missing().is_empty()
    }

    /// Path of a present artifact. Never downloads.
    pub fn local_path_or_fail(&self, name: ModelName) -> Result<PathBuf> {
        let artifact = self.artifact(name)?;
        if artifact.local_path.exists() {
            Ok(artifact.local_path.clone())
        } else {
            Err(ModelError::NotFound(name))
        }
    }

    /// Make `name` present locally and return its path.
    ///
    /// Returns immediately without network access if the artifact is already
    /// there. `on_progress` receives percentages in [0, 100] at coarse
    /// granularity.
    pub async fn download<F>(&self, name: ModelName, on_progress: F) -> Result<PathBuf>
    where
        F: Fn(u8) + Send + Sync,
    {
        let artifact = self.artifact(name)?.clone();

        if artifact.local_path.exists() {
            tracing::debug!(model = %name, "Already downloaded");
            return Ok(artifact.local_path);
        }

        let mut slot = self.downloads.acquire(name).await;

        // Another caller may have finished while we waited for the slot.
        if artifact.local_path.exists() {
            tracing::debug!(model = %name, "Downloaded by a concurrent caller");
            return Ok(artifact.local_path);
        }

        let cancel = slot.begin_transfer();
        tracing::info!(model = %name, url = %artifact.remote_url, "Downloading model");

        let result = download_file(
            &self.client,
            &artifact.remote_url,
            &artifact.temp_path(),
            &artifact.local_path,
            self.config.clamped_progress_step(),
            &cancel,
            &on_progress,
        )
        .await;

        drop(slot);

        match result {
            Ok(bytes) => {
                tracing::info!(
                    model = %name,
                    bytes,
                    path = ?artifact.local_path,
                    "Download complete"
                );
                Ok(artifact.local_path)
            }
            Err(e) => {
                tracing::error!(model = %name, "Download failed: {}", e);
                Err(e)
            }
        }
    }

    /// Cancel a running download of `name`.
    ///
    /// Returns true if a download was running.
    pub fn cancel_download(&self, name: ModelName) -> bool {
        let cancelled = self.downloads.cancel(name);
        if cancelled {
            tracing::info!(model = %name, "Download cancellation requested");
        }
        cancelled
    }

    pub fn is_downloading(&self, name: ModelName) -> bool {
        self.downloads.is_running(name)
    }

    /// Remove the final file and any partial download of `name`.
    pub async fn delete(&self, name: ModelName) -> Result<()> {
        let artifact = self.artifact(name)?;
        let _slot = self.downloads.acquire(name).await;

        for path in [artifact.local_path.clone(), artifact.temp_path()] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::info!(model = %name, "Deleted {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
