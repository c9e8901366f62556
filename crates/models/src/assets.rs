//! Fallback for model bundles shipped inside the application package.

use std::path::{Component, Path, PathBuf};

use crate::{ModelError, Result, StoreConfig, TEMP_SUFFIX};

/// Copy `<assets_dir>/models/<asset_name>` into the app files directory if it
/// is not there yet, and return the absolute destination path.
pub async fn ensure_asset_copied(config: &StoreConfig, asset_name: &str) -> Result<PathBuf> {
    if !is_plain_file_name(asset_name) {
        return Err(ModelError::AssetMissing(asset_name.to_string()));
    }

    let dest = absolute(&config.files_dir.join(asset_name))?;
    if dest.exists() {
        tracing::debug!("Asset {} already copied to {:?}", asset_name, dest);
        return Ok(dest);
    }

    let source = config
        .assets_dir
        .as_ref()
        .map(|dir| dir.join("models").join(asset_name))
        .filter(|p| p.is_file())
        .ok_or_else(|| ModelError::AssetMissing(asset_name.to_string()))?;

    tokio::fs::create_dir_all(&config.files_dir).await?;

    let temp = dest.with_file_name(format!("{asset_name}.{TEMP_SUFFIX}"));
    if let Err(e) = tokio::fs::copy(&source, &temp).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&temp, &dest).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e.into());
    }

    tracing::info!("Copied bundled asset {} to {:?}", asset_name, dest);
    Ok(dest)
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
