use serde::{Serialize, Serializer};
use tally_engine::EngineError;
use tally_models::ModelError;

/// Failure surfaced synchronously to callers of the bridge call surface.
///
/// `Clone` so a single load outcome can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    #[error("model {0} not found locally, download it first")]
    NotFound(String),

    #[error("model download failed ({0})")]
    DownloadFailed(String),

    #[error("failed to load model: {0}")]
    LoadFailed(String),

    #[error("failed to unload model: {0}")]
    UnloadFailed(String),

    #[error("No model loaded")]
    NoModelLoaded,

    #[error("model {loaded} is loaded, unload it before loading {requested}")]
    OtherModelLoaded { loaded: String, requested: String },

    #[error("bundled asset not found: {0}")]
    AssetMissing(String),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("inference engine error: {0}")]
    Engine(String),

    /// Terminal error of a stream awaited to completion.
    #[error("generation failed: {0}")]
    Stream(String),

    #[error("io error: {0}")]
    Io(String),
}

impl Serialize for BridgeError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<ModelError> for BridgeError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::NotFound(name) => BridgeError::NotFound(name.to_string()),
            ModelError::DownloadFailed(reason) => BridgeError::DownloadFailed(reason.to_string()),
            ModelError::AssetMissing(name) => BridgeError::AssetMissing(name),
            ModelError::UnknownModel(name) => BridgeError::UnknownModel(name),
            ModelError::IoError(e) => BridgeError::Io(e.to_string()),
        }
    }
}

impl From<EngineError> for BridgeError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Load(reason) => BridgeError::LoadFailed(reason),
            EngineError::Unload(reason) => BridgeError::UnloadFailed(reason),
            other => BridgeError::Engine(other.to_string()),
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
