//! Contract of the in-process inference runtime.
//!
//! The runtime itself is a black box: it loads a model bundle from disk and,
//! for a loaded model, turns one conversation turn into an asynchronous
//! sequence of typed responses.

mod engine;
pub mod scripted;
mod types;

pub use engine::{InferenceEngine, ModelRunner, ResponseStream};
pub use scripted::ScriptedEngine;
pub use types::{
    ChatContent, ChatMessage, EngineResponse, FunctionCall, GenerationOptions, GenerationRequest,
    GenerationStats, ImageContent, Role, TPS_ALIASES,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("failed to load model: {0}")]
    Load(String),
    #[error("failed to unload model: {0}")]
    Unload(String),
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("invalid image: {0}")]
    Image(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
