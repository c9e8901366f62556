//! Event contracts for the presentation boundary.
//!
//! Every payload is a typed DTO so producers and consumers cannot drift on
//! field names. Stream events carry the `streamId` of the generation they
//! belong to, so a consumer juggling several sessions can filter.

mod bus;

pub use bus::{
    publish, EmittedEvent, EventBus, EventBusRef, InMemoryEventBus, NullEventBus, TracingEventBus,
};

use serde::{Deserialize, Serialize};
use tally_models::ModelName;

/// A piece of generated text.
///
/// Producers: stream bridge
/// Consumers: presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunkEvent {
    pub stream_id: String,
    pub text: String,
}

/// A piece of the model's reasoning trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamReasoningEvent {
    pub stream_id: String,
    pub text: String,
}

/// The model requested a batch of function calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallsEvent {
    pub stream_id: String,
    pub count: usize,
}

/// Generation finished normally. Terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDoneEvent {
    pub stream_id: String,
    /// Tokens per second, when the runtime reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tps: Option<f64>,
}

/// Generation failed. Terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamErrorEvent {
    pub stream_id: String,
    pub error: String,
}

/// Coarse download progress for one artifact.
///
/// Producers: lifecycle controller, model preparation
/// Consumers: presentation layer (download overlay)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgressEvent {
    pub model: ModelName,
    pub percent: u8,
}

/// The lifecycle controller changed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStateChangedEvent {
    /// One of "unloaded", "loading", "ready", "unloading", "load_failed".
    pub state: String,
    /// Model the state refers to, if any.
    #[serde(default)]
    pub model: Option<String>,
    /// Failure reason for "load_failed".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Timestamp in milliseconds.
    #[serde(default)]
    pub timestamp_ms: i64,
}

impl ModelStateChangedEvent {
    pub fn now(state: impl Into<String>, model: Option<String>, reason: Option<String>) -> Self {
        Self {
            state: state.into(),
            model,
            reason,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Event names as constants to prevent typos.
pub mod event_names {
    /// Text chunk of a generation.
    pub const STREAM_CHUNK: &str = "leap:chunk";
    /// Reasoning chunk of a generation.
    pub const STREAM_REASONING: &str = "leap:reasoning";
    /// Function-call batch of a generation.
    pub const STREAM_FUNCTION_CALLS: &str = "leap:function_calls";
    /// Normal completion of a generation.
    pub const STREAM_DONE: &str = "leap:done";
    /// Failure of a generation.
    pub const STREAM_ERROR: &str = "leap:error";
    /// Download progress.
    pub const DOWNLOAD_PROGRESS: &str = "models:download_progress";
    /// Lifecycle state change.
    pub const MODEL_STATE_CHANGED: &str = "models:state_changed";
}
