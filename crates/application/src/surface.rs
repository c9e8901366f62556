//! Call surface consumed by the presentation layer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tally_bridge::{
    scan_parts, to_engine_turn, BusListener, CollectingListener, ContentPart, StreamBridge,
    StreamId, StreamListener, StreamSession, DEFAULT_SCAN_PROMPT,
};
use tally_engine::{GenerationOptions, GenerationRequest, InferenceEngine};
use tally_events::EventBusRef;
use tally_models::{ModelName, ModelStore};

use crate::config::AppConfig;
use crate::controller::{ModelLifecycleController, ModelSource};
use crate::startup::{bus_progress, prepare_models};
use crate::{BridgeError, Result};

/// Lifecycle, asset and streaming operations behind one handle.
///
/// Stream events go out on the event bus under the `leap:*` topics unless a
/// caller supplies its own listener.
pub struct InferenceBridge {
    controller: ModelLifecycleController,
    streams: StreamBridge,
    bus: EventBusRef,
    defaults: GenerationOptions,
    scan_prompt: String,
}

impl InferenceBridge {
    pub fn new(store: Arc<ModelStore>, engine: Arc<dyn InferenceEngine>, bus: EventBusRef) -> Self {
        let controller = ModelLifecycleController::new(store, engine, bus.clone());
        Self {
            controller,
            streams: StreamBridge::new(),
            bus,
            defaults: GenerationOptions::default(),
            scan_prompt: DEFAULT_SCAN_PROMPT.to_string(),
        }
    }

    /// Bridge over the store, generation defaults and scan prompt of `config`.
    pub fn from_config(
        config: &AppConfig,
        engine: Arc<dyn InferenceEngine>,
        bus: EventBusRef,
    ) -> Self {
        let store = Arc::new(ModelStore::new(config.store_config()));
        Self::new(store, engine, bus)
            .with_defaults(config.generation_options())
            .with_scan_prompt(config.scan_prompt.clone())
    }

    /// Options used for fields a caller leaves unset.
    pub fn with_defaults(mut self, defaults: GenerationOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Instruction sent with a receipt photo when the caller gives none.
    pub fn with_scan_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.scan_prompt = prompt.into();
        self
    }

    pub fn controller(&self) -> &ModelLifecycleController {
        &self.controller
    }

    pub fn streams(&self) -> &StreamBridge {
        &self.streams
    }

    /// Load the bundle at `path`, replacing any other resident model.
    pub async fn load_model(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.controller
            .switch_to(ModelSource::Bundle(path.into()))
            .await
    }

    /// Load catalog model `name`, downloading it if needed and replacing any
    /// other resident model.
    pub async fn load_named(&self, name: ModelName) -> Result<()> {
        self.controller.switch_to(ModelSource::Artifact(name)).await
    }

    pub async fn unload_model(&self) -> Result<()> {
        self.controller.unload().await
    }

    /// Path of a bundled asset copied into the app files directory.
    pub async fn ensure_asset_copied(&self, asset_name: &str) -> Result<PathBuf> {
        let config = self.controller.store().config();
        Ok(tally_models::ensure_asset_copied(config, asset_name).await?)
    }

    /// Download every missing model, publishing progress on the bus.
    pub async fn prepare_models(&self) -> Result<Vec<PathBuf>> {
        prepare_models(self.controller.store(), bus_progress(self.bus.clone())).await
    }

    /// Start a generation whose events are published on the bus.
    ///
    /// Returns the stream id before any event is produced.
    pub async fn start_stream(
        &self,
        parts: &[ContentPart],
        options: Option<GenerationOptions>,
    ) -> Result<StreamId> {
        let listener = Arc::new(BusListener::new(self.bus.clone()));
        let session = self.start_stream_with(parts, options, listener).await?;
        Ok(session.id().clone())
    }

    /// Start a generation delivering events to `listener`.
    pub async fn start_stream_with(
        &self,
        parts: &[ContentPart],
        options: Option<GenerationOptions>,
        listener: Arc<dyn StreamListener>,
    ) -> Result<StreamSession> {
        let id = StreamId::new();
        let request = GenerationRequest {
            message: to_engine_turn(parts),
            options: self.merge(options),
        };
        let responses = self.controller.generate(request).await?;
        let session = self.streams.start_with_id(id, responses, listener);
        tracing::info!(stream_id = %session.id(), "Generation started");
        Ok(session)
    }

    /// Detach the listeners of `id`. Idempotent.
    pub fn stop_stream(&self, id: &StreamId) -> bool {
        self.streams.stop(id)
    }

    /// Describe a receipt photo and wait for the full summary.
    pub async fn scan_receipt(&self, image_base64: &str, prompt: Option<&str>) -> Result<String> {
        let (listener, done) = CollectingListener::new();
        let prompt = prompt.unwrap_or(&self.scan_prompt);
        let parts = scan_parts(image_base64, Some(prompt));
        let session = self
            .start_stream_with(&parts, None, Arc::new(listener))
            .await?;
        let id = session.id().clone();

        let outcome = done
            .await
            .map_err(|_| BridgeError::Stream("stream ended without a result".into()))?;
        self.streams.stop(&id);
        outcome.map_err(BridgeError::Stream)
    }

    /// Path of catalog model `name` if it is present locally.
    pub fn local_path(&self, name: ModelName) -> Result<PathBuf> {
        Ok(self.controller.store().local_path_or_fail(name)?)
    }

    pub fn models_dir(&self) -> &Path {
        self.controller.store().models_dir()
    }

    fn merge(&self, options: Option<GenerationOptions>) -> GenerationOptions {
        let Some(options) = options else {
            return self.defaults.clone();
        };
        GenerationOptions {
            system_prompt: options
                .system_prompt
                .or_else(|| self.defaults.system_prompt.clone()),
            max_tokens: options.max_tokens.or(self.defaults.max_tokens),
            temperature: options.temperature.or(self.defaults.temperature),
        }
    }
}
