use std::path::Path;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{EngineResponse, GenerationRequest, Result};

/// Responses of one generation, in the order the runtime produced them.
///
/// An `Err` item is terminal: consumers stop reading after it.
pub type ResponseStream = BoxStream<'static, Result<EngineResponse>>;

/// Loads model bundles into memory.
///
/// Implementations wrap a concrete runtime. The application layer depends on
/// this abstraction only.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Human-readable name of the runtime.
    fn name(&self) -> &str;

    /// Load the bundle at `model_path` and return the resident model.
    async fn load(&self, model_path: &Path) -> Result<Box<dyn ModelRunner>>;
}

/// A model resident in memory.
#[async_trait]
pub trait ModelRunner: Send + Sync {
    fn model_id(&self) -> &str;

    /// Start a fresh conversation and generate a response to `request`.
    ///
    /// The returned stream is lazy: no work happens until it is polled, and
    /// it does not borrow the runner.
    fn generate(&self, request: GenerationRequest) -> ResponseStream;

    /// Release the model's memory. The runner must not be used afterwards.
    async fn unload(&self) -> Result<()>;
}
