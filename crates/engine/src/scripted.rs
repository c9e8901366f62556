//! Deterministic in-process engine.
//!
//! Replays a fixed response script (or echoes the prompt) so the layers above
//! the runtime can be exercised without model weights.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    EngineError, EngineResponse, GenerationRequest, GenerationStats, InferenceEngine, ModelRunner,
    ResponseStream, Result,
};

#[derive(Default)]
struct Shared {
    loads: AtomicUsize,
    unloads: AtomicUsize,
    loaded_paths: Mutex<Vec<PathBuf>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

#[derive(Clone, Default)]
pub struct ScriptedEngine {
    script: Option<Vec<Result<EngineResponse>>>,
    load_error: Option<String>,
    unload_error: Option<String>,
    load_delay: Duration,
    chunk_delay: Duration,
    shared: Arc<Shared>,
}

impl ScriptedEngine {
    /// Engine that echoes the prompt text back word by word.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay `script` for every generation instead of echoing.
    pub fn with_script(mut self, script: Vec<Result<EngineResponse>>) -> Self {
        self.script = Some(script);
        self
    }

    pub fn failing_load(mut self, reason: impl Into<String>) -> Self {
        self.load_error = Some(reason.into());
        self
    }

    pub fn failing_unload(mut self, reason: impl Into<String>) -> Self {
        self.unload_error = Some(reason.into());
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Pause before every scripted response.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn load_count(&self) -> usize {
        self.shared.loads.load(Ordering::SeqCst)
    }

    pub fn unload_count(&self) -> usize {
        self.shared.unloads.load(Ordering::SeqCst)
    }

    pub fn loaded_paths(&self) -> Vec<PathBuf> {
        lock(&self.shared.loaded_paths).clone()
    }

    /// Every request passed to `generate`, oldest first.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock(&self.shared.requests).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn echo(request: &GenerationRequest) -> Vec<Result<EngineResponse>> {
    let text = request.message.text();
    let mut script: Vec<_> = text
        .split_whitespace()
        .map(|word| Ok(EngineResponse::Chunk(format!("{word} "))))
        .collect();
    script.push(Ok(EngineResponse::Complete {
        stats: Some(GenerationStats::with_tokens_per_second(42.0)),
    }));
    script
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn load(&self, model_path: &Path) -> Result<Box<dyn ModelRunner>> {
        self.shared.loads.fetch_add(1, Ordering::SeqCst);
        lock(&self.shared.loaded_paths).push(model_path.to_path_buf());

        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        if let Some(reason) = &self.load_error {
            return Err(EngineError::Load(reason.clone()));
        }

        let model_id = model_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| model_path.display().to_string());
        tracing::debug!(model_id, "Scripted model loaded");

        Ok(Box::new(ScriptedRunner {
            model_id,
            engine: self.clone(),
        }))
    }
}

struct ScriptedRunner {
    model_id: String,
    engine: ScriptedEngine,
}

#[async_trait]
impl ModelRunner for ScriptedRunner {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn generate(&self, request: GenerationRequest) -> ResponseStream {
        let script = match &self.engine.script {
            Some(script) => script.clone(),
            None => echo(&request),
        };
        lock(&self.engine.shared.requests).push(request);
        let delay = self.engine.chunk_delay;

        Box::pin(async_stream::stream! {
            for item in script {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield item;
            }
        })
    }

    async fn unload(&self) -> Result<()> {
        self.engine.shared.unloads.fetch_add(1, Ordering::SeqCst);
        match &self.engine.unload_error {
            Some(reason) => Err(EngineError::Unload(reason.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChatContent, ChatMessage, GenerationOptions};
    use futures::StreamExt;

    fn request(text: &str) -> GenerationRequest {
        GenerationRequest {
            message: ChatMessage::user(vec![ChatContent::Text(text.into())]),
            options: GenerationOptions::default(),
        }
    }

    #[tokio::test]
    async fn echoes_prompt_then_completes() {
        let engine = ScriptedEngine::new();
        let runner = engine.load(Path::new("/m/small.bundle")).await.unwrap();
        assert_eq!(runner.model_id(), "small.bundle");

        let items: Vec<_> = runner.generate(request("hello there")).collect().await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], Ok(EngineResponse::Chunk("hello ".into())));
        assert!(matches!(
            &items[2],
            Ok(EngineResponse::Complete { stats: Some(s) }) if s.tokens_per_second() == Some(42.0)
        ));
        assert_eq!(engine.requests().len(), 1);
    }

    #[tokio::test]
    async fn replays_script() {
        let engine = ScriptedEngine::new().with_script(vec![
            Ok(EngineResponse::ReasoningChunk("hmm".into())),
            Err(EngineError::Generation("boom".into())),
        ]);
        let runner = engine.load(Path::new("/m/x")).await.unwrap();
        let items: Vec<_> = runner.generate(request("ignored")).collect().await;
        assert_eq!(
            items,
            vec![
                Ok(EngineResponse::ReasoningChunk("hmm".into())),
                Err(EngineError::Generation("boom".into())),
            ]
        );
    }

    #[tokio::test]
    async fn counts_loads_and_unloads() {
        let engine = ScriptedEngine::new().failing_unload("busy");
        let runner = engine.load(Path::new("/m/a")).await.unwrap();
        assert_eq!(engine.load_count(), 1);
        assert_eq!(
            runner.unload().await,
            Err(EngineError::Unload("busy".into()))
        );
        assert_eq!(engine.unload_count(), 1);
        assert_eq!(engine.loaded_paths(), vec![PathBuf::from("/m/a")]);
    }

    #[tokio::test]
    async fn failing_load_still_counts() {
        let engine = ScriptedEngine::new().failing_load("corrupt bundle");
        let err = engine.load(Path::new("/m/a")).await.err();
        assert_eq!(err, Some(EngineError::Load("corrupt bundle".into())));
        assert_eq!(engine.load_count(), 1);
    }
}
