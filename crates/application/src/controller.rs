//! Owner of the single resident model.
//!
//! State machine: `Unloaded -> Loading -> Ready -> Unloading -> Unloaded`,
//! with `LoadFailed` as a transient state on the way back to `Unloaded`.
//! Transitions are strictly sequential; concurrent requests for the same
//! model share one load.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use tally_engine::{EngineError, GenerationRequest, InferenceEngine, ModelRunner, ResponseStream};
use tally_events::{
    event_names, publish, DownloadProgressEvent, EventBusRef, ModelStateChangedEvent,
};
use tally_models::{ModelName, ModelStore};
use tokio::sync::{watch, Mutex};

use crate::{BridgeError, Result};

/// What to load: a catalog artifact (downloaded on demand) or a bundle
/// already on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelSource {
    Artifact(ModelName),
    Bundle(PathBuf),
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Artifact(name) => write!(f, "{name}"),
            Self::Bundle(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Unloaded,
    Loading(ModelSource),
    Ready(ModelSource),
    Unloading(ModelSource),
    LoadFailed { source: ModelSource, reason: String },
}

impl LifecycleState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loading(_) => "loading",
            Self::Ready(_) => "ready",
            Self::Unloading(_) => "unloading",
            Self::LoadFailed { .. } => "load_failed",
        }
    }

    pub fn source(&self) -> Option<&ModelSource> {
        match self {
            Self::Unloaded => None,
            Self::Loading(source) | Self::Ready(source) | Self::Unloading(source) => Some(source),
            Self::LoadFailed { source, .. } => Some(source),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

struct LoadedModel {
    source: ModelSource,
    path: PathBuf,
    runner: Box<dyn ModelRunner>,
}

type LoadOutcome = Shared<BoxFuture<'static, Result<()>>>;

struct Inner {
    store: Arc<ModelStore>,
    engine: Arc<dyn InferenceEngine>,
    bus: EventBusRef,
    /// Held for the whole of every transition.
    resident: Mutex<Option<LoadedModel>>,
    in_flight: StdMutex<HashMap<ModelSource, (u64, LoadOutcome)>>,
    next_ticket: AtomicU64,
    status: watch::Sender<LifecycleState>,
}

/// Loads at most one model at a time and owns its handle.
///
/// Cheap to clone; clones share state. Transitions run on spawned tasks so a
/// caller that goes away mid-load cannot leave the state machine half way.
#[derive(Clone)]
pub struct ModelLifecycleController {
    inner: Arc<Inner>,
}

impl ModelLifecycleController {
    pub fn new(store: Arc<ModelStore>, engine: Arc<dyn InferenceEngine>, bus: EventBusRef) -> Self {
        let (status, _) = watch::channel(LifecycleState::Unloaded);
        Self {
            inner: Arc::new(Inner {
                store,
                engine,
                bus,
                resident: Mutex::new(None),
                in_flight: StdMutex::new(HashMap::new()),
                next_ticket: AtomicU64::new(0),
                status,
            }),
        }
    }

    pub fn store(&self) -> &Arc<ModelStore> {
        &self.inner.store
    }

    pub fn status(&self) -> LifecycleState {
        self.inner.status.borrow().clone()
    }

    /// Observe every state change.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.inner.status.subscribe()
    }

    /// Source of the resident model, if one is ready.
    pub fn loaded(&self) -> Option<ModelSource> {
        match self.status() {
            LifecycleState::Ready(source) => Some(source),
            _ => None,
        }
    }

    /// Make catalog model `name` resident, downloading it first if missing.
    pub async fn ensure_loaded(&self, name: ModelName) -> Result<()> {
        self.ensure_source(ModelSource::Artifact(name)).await
    }

    /// Make the bundle at `path` resident.
    pub async fn load_path(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.ensure_source(ModelSource::Bundle(path.into())).await
    }

    /// Make `source` resident.
    ///
    /// Succeeds immediately if it already is. Fails with `OtherModelLoaded`
    /// if a different model is resident.
    pub async fn ensure_source(&self, source: ModelSource) -> Result<()> {
        let outcome = {
            let mut in_flight = lock(&self.inner.in_flight);
            match in_flight.get(&source) {
                Some((_, outcome)) => {
                    tracing::debug!(model = %source, "Joining load already in progress");
                    outcome.clone()
                }
                None => {
                    let ticket = self.inner.next_ticket.fetch_add(1, Ordering::SeqCst);
                    let outcome = self.spawn_load(source.clone(), ticket);
                    in_flight.insert(source, (ticket, outcome.clone()));
                    outcome
                }
            }
        };
        outcome.await
    }

    fn spawn_load(&self, source: ModelSource, ticket: u64) -> LoadOutcome {
        let inner = Arc::clone(&self.inner);
        let task_source = source.clone();
        let task = tokio::spawn(async move {
            let result = inner.load(&task_source).await;
            inner.clear_in_flight(&task_source, ticket);
            result
        });

        let inner = Arc::clone(&self.inner);
        async move {
            let result = task.await.unwrap_or_else(|e| {
                Err(BridgeError::LoadFailed(format!("load task failed: {e}")))
            });
            inner.clear_in_flight(&source, ticket);
            result
        }
        .boxed()
        .shared()
    }

    /// Unload whatever model is resident; no-op if none is.
    ///
    /// The handle is discarded even if the runtime reports a failure.
    pub async fn unload(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut resident = inner.resident.lock().await;
            inner.unload_locked(&mut resident).await
        })
        .await
        .unwrap_or_else(|e| Err(BridgeError::UnloadFailed(format!("unload task failed: {e}"))))
    }

    /// Make `source` resident, unloading a different resident model first.
    pub async fn switch_to(&self, source: ModelSource) -> Result<()> {
        match self.ensure_source(source.clone()).await {
            Err(BridgeError::OtherModelLoaded { loaded, .. }) => {
                tracing::info!(from = %loaded, to = %source, "Switching model");
                self.unload().await?;
                self.ensure_source(source).await
            }
            other => other,
        }
    }

    /// Start a generation on the resident model.
    ///
    /// Fails fast with `NoModelLoaded` unless a model is ready.
    pub async fn generate(&self, request: GenerationRequest) -> Result<ResponseStream> {
        if !self.status().is_ready() {
            return Err(BridgeError::NoModelLoaded);
        }
        let resident = self.inner.resident.lock().await;
        let loaded = resident.as_ref().ok_or(BridgeError::NoModelLoaded)?;
        tracing::debug!(model = %loaded.source, path = ?loaded.path, "Starting generation");
        Ok(loaded.runner.generate(request))
    }

    /// Delete a downloaded artifact, unloading it first if it is resident.
    pub async fn delete_model(&self, name: ModelName) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut resident = inner.resident.lock().await;
            let source = ModelSource::Artifact(name);
            if resident.as_ref().is_some_and(|l| l.source == source) {
                inner.unload_locked(&mut resident).await?;
            }
            inner.store.delete(name).await?;
            Ok::<(), BridgeError>(())
        })
        .await
        .unwrap_or_else(|e| Err(BridgeError::Io(format!("delete task failed: {e}"))))
    }
}

impl Inner {
    async fn load(&self, source: &ModelSource) -> Result<()> {
        let mut resident = self.resident.lock().await;

        if let Some(loaded) = resident.as_ref() {
            if &loaded.source == source {
                tracing::debug!(model = %source, "Model already loaded");
                return Ok(());
            }
            return Err(BridgeError::OtherModelLoaded {
                loaded: loaded.source.to_string(),
                requested: source.to_string(),
            });
        }

        self.set_state(LifecycleState::Loading(source.clone()));

        match self.bring_up(source).await {
            Ok(loaded) => {
                tracing::info!(model = %source, path = ?loaded.path, "Model loaded");
                *resident = Some(loaded);
                self.set_state(LifecycleState::Ready(source.clone()));
                Ok(())
            }
            Err(e) => {
                tracing::error!(model = %source, "Failed to load model: {}", e);
                self.set_state(LifecycleState::LoadFailed {
                    source: source.clone(),
                    reason: e.to_string(),
                });
                self.set_state(LifecycleState::Unloaded);
                Err(e)
            }
        }
    }

    async fn bring_up(&self, source: &ModelSource) -> Result<LoadedModel> {
        let path = match source {
            ModelSource::Artifact(name) => {
                let name = *name;
                let bus = self.bus.clone();
                self.store
                    .download(name, move |percent| {
                        publish(
                            bus.as_ref(),
                            event_names::DOWNLOAD_PROGRESS,
                            &DownloadProgressEvent {
                                model: name,
                                percent,
                            },
                        )
                    })
                    .await?
            }
            ModelSource::Bundle(path) => {
                if !path.is_file() {
                    return Err(BridgeError::LoadFailed(format!(
                        "model bundle not found: {}",
                        path.display()
                    )));
                }
                path.clone()
            }
        };

        let runner = self.engine.load(&path).await.map_err(|e| match e {
            EngineError::Load(reason) => BridgeError::LoadFailed(reason),
            other => BridgeError::LoadFailed(other.to_string()),
        })?;

        Ok(LoadedModel {
            source: source.clone(),
            path,
            runner,
        })
    }

    async fn unload_locked(&self, resident: &mut Option<LoadedModel>) -> Result<()> {
        let Some(loaded) = resident.take() else {
            tracing::debug!("No model loaded, nothing to unload");
            return Ok(());
        };

        self.set_state(LifecycleState::Unloading(loaded.source.clone()));
        let result = loaded.runner.unload().await;
        self.set_state(LifecycleState::Unloaded);

        match result {
            Ok(()) => {
                tracing::info!(model = %loaded.source, "Model unloaded");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(model = %loaded.source, "Unload reported failure: {}", e);
                Err(match e {
                    EngineError::Unload(reason) => BridgeError::UnloadFailed(reason),
                    other => BridgeError::UnloadFailed(other.to_string()),
                })
            }
        }
    }

    fn clear_in_flight(&self, source: &ModelSource, ticket: u64) {
        let mut in_flight = lock(&self.in_flight);
        if in_flight.get(source).is_some_and(|(t, _)| *t == ticket) {
            in_flight.remove(source);
        }
    }

    fn set_state(&self, state: LifecycleState) {
        let reason = match &state {
            LifecycleState::LoadFailed { reason, .. } => Some(reason.clone()),
            _ => None,
        };
        publish(
            self.bus.as_ref(),
            event_names::MODEL_STATE_CHANGED,
            &ModelStateChangedEvent::now(
                state.name(),
                state.source().map(|s| s.to_string()),
                reason,
            ),
        );
        tracing::debug!(state = state.name(), "Lifecycle state changed");
        self.status.send_replace(state);
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
