use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tally_engine::{EngineResponse, ResponseStream};
use tokio::task::JoinHandle;

use crate::{GenerationEvent, StreamListener};

/// Opaque identifier of one generation stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct SessionEntry {
    active: AtomicBool,
    stopped: AtomicBool,
    listeners: Mutex<Vec<Arc<dyn StreamListener>>>,
    /// Held by the relay for the whole of one dispatch.
    dispatch: Mutex<()>,
    /// Thread currently inside a dispatch, if any.
    dispatcher: Mutex<Option<ThreadId>>,
}

impl SessionEntry {
    fn new(listener: Arc<dyn StreamListener>) -> Self {
        Self {
            active: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            listeners: Mutex::new(vec![listener]),
            dispatch: Mutex::new(()),
            dispatcher: Mutex::new(None),
        }
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<Arc<dyn StreamListener>>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn dispatcher(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.dispatcher.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin_dispatch(&self) -> DispatchGuard<'_> {
        let lock = self.dispatch.lock().unwrap_or_else(|e| e.into_inner());
        *self.dispatcher() = Some(thread::current().id());
        DispatchGuard {
            entry: self,
            _lock: lock,
        }
    }

    /// Send `event` to each listener until the session is stopped.
    fn dispatch(
        &self,
        id: &StreamId,
        event: &GenerationEvent,
        listeners: Vec<Arc<dyn StreamListener>>,
    ) {
        for listener in listeners {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            event.dispatch(id, listener.as_ref());
        }
    }

    /// Deactivate and drop every listener.
    ///
    /// Waits for a dispatch running on another thread, so nothing reaches a
    /// listener once this returns. Called from inside a listener callback it
    /// returns at once and the rest of that dispatch is skipped.
    fn detach(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
        self.listeners().clear();
        if *self.dispatcher() == Some(thread::current().id()) {
            return;
        }
        drop(self.dispatch.lock().unwrap_or_else(|e| e.into_inner()));
    }
}

struct DispatchGuard<'a> {
    entry: &'a SessionEntry,
    _lock: MutexGuard<'a, ()>,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        *self.entry.dispatcher() = None;
    }
}

type Sessions = Arc<Mutex<HashMap<StreamId, Arc<SessionEntry>>>>;

fn sessions_guard(sessions: &Sessions) -> MutexGuard<'_, HashMap<StreamId, Arc<SessionEntry>>> {
    sessions.lock().unwrap_or_else(|e| e.into_inner())
}

/// Relays runtime response streams to listeners.
///
/// Each started stream becomes a session keyed by a fresh [`StreamId`]. A
/// session ends at its first terminal event (Done or Error) or when it is
/// stopped; after that nothing more is delivered for it.
#[derive(Clone, Default)]
pub struct StreamBridge {
    sessions: Sessions,
}

impl StreamBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start relaying `responses` to `listener` under a fresh id.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        &self,
        responses: ResponseStream,
        listener: Arc<dyn StreamListener>,
    ) -> StreamSession {
        self.start_with_id(StreamId::new(), responses, listener)
    }

    /// Start relaying `responses` to `listener` under `id`.
    ///
    /// The session is registered before the relay task is spawned, so the
    /// caller can correlate before the first event. A live session already
    /// registered under `id` is stopped first.
    pub fn start_with_id(
        &self,
        id: StreamId,
        responses: ResponseStream,
        listener: Arc<dyn StreamListener>,
    ) -> StreamSession {
        let entry = Arc::new(SessionEntry::new(listener));
        let replaced = sessions_guard(&self.sessions).insert(id.clone(), Arc::clone(&entry));
        if let Some(previous) = replaced {
            tracing::warn!(stream_id = %id, "Stream id reused, stopping the previous session");
            previous.detach();
        }
        tracing::debug!(stream_id = %id, "Stream started");

        let relay = tokio::spawn(relay(
            Arc::clone(&self.sessions),
            id.clone(),
            entry,
            responses,
        ));

        StreamSession {
            id,
            bridge: self.clone(),
            relay,
        }
    }

    /// Attach another listener to a live session.
    ///
    /// Returns false if the session already ended or was stopped.
    pub fn subscribe(&self, id: &StreamId, listener: Arc<dyn StreamListener>) -> bool {
        let Some(entry) = sessions_guard(&self.sessions).get(id).cloned() else {
            return false;
        };
        let mut listeners = entry.listeners();
        if !entry.active.load(Ordering::SeqCst) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Detach every listener of `id`. Idempotent; safe after termination.
    ///
    /// If an event is being delivered on another thread this blocks until
    /// that delivery returns; no listener sees an event of `id` after this
    /// call returns. The runtime keeps generating; its output is drained and
    /// discarded. Returns true if the session was still live.
    pub fn stop(&self, id: &StreamId) -> bool {
        let entry = sessions_guard(&self.sessions).remove(id);
        match entry {
            Some(entry) => {
                entry.detach();
                tracing::debug!(stream_id = %id, "Stream stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, id: &StreamId) -> bool {
        sessions_guard(&self.sessions).contains_key(id)
    }

    /// Number of live sessions.
    pub fn active_count(&self) -> usize {
        sessions_guard(&self.sessions).len()
    }
}

fn translate(item: tally_engine::Result<EngineResponse>) -> GenerationEvent {
    match item {
        Ok(EngineResponse::Chunk(text)) => GenerationEvent::Chunk(text),
        Ok(EngineResponse::ReasoningChunk(text)) => GenerationEvent::ReasoningChunk(text),
        Ok(EngineResponse::FunctionCalls(calls)) => GenerationEvent::FunctionCalls(calls.len()),
        Ok(EngineResponse::Complete { stats }) => GenerationEvent::Done {
            tokens_per_second: stats.and_then(|s| s.tokens_per_second()),
        },
        Err(e) => GenerationEvent::Error(e.to_string()),
    }
}

async fn relay(
    sessions: Sessions,
    id: StreamId,
    entry: Arc<SessionEntry>,
    mut responses: ResponseStream,
) {
    while let Some(item) = responses.next().await {
        let event = translate(item);
        if event.is_terminal() {
            finish(&sessions, &id, &entry, &event);
            return;
        }
        deliver(&id, &entry, &event);
    }

    // The runtime ended the stream without a completion marker.
    finish(
        &sessions,
        &id,
        &entry,
        &GenerationEvent::Done {
            tokens_per_second: None,
        },
    );
}

fn deliver(id: &StreamId, entry: &SessionEntry, event: &GenerationEvent) {
    let _dispatch = entry.begin_dispatch();
    if !entry.active.load(Ordering::SeqCst) {
        return;
    }
    let listeners = entry.listeners().clone();
    entry.dispatch(id, event, listeners);
}

fn finish(sessions: &Sessions, id: &StreamId, entry: &SessionEntry, event: &GenerationEvent) {
    {
        let mut sessions = sessions_guard(sessions);
        if let Some(current) = sessions.get(id) {
            if std::ptr::eq(Arc::as_ptr(current), entry) {
                sessions.remove(id);
            }
        }
    }
    let _dispatch = entry.begin_dispatch();
    if entry.active.swap(false, Ordering::SeqCst) {
        let listeners = std::mem::take(&mut *entry.listeners());
        entry.dispatch(id, event, listeners);
        match event {
            GenerationEvent::Error(message) => {
                tracing::warn!(stream_id = %id, "Stream failed: {}", message)
            }
            _ => tracing::debug!(stream_id = %id, "Stream done"),
        }
    }
}

/// Handle to a started stream.
///
/// Dropping it does not stop the stream.
pub struct StreamSession {
    id: StreamId,
    bridge: StreamBridge,
    relay: JoinHandle<()>,
}

impl StreamSession {
    pub fn id(&self) -> &StreamId {
        &self.id
    }

    pub fn is_active(&self) -> bool {
        self.bridge.is_active(&self.id)
    }

    pub fn subscribe(&self, listener: Arc<dyn StreamListener>) -> bool {
        self.bridge.subscribe(&self.id, listener)
    }

    pub fn stop(&self) -> bool {
        self.bridge.stop(&self.id)
    }

    /// Wait until the runtime's stream has been fully consumed.
    pub async fn finished(self) {
        if let Err(e) = self.relay.await {
            tracing::error!(stream_id = %self.id, "Stream relay task failed: {}", e);
        }
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession").field("id", &self.id).finish()
    }
}
