//! Typed listener interface for generation events, plus stock listeners.

use std::sync::{Mutex, MutexGuard};

use tally_events::{
    event_names, publish, EventBusRef, FunctionCallsEvent, StreamChunkEvent, StreamDoneEvent,
    StreamErrorEvent, StreamReasoningEvent,
};
use tokio::sync::{mpsc, oneshot};

use crate::StreamId;

/// One event relayed from the runtime to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    Chunk(String),
    ReasoningChunk(String),
    /// Number of function calls in the batch.
    FunctionCalls(usize),
    Done { tokens_per_second: Option<f64> },
    Error(String),
}

impl GenerationEvent {
    /// Done and Error end a session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error(_))
    }

    /// Invoke the matching method of `listener`.
    pub fn dispatch(&self, stream_id: &StreamId, listener: &dyn StreamListener) {
        match self {
            Self::Chunk(text) => listener.on_chunk(stream_id, text),
            Self::ReasoningChunk(text) => listener.on_reasoning(stream_id, text),
            Self::FunctionCalls(count) => listener.on_function_calls(stream_id, *count),
            Self::Done { tokens_per_second } => listener.on_done(stream_id, *tokens_per_second),
            Self::Error(message) => listener.on_error(stream_id, message),
        }
    }
}

/// Receives the events of one or more streams.
///
/// Methods are called from the relay task, never concurrently for the same
/// stream. Every method has a no-op default.
pub trait StreamListener: Send + Sync {
    fn on_chunk(&self, _stream_id: &StreamId, _text: &str) {}
    fn on_reasoning(&self, _stream_id: &StreamId, _text: &str) {}
    fn on_function_calls(&self, _stream_id: &StreamId, _count: usize) {}
    fn on_done(&self, _stream_id: &StreamId, _tokens_per_second: Option<f64>) {}
    fn on_error(&self, _stream_id: &StreamId, _message: &str) {}
}

/// Publishes every event on the bus under its `leap:*` topic.
pub struct BusListener {
    bus: EventBusRef,
}

impl BusListener {
    pub fn new(bus: EventBusRef) -> Self {
        Self { bus }
    }
}

impl StreamListener for BusListener {
    fn on_chunk(&self, stream_id: &StreamId, text: &str) {
        publish(
            self.bus.as_ref(),
            event_names::STREAM_CHUNK,
            &StreamChunkEvent {
                stream_id: stream_id.to_string(),
                text: text.to_string(),
            },
        );
    }

    fn on_reasoning(&self, stream_id: &StreamId, text: &str) {
        publish(
            self.bus.as_ref(),
            event_names::STREAM_REASONING,
            &StreamReasoningEvent {
                stream_id: stream_id.to_string(),
                text: text.to_string(),
            },
        );
    }

    fn on_function_calls(&self, stream_id: &StreamId, count: usize) {
        publish(
            self.bus.as_ref(),
            event_names::STREAM_FUNCTION_CALLS,
            &FunctionCallsEvent {
                stream_id: stream_id.to_string(),
                count,
            },
        );
    }

    fn on_done(&self, stream_id: &StreamId, tokens_per_second: Option<f64>) {
        publish(
            self.bus.as_ref(),
            event_names::STREAM_DONE,
            &StreamDoneEvent {
                stream_id: stream_id.to_string(),
                tps: tokens_per_second,
            },
        );
    }

    fn on_error(&self, stream_id: &StreamId, message: &str) {
        publish(
            self.bus.as_ref(),
            event_names::STREAM_ERROR,
            &StreamErrorEvent {
                stream_id: stream_id.to_string(),
                error: message.to_string(),
            },
        );
    }
}

/// Forwards every event into an unbounded channel.
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<(StreamId, GenerationEvent)>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamId, GenerationEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, stream_id: &StreamId, event: GenerationEvent) {
        // Receiver gone means nobody is interested any more.
        let _ = self.tx.send((stream_id.clone(), event));
    }
}

impl StreamListener for ChannelListener {
    fn on_chunk(&self, stream_id: &StreamId, text: &str) {
        self.send(stream_id, GenerationEvent::Chunk(text.to_string()));
    }

    fn on_reasoning(&self, stream_id: &StreamId, text: &str) {
        self.send(stream_id, GenerationEvent::ReasoningChunk(text.to_string()));
    }

    fn on_function_calls(&self, stream_id: &StreamId, count: usize) {
        self.send(stream_id, GenerationEvent::FunctionCalls(count));
    }

    fn on_done(&self, stream_id: &StreamId, tokens_per_second: Option<f64>) {
        self.send(stream_id, GenerationEvent::Done { tokens_per_second });
    }

    fn on_error(&self, stream_id: &StreamId, message: &str) {
        self.send(stream_id, GenerationEvent::Error(message.to_string()));
    }
}

/// Outcome of a collected stream: the full text, or the stream error.
pub type Collected = Result<String, String>;

/// Accumulates chunk text and resolves once the stream terminates.
///
/// Reasoning and function calls are not part of the collected text.
pub struct CollectingListener {
    text: Mutex<String>,
    done: Mutex<Option<oneshot::Sender<Collected>>>,
}

impl CollectingListener {
    pub fn new() -> (Self, oneshot::Receiver<Collected>) {
        let (tx, rx) = oneshot::channel();
        let listener = Self {
            text: Mutex::new(String::new()),
            done: Mutex::new(Some(tx)),
        };
        (listener, rx)
    }

    /// Text received so far.
    pub fn text(&self) -> String {
        lock(&self.text).clone()
    }

    fn resolve(&self, outcome: Collected) {
        if let Some(tx) = lock(&self.done).take() {
            let _ = tx.send(outcome);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl StreamListener for CollectingListener {
    fn on_chunk(&self, _stream_id: &StreamId, text: &str) {
        lock(&self.text).push_str(text);
    }

    fn on_done(&self, _stream_id: &StreamId, _tokens_per_second: Option<f64>) {
        let text = self.text();
        self.resolve(Ok(text));
    }

    fn on_error(&self, _stream_id: &StreamId, message: &str) {
        self.resolve(Err(message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tally_events::InMemoryEventBus;

    #[test]
    fn bus_listener_publishes_leap_topics() {
        let bus = Arc::new(InMemoryEventBus::new());
        let listener = BusListener::new(bus.clone());
        let id = StreamId::from("s-1");

        for event in [
            GenerationEvent::Chunk("Total".into()),
            GenerationEvent::ReasoningChunk("looking".into()),
            GenerationEvent::FunctionCalls(2),
            GenerationEvent::Done {
                tokens_per_second: Some(9.5),
            },
        ] {
            event.dispatch(&id, &listener);
        }
        GenerationEvent::Error("boom".into()).dispatch(&id, &listener);

        assert_eq!(
            bus.topics(),
            vec![
                "leap:chunk",
                "leap:reasoning",
                "leap:function_calls",
                "leap:done",
                "leap:error"
            ]
        );
        let events = bus.events();
        assert!(events.iter().all(|e| e.payload["streamId"] == "s-1"));
        assert_eq!(events[0].payload["text"], "Total");
        assert_eq!(events[2].payload["count"], 2);
        assert_eq!(events[3].payload["tps"], 9.5);
        assert_eq!(events[4].payload["error"], "boom");
    }

    #[tokio::test]
    async fn collecting_listener_resolves_with_text() {
        let (listener, rx) = CollectingListener::new();
        let id = StreamId::from("s-2");
        listener.on_chunk(&id, "Coffee ");
        listener.on_reasoning(&id, "ignored");
        listener.on_chunk(&id, "4.50");
        listener.on_done(&id, None);
        // Later terminal events are ignored.
        listener.on_error(&id, "late");

        assert_eq!(rx.await.unwrap(), Ok("Coffee 4.50".to_string()));
    }

    #[tokio::test]
    async fn collecting_listener_resolves_with_error() {
        let (listener, rx) = CollectingListener::new();
        let id = StreamId::from("s-3");
        listener.on_chunk(&id, "partial");
        listener.on_error(&id, "engine crashed");
        assert_eq!(rx.await.unwrap(), Err("engine crashed".to_string()));
        assert_eq!(listener.text(), "partial");
    }

    #[test]
    fn only_done_and_error_are_terminal() {
        assert!(GenerationEvent::Done {
            tokens_per_second: None
        }
        .is_terminal());
        assert!(GenerationEvent::Error("x".into()).is_terminal());
        assert!(!GenerationEvent::Chunk("x".into()).is_terminal());
        assert!(!GenerationEvent::FunctionCalls(0).is_terminal());
    }
}
