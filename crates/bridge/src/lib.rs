//! Bridge between the inference runtime and the presentation layer.
//!
//! Turns UI content parts into runtime turns and relays the runtime's
//! response stream to listeners, one session per generation.

mod bridge;
mod listener;
mod message;

pub use bridge::{StreamBridge, StreamId, StreamSession};
pub use listener::{
    BusListener, ChannelListener, Collected, CollectingListener, GenerationEvent, StreamListener,
};
pub use message::{scan_parts, to_engine_turn, ContentPart, DEFAULT_SCAN_PROMPT};
