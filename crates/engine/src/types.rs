use std::io::Cursor;

use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Image in the runtime's native representation: JPEG bytes plus dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageContent {
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

impl ImageContent {
    pub fn from_dynamic_image(image: &DynamicImage) -> Result<Self> {
        // JPEG has no alpha channel.
        let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
        let mut jpeg = Vec::new();
        rgb.write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .map_err(|e| EngineError::Image(e.to_string()))?;
        Ok(Self {
            width: rgb.width(),
            height: rgb.height(),
            jpeg,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatContent {
    Text(String),
    Image(ImageContent),
}

/// One conversation turn in the runtime's native format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ChatContent>,
}

impl ChatMessage {
    pub fn user(content: Vec<ChatContent>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    /// Concatenated text units, images skipped.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ChatContent::Text(t) => Some(t.as_str()),
                ChatContent::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn image_count(&self) -> usize {
        self.content
            .iter()
            .filter(|c| matches!(c, ChatContent::Image(_)))
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Per-stream generation settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub message: ChatMessage,
    pub options: GenerationOptions,
}

/// Names runtime builds have used for the throughput statistic.
pub const TPS_ALIASES: &[&str] = &["tokenPerSecond", "tokensPerSecond", "tokens_per_second"];

/// Statistics reported with a completed generation.
///
/// Kept as a loose map because the field set differs between runtime builds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationStats(pub Map<String, Value>);

impl GenerationStats {
    pub fn with_tokens_per_second(tps: f64) -> Self {
        let mut map = Map::new();
        if let Some(n) = serde_json::Number::from_f64(tps) {
            map.insert(TPS_ALIASES[0].to_string(), Value::Number(n));
        }
        Self(map)
    }

    /// First usable tokens-per-second value under any known alias.
    pub fn tokens_per_second(&self) -> Option<f64> {
        TPS_ALIASES
            .iter()
            .filter_map(|key| self.0.get(*key))
            .filter_map(|value| match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .find(|tps: &f64| tps.is_finite())
    }
}

/// One item of a generation's response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineResponse {
    Chunk(String),
    ReasoningChunk(String),
    FunctionCalls(Vec<FunctionCall>),
    Complete { stats: Option<GenerationStats> },
}
