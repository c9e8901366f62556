//! Conversion of presentation-layer content parts into a runtime turn.
//!
//! Best effort: a part that cannot be decoded is left out of the turn and the
//! rest is kept. Nothing here fails and nothing here logs.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tally_engine::{ChatContent, ChatMessage, ImageContent};

/// Prompt sent alongside a receipt photo when the caller does not supply one.
pub const DEFAULT_SCAN_PROMPT: &str = "Describe the scene briefly.";

/// One user-supplied part of a message, as it arrives from the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ImageBase64 {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime: Option<String>,
    },
    /// Any tag this version does not understand.
    #[serde(other)]
    Unknown,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image_base64(data: impl Into<String>) -> Self {
        Self::ImageBase64 {
            data: data.into(),
            mime: None,
        }
    }
}

/// Build a user turn from `parts`, preserving their order.
pub fn to_engine_turn(parts: &[ContentPart]) -> ChatMessage {
    let content = parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } => Some(ChatContent::Text(text.clone())),
            ContentPart::ImageBase64 { data, .. } => decode_image(data).map(ChatContent::Image),
            ContentPart::Unknown => None,
        })
        .collect();
    ChatMessage::user(content)
}

/// Parts for a receipt scan: the photo first, then the instruction.
pub fn scan_parts(image_base64: impl Into<String>, prompt: Option<&str>) -> Vec<ContentPart> {
    vec![
        ContentPart::image_base64(image_base64),
        ContentPart::text(prompt.unwrap_or(DEFAULT_SCAN_PROMPT)),
    ]
}

fn decode_image(data: &str) -> Option<ImageContent> {
    let bytes = decode_base64(data)?;
    let image = image::load_from_memory(&bytes).ok()?;
    ImageContent::from_dynamic_image(&image).ok()
}

fn decode_base64(data: &str) -> Option<Vec<u8>> {
    let data = data.trim();
    // Data URLs carry a "data:<mime>;base64," header.
    let payload = match data.strip_prefix("data:") {
        Some(rest) => rest.split_once(',')?.1,
        None => data,
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }
    STANDARD
        .decode(&compact)
        .or_else(|_| STANDARD_NO_PAD.decode(&compact))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_base64(width: u32, height: u32) -> String {
        let pixels = RgbImage::from_pixel(width, height, Rgb([200, 10, 10]));
        let image = DynamicImage::ImageRgb8(pixels);
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        STANDARD.encode(bytes)
    }

    #[test]
    fn text_parts_pass_through_verbatim() {
        let turn = to_engine_turn(&[ContentPart::text("  total? "), ContentPart::text("")]);
        assert_eq!(
            turn.content,
            vec![
                ChatContent::Text("  total? ".into()),
                ChatContent::Text(String::new())
            ]
        );
    }

    #[test]
    fn valid_image_is_converted() {
        let turn = to_engine_turn(&[ContentPart::image_base64(png_base64(8, 6))]);
        match turn.content.as_slice() {
            [ChatContent::Image(image)] => {
                assert_eq!((image.width, image.height), (8, 6));
                assert_eq!(&image.jpeg[..2], &[0xFF, 0xD8]);
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn malformed_image_is_dropped_and_text_kept() {
        let turn = to_engine_turn(&[
            ContentPart::text("What is on this receipt?"),
            ContentPart::image_base64("!!!not base64!!!"),
        ]);
        assert_eq!(
            turn.content,
            vec![ChatContent::Text("What is on this receipt?".into())]
        );
    }

    #[test]
    fn valid_base64_of_non_image_is_dropped() {
        let turn = to_engine_turn(&[
            ContentPart::image_base64(STANDARD.encode(b"definitely not a png")),
            ContentPart::text("hi"),
        ]);
        assert_eq!(turn.content, vec![ChatContent::Text("hi".into())]);
    }

    #[test]
    fn data_urls_and_line_breaks_are_accepted() {
        let encoded = png_base64(2, 2);
        let (head, tail) = encoded.split_at(encoded.len() / 2);
        let wrapped = format!("data:image/png;base64,{head}\n{tail}\n");
        let turn = to_engine_turn(&[ContentPart::image_base64(wrapped)]);
        assert_eq!(turn.image_count(), 1);
    }

    #[test]
    fn order_is_preserved_around_dropped_parts() {
        let turn = to_engine_turn(&[
            ContentPart::text("a"),
            ContentPart::image_base64(""),
            ContentPart::image_base64(png_base64(1, 1)),
            ContentPart::Unknown,
            ContentPart::text("b"),
        ]);
        assert_eq!(turn.content.len(), 3);
        assert_eq!(turn.content[0], ChatContent::Text("a".into()));
        assert!(matches!(turn.content[1], ChatContent::Image(_)));
        assert_eq!(turn.content[2], ChatContent::Text("b".into()));
    }

    #[test]
    fn unknown_tags_deserialize_and_are_ignored() {
        let parts: Vec<ContentPart> = serde_json::from_str(
            r#"[{"type":"audio","data":"xyz"},{"type":"text","text":"hello"}]"#,
        )
        .unwrap();
        assert_eq!(parts[0], ContentPart::Unknown);
        let turn = to_engine_turn(&parts);
        assert_eq!(turn.content, vec![ChatContent::Text("hello".into())]);
    }

    #[test]
    fn scan_parts_put_image_first() {
        let parts = scan_parts("abc", None);
        assert_eq!(parts[0], ContentPart::image_base64("abc"));
        assert_eq!(parts[1], ContentPart::text(DEFAULT_SCAN_PROMPT));
        assert_eq!(scan_parts("abc", Some("Total?"))[1], ContentPart::text("Total?"));
    }
}
