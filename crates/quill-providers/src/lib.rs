//! Model-side vocabulary shared by the renderer and the backends that feed it.
//!
//! A backend turns a [`CompletionRequest`] into an ordered [`ChunkStream`].
//! How the tokens are produced is the backend's business; the renderer only
//! sees answer deltas, reasoning deltas and tool-invocation markers.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

pub mod scripted;

pub use scripted::{ScriptEvent, ScriptedBackend};

/// One event from the model stream.
///
/// Deltas are appended to what came before, never substituted for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(default)]
    pub answer_delta: String,
    #[serde(default)]
    pub reasoning_delta: String,
    #[serde(default)]
    pub is_tool_invocation: bool,
    #[serde(default)]
    pub tool_name: Option<String>,
}

impl Chunk {
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            answer_delta: text.into(),
            ..Self::default()
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            reasoning_delta: text.into(),
            ..Self::default()
        }
    }

    /// A tool-invocation marker. Carries no text of its own.
    pub fn tool(name: impl Into<String>) -> Self {
        Self {
            is_tool_invocation: true,
            tool_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// True when the chunk carries neither text nor a tool marker.
    pub fn is_empty(&self) -> bool {
        self.answer_delta.is_empty() && self.reasoning_delta.is_empty() && !self.is_tool_invocation
    }
}

/// Ordered stream of chunks. Terminates normally or yields one error.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileData {
    pub filename: String,
    pub file_data: String,
}

/// One part of a mixed-content message, in the OpenAI chat part shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    File { file: FileData },
}

/// Message body: either a bare string or a list of typed parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    PlainText(String),
    MixedParts(Vec<ContentPart>),
}

impl MessageContent {
    /// Build content from parts, collapsing a lone text part to `PlainText`.
    pub fn from_parts(mut parts: Vec<ContentPart>) -> Self {
        if parts.len() == 1 {
            if let ContentPart::Text { .. } = parts[0] {
                if let Some(ContentPart::Text { text }) = parts.pop() {
                    return MessageContent::PlainText(text);
                }
            }
        }
        MessageContent::MixedParts(parts)
    }

    /// Iterate over the textual pieces of the content.
    pub fn texts(&self) -> Vec<&str> {
        match self {
            MessageContent::PlainText(text) => vec![text.as_str()],
            MessageContent::MixedParts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Number of non-text parts (images, files).
    pub fn attachment_count(&self) -> usize {
        match self {
            MessageContent::PlainText(_) => 0,
            MessageContent::MixedParts(parts) => parts
                .iter()
                .filter(|part| !matches!(part, ContentPart::Text { .. }))
                .count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: MessageContent,
}

impl Message {
    pub fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::PlainText(text.into()),
        }
    }

    pub fn with_parts(role: MessageRole, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: MessageContent::from_parts(parts),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    /// Ask the backend to surface reasoning deltas.
    pub include_reasoning: bool,
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Open a chunk stream. An error here means the stream never started.
    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_text_part_collapses_to_plain_text() {
        let content = MessageContent::from_parts(vec![ContentPart::Text {
            text: "hello".to_string(),
        }]);
        assert_eq!(content, MessageContent::PlainText("hello".to_string()));
    }

    #[test]
    fn mixed_parts_serialize_in_chat_shape() {
        let message = Message::with_parts(
            MessageRole::User,
            vec![
                ContentPart::Text {
                    text: "what is this?".to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "data:image/jpeg;base64,AAAA".to_string(),
                    },
                },
            ],
        );

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(json["content"][1]["image_url"]["url"], "data:image/jpeg;base64,AAAA");
        assert_eq!(message.content.attachment_count(), 1);
        assert_eq!(message.content.texts(), vec!["what is this?"]);
    }

    #[test]
    fn plain_text_serializes_as_string() {
        let message = Message::new(MessageRole::Assistant, "hi");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["content"], "hi");
    }

    #[test]
    fn chunk_constructors() {
        assert!(Chunk::default().is_empty());
        assert!(!Chunk::tool("web_search").is_empty());
        assert_eq!(Chunk::answer("a").answer_delta, "a");
        assert_eq!(Chunk::reasoning("r").reasoning_delta, "r");
    }
}
