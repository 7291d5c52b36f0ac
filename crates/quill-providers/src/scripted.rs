use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::{Chunk, ChunkStream, CompletionRequest, ModelBackend};

/// One line of a recorded transcript.
///
/// ```text
/// {"reasoning": "Let me look that up."}
/// {"tool": "web_search", "delay_ms": 1200}
/// {"answer": "The answer is 42."}
/// {"error": "upstream closed the connection"}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptEvent {
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub tool: Option<String>,
    /// Terminates the stream with this error.
    #[serde(default)]
    pub error: Option<String>,
    /// Pause before emitting this event.
    #[serde(default)]
    pub delay_ms: u64,
}

impl ScriptEvent {
    pub fn chunk(chunk: Chunk) -> Self {
        Self {
            answer: chunk.answer_delta,
            reasoning: chunk.reasoning_delta,
            tool: if chunk.is_tool_invocation {
                Some(chunk.tool_name.unwrap_or_default())
            } else {
                None
            },
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    fn into_item(self) -> Result<Chunk> {
        if let Some(message) = self.error {
            return Err(anyhow::anyhow!(message));
        }
        Ok(Chunk {
            answer_delta: self.answer,
            reasoning_delta: self.reasoning,
            is_tool_invocation: self.tool.is_some(),
            tool_name: self.tool,
        })
    }
}

/// Backend that replays a fixed list of events.
///
/// Used by the CLI to replay recorded generations and by tests to drive the
/// renderer through exact chunk sequences.
#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    name: String,
    events: Vec<ScriptEvent>,
    open_error: Option<String>,
}

impl ScriptedBackend {
    pub fn new(events: Vec<ScriptEvent>) -> Self {
        Self {
            name: "scripted".to_string(),
            events,
            open_error: None,
        }
    }

    pub fn from_chunks(chunks: impl IntoIterator<Item = Chunk>) -> Self {
        Self::new(chunks.into_iter().map(ScriptEvent::chunk).collect())
    }

    /// A backend whose stream fails to open at all.
    pub fn failing_to_open(message: impl Into<String>) -> Self {
        Self {
            name: "scripted".to_string(),
            events: Vec::new(),
            open_error: Some(message.into()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Parse a JSONL transcript. Blank lines and `#` comments are skipped.
    pub fn from_jsonl(text: &str) -> Result<Self> {
        let mut events = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let event: ScriptEvent = serde_json::from_str(line)
                .with_context(|| format!("Invalid transcript event on line {}", idx + 1))?;
            events.push(event);
        }
        Ok(Self::new(events))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read transcript {}", path.display()))?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("scripted")
            .to_string();
        Ok(Self::from_jsonl(&text)?.with_name(name))
    }

    pub fn events(&self) -> &[ScriptEvent] {
        &self.events
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream> {
        if let Some(message) = &self.open_error {
            return Err(anyhow::anyhow!(message.clone()));
        }

        debug!(
            "Replaying {} events for {} messages (reasoning={})",
            self.events.len(),
            request.messages.len(),
            request.include_reasoning
        );

        let (tx, rx) = mpsc::channel(32);
        let events = self.events.clone();

        tokio::spawn(async move {
            for event in events {
                if event.delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(event.delay_ms)).await;
                }
                let item = event.into_item();
                let is_error = item.is_err();
                if tx.send(item).await.is_err() {
                    debug!("Receiver dropped, stopping replay");
                    return;
                }
                if is_error {
                    return;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
