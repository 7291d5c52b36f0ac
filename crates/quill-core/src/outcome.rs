use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::accumulator::{AccumulatedParts, AnswerSegment};
use crate::delivery::MessageId;

/// Result of rendering one generation to the chat.
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub generation_id: Uuid,
    /// The answer as the user saw it: delivered answer segments only.
    pub answer: String,
    /// Full raw answer text, including spans diverted into reasoning.
    pub answer_text: String,
    pub reasoning_text: String,
    pub answer_segments: Vec<AnswerSegment>,
    /// Every permanent message, in send order.
    pub sent_message_ids: Vec<MessageId>,
    pub tool_use_counts: HashMap<String, u32>,
    /// Set when the model stream failed and the apology was delivered instead.
    pub upstream_error: Option<String>,
    pub chunks_received: usize,
    pub first_chunk_after: Option<Duration>,
    pub elapsed: Duration,
}

impl RenderOutcome {
    pub(crate) fn from_parts(generation_id: Uuid, parts: AccumulatedParts) -> Self {
        Self {
            generation_id,
            answer: parts.answer.trim().to_string(),
            answer_text: parts.answer_text,
            reasoning_text: parts.reasoning_text,
            answer_segments: parts.answer_segments,
            sent_message_ids: parts.sent_message_ids,
            tool_use_counts: parts.tool_use_counts,
            upstream_error: None,
            chunks_received: 0,
            first_chunk_after: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Id recorded with the stored assistant message.
    pub fn first_message_id(&self) -> Option<MessageId> {
        self.sent_message_ids.first().copied()
    }

    pub fn is_error(&self) -> bool {
        self.upstream_error.is_some()
    }

    pub fn tool_uses(&self, tool: &str) -> u32 {
        self.tool_use_counts.get(tool).copied().unwrap_or(0)
    }

    pub fn total_tool_uses(&self) -> u32 {
        self.tool_use_counts.values().sum()
    }
}
