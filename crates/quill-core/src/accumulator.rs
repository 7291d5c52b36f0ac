//! Running state of one generation.
//!
//! The accumulator owns the raw answer and reasoning text plus the ledgers of
//! what has already left as permanent messages. Everything "unsent" is derived
//! from those ledgers on demand, so the prefix invariant cannot drift.

use quill_providers::Chunk;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::delivery::{MessageId, SurfaceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Sent to the chat as (part of) a permanent answer message.
    Delivered,
    /// Moved into reasoning when a tool started; never sent as answer text.
    Diverted,
}

/// One entry of the answer ledger: a raw slice of the answer text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerSegment {
    pub raw: String,
    pub kind: SegmentKind,
}

#[derive(Debug)]
pub struct StreamAccumulator {
    answer_text: String,
    reasoning_text: String,
    answer_segments: Vec<AnswerSegment>,
    reasoning_segments: Vec<String>,
    in_code_fence: bool,
    thinking_finalized: bool,
    answer_confirmed: bool,
    pending_tool: Option<String>,
    tool_use_counts: HashMap<String, u32>,
    preview_surface: SurfaceId,
    last_render: Option<Instant>,
    sent_message_ids: Vec<MessageId>,
    /// Whether the preview currently shows answer text rather than a status.
    preview_shows_answer: bool,
}

impl Default for StreamAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self {
            answer_text: String::new(),
            reasoning_text: String::new(),
            answer_segments: Vec::new(),
            reasoning_segments: Vec::new(),
            in_code_fence: false,
            thinking_finalized: false,
            answer_confirmed: false,
            pending_tool: None,
            tool_use_counts: HashMap::new(),
            preview_surface: SurfaceId::generate(),
            last_render: None,
            sent_message_ids: Vec::new(),
            preview_shows_answer: false,
        }
    }

    pub fn answer_text(&self) -> &str {
        &self.answer_text
    }

    pub fn reasoning_text(&self) -> &str {
        &self.reasoning_text
    }

    pub fn answer_segments(&self) -> &[AnswerSegment] {
        &self.answer_segments
    }

    pub fn reasoning_segments(&self) -> &[String] {
        &self.reasoning_segments
    }

    fn finalized_answer_len(&self) -> usize {
        self.answer_segments.iter().map(|s| s.raw.len()).sum()
    }

    fn finalized_reasoning_len(&self) -> usize {
        self.reasoning_segments.iter().map(String::len).sum()
    }

    pub fn unsent_answer(&self) -> &str {
        &self.answer_text[self.finalized_answer_len()..]
    }

    pub fn unsent_reasoning(&self) -> &str {
        &self.reasoning_text[self.finalized_reasoning_len()..]
    }

    /// Concatenation of every answer slice that reached the chat as answer text.
    pub fn delivered_answer(&self) -> String {
        self.answer_segments
            .iter()
            .filter(|s| s.kind == SegmentKind::Delivered)
            .map(|s| s.raw.as_str())
            .collect()
    }

    pub fn has_delivered_answer(&self) -> bool {
        self.answer_segments
            .iter()
            .any(|s| s.kind == SegmentKind::Delivered)
    }

    /// Append a chunk's deltas.
    ///
    /// Reasoning arriving while a tool is pending first records a
    /// `(used <tool>)` marker. Returns the tool that was cleared, if any.
    pub fn push_deltas(&mut self, chunk: &Chunk) -> Option<String> {
        let mut finished_tool = None;
        if !chunk.reasoning_delta.is_empty() {
            if let Some(tool) = self.pending_tool.take() {
                self.reasoning_text.push_str(&format!("(used {})\n", tool));
                finished_tool = Some(tool);
            }
        }
        self.reasoning_text.push_str(&chunk.reasoning_delta);
        self.answer_text.push_str(&chunk.answer_delta);
        finished_tool
    }

    /// A tool started: the unsent answer was planning, not the answer.
    ///
    /// The span moves into reasoning and is marked as consumed in the answer
    /// ledger without being delivered. Returns this tool's use count.
    pub fn divert_to_tool(&mut self, tool: &str) -> u32 {
        let unsent = self.unsent_answer().to_string();
        if !unsent.is_empty() {
            let trimmed = unsent.trim();
            if !trimmed.is_empty() {
                self.reasoning_text.push('\n');
                self.reasoning_text.push_str(trimmed);
                self.reasoning_text.push('\n');
            }
            self.answer_segments.push(AnswerSegment {
                raw: unsent,
                kind: SegmentKind::Diverted,
            });
        }

        self.in_code_fence = false;
        self.pending_tool = Some(tool.to_string());
        self.answer_confirmed = false;
        self.preview_shows_answer = false;

        let count = self.tool_use_counts.entry(tool.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Record that the first `raw_len` bytes of the unsent answer were delivered.
    pub fn commit_answer(&mut self, raw_len: usize, ends_in_fence: bool) {
        let raw = self.unsent_answer()[..raw_len].to_string();
        self.answer_segments.push(AnswerSegment {
            raw,
            kind: SegmentKind::Delivered,
        });
        self.in_code_fence = ends_in_fence;
    }

    /// Record that the first `raw_len` bytes of the unsent reasoning were delivered.
    pub fn commit_reasoning(&mut self, raw_len: usize) {
        let raw = self.unsent_reasoning()[..raw_len].to_string();
        self.reasoning_segments.push(raw);
    }

    /// Replace the unsent answer tail, keeping finalized segments intact.
    ///
    /// The replacement is standalone text, so a fence left open by the last
    /// delivered segment is not reopened for it.
    pub fn replace_unsent_answer(&mut self, text: &str) {
        let finalized = self.finalized_answer_len();
        self.answer_text.truncate(finalized);
        self.answer_text.push_str(text);
        self.in_code_fence = false;
    }

    /// Latch `answer_confirmed` once the trimmed unsent answer reaches `threshold` chars.
    pub fn confirm_answer(&mut self, threshold: usize) -> bool {
        if !self.answer_confirmed && self.unsent_answer().trim().chars().count() >= threshold {
            self.answer_confirmed = true;
        }
        self.answer_confirmed
    }

    pub fn finalize_thinking(&mut self) {
        self.thinking_finalized = true;
    }

    pub fn in_code_fence(&self) -> bool {
        self.in_code_fence
    }

    pub fn thinking_finalized(&self) -> bool {
        self.thinking_finalized
    }

    pub fn answer_confirmed(&self) -> bool {
        self.answer_confirmed
    }

    pub fn pending_tool(&self) -> Option<&str> {
        self.pending_tool.as_deref()
    }

    pub fn tool_use_counts(&self) -> &HashMap<String, u32> {
        &self.tool_use_counts
    }

    pub fn preview_surface(&self) -> SurfaceId {
        self.preview_surface
    }

    pub fn rotate_surface(&mut self) -> SurfaceId {
        self.preview_surface = self.preview_surface.rotate();
        self.preview_shows_answer = false;
        self.preview_surface
    }

    pub fn preview_shows_answer(&self) -> bool {
        self.preview_shows_answer
    }

    pub fn set_preview_shows_answer(&mut self, shows_answer: bool) {
        self.preview_shows_answer = shows_answer;
    }

    /// Throttle gate: the first render always passes.
    pub fn render_due(&self, now: Instant, interval: Duration) -> bool {
        match self.last_render {
            Some(last) => now.saturating_duration_since(last) >= interval,
            None => true,
        }
    }

    pub fn mark_rendered(&mut self, now: Instant) {
        self.last_render = Some(now);
    }

    pub fn record_sent(&mut self, id: MessageId) {
        self.sent_message_ids.push(id);
    }

    pub fn sent_message_ids(&self) -> &[MessageId] {
        &self.sent_message_ids
    }

    /// Hand the owned results over once the generation is done.
    pub fn into_parts(self) -> AccumulatedParts {
        let answer = self.delivered_answer();
        AccumulatedParts {
            answer,
            answer_text: self.answer_text,
            reasoning_text: self.reasoning_text,
            answer_segments: self.answer_segments,
            sent_message_ids: self.sent_message_ids,
            tool_use_counts: self.tool_use_counts,
        }
    }
}

#[derive(Debug)]
pub struct AccumulatedParts {
    pub answer: String,
    pub answer_text: String,
    pub reasoning_text: String,
    pub answer_segments: Vec<AnswerSegment>,
    pub sent_message_ids: Vec<MessageId>,
    pub tool_use_counts: HashMap<String, u32>,
}
