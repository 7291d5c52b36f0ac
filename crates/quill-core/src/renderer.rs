//! Incremental response rendering.
//!
//! Consumes one model stream and turns it into preview updates plus an
//! ordered series of permanent messages. The loop handles:
//! - Appending answer/reasoning deltas and tool invocations to the accumulator
//! - Throttled preview refreshes, and a keep-alive refresh when the stream stalls
//! - Overflow of reasoning and answer text into permanent messages
//! - Code fences that straddle a message boundary
//! - The final flush, which runs on success and on upstream failure alike

use anyhow::{Context, Result};
use quill_providers::Chunk;
use tokio::time::{timeout, Instant};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::accumulator::StreamAccumulator;
use crate::config::RenderConfig;
use crate::delivery::{self, ChatTarget, Delivery, MessageId, OutgoingText};
use crate::formatting::{
    combine_quote_and_answer, ends_inside_fence, quote_collapsed, quote_expanded,
    quote_expanded_tail, to_rich_text, truncate_rich, CODE_FENCE,
};
use crate::i18n::{Language, Localizer};
use crate::outcome::RenderOutcome;
use crate::split::{
    char_len, char_offset, find_split_point, reasoning_split_point, truncate_chars,
};
use crate::tool_status::{thinking_status_text, tool_status_text};

/// Where and how one generation is rendered.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub target: ChatTarget,
    pub conversation_id: String,
    pub show_thinking: bool,
    pub language: Language,
}

/// The next answer slice to finalize, with fence markers already applied.
#[derive(Debug)]
struct AnswerPiece {
    /// Bytes of the unsent answer this piece consumes.
    raw_len: usize,
    text: String,
    ends_in_fence: bool,
}

pub struct ResponseRenderer<'a, D: Delivery + ?Sized> {
    delivery: &'a D,
    config: &'a RenderConfig,
    l10n: &'a Localizer,
    request: RenderRequest,
    generation_id: Uuid,
    span: Span,
    state: StreamAccumulator,
    /// Status line currently on the preview, if the preview shows one.
    status_text: Option<String>,
    /// Last frame pushed to the current surface, re-sent when the stream stalls.
    last_preview: Option<OutgoingText>,
    /// Space out permanent sends (final flush only).
    pacing: bool,
}

impl<'a, D: Delivery + ?Sized> ResponseRenderer<'a, D> {
    pub fn new(
        delivery: &'a D,
        config: &'a RenderConfig,
        l10n: &'a Localizer,
        request: RenderRequest,
    ) -> Self {
        let generation_id = Uuid::new_v4();
        let span = info_span!(
            "generation",
            generation_id = %generation_id,
            conversation_id = %request.conversation_id
        );
        Self {
            delivery,
            config,
            l10n,
            request,
            generation_id,
            span,
            state: StreamAccumulator::new(),
            status_text: None,
            last_preview: None,
            pacing: false,
        }
    }

    pub fn generation_id(&self) -> Uuid {
        self.generation_id
    }

    /// Span carrying this generation's ids. Work done on its behalf before
    /// `render` runs belongs in it.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Render a whole stream. Always ends with at least one permanent message
    /// unless a permanent send fails outright, which is returned as an error.
    pub async fn render<S>(self, stream: S) -> Result<RenderOutcome>
    where
        S: Stream<Item = Result<Chunk>> + Unpin + Send,
    {
        let span = self.span.clone();
        self.run(stream).instrument(span).await
    }

    async fn run<S>(mut self, mut stream: S) -> Result<RenderOutcome>
    where
        S: Stream<Item = Result<Chunk>> + Unpin + Send,
    {
        let started = Instant::now();
        let mut chunks_received = 0usize;
        let mut first_chunk_after = None;
        let mut upstream_error: Option<String> = None;

        debug!(
            "Starting render: show_thinking={}, lang={:?}",
            self.request.show_thinking, self.request.language
        );

        let thinking = thinking_status_text(self.request.language, self.l10n);
        self.show_status(thinking).await;

        loop {
            let next = match timeout(self.config.stall_refresh(), stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    self.refresh_stalled_preview().await;
                    continue;
                }
            };

            match next {
                None => break,
                Some(Err(e)) => {
                    error!("Model stream failed after {} chunks: {:#}", chunks_received, e);
                    upstream_error = Some(format!("{:#}", e));
                    break;
                }
                Some(Ok(chunk)) => {
                    chunks_received += 1;
                    if first_chunk_after.is_none() {
                        first_chunk_after = Some(started.elapsed());
                        debug!("First chunk after {:?}", started.elapsed());
                    }

                    self.handle_chunk(&chunk).await;

                    if !self
                        .state
                        .render_due(Instant::now(), self.config.throttle_interval())
                    {
                        continue;
                    }
                    self.render_step().await?;
                    self.state.mark_rendered(Instant::now());
                }
            }
        }

        if upstream_error.is_some() {
            let apology = self
                .l10n
                .text("error_apology", self.request.language)
                .to_string();
            self.state.replace_unsent_answer(&apology);
        }

        self.finalize().await?;

        let generation_id = self.generation_id;
        let mut outcome = RenderOutcome::from_parts(generation_id, self.state.into_parts());
        outcome.upstream_error = upstream_error;
        outcome.chunks_received = chunks_received;
        outcome.first_chunk_after = first_chunk_after;
        outcome.elapsed = started.elapsed();

        info!(
            "Generation finished: {} permanent messages, {} chunks, {} tool uses in {:?}",
            outcome.sent_message_ids.len(),
            outcome.chunks_received,
            outcome.total_tool_uses(),
            outcome.elapsed
        );
        Ok(outcome)
    }

    async fn handle_chunk(&mut self, chunk: &Chunk) {
        if let Some(tool) = self.state.push_deltas(chunk) {
            debug!("Reasoning resumed after tool {}", tool);
            // With hidden reasoning there is nothing else to show yet
            if !self.request.show_thinking && !self.state.preview_shows_answer() {
                let thinking = thinking_status_text(self.request.language, self.l10n);
                if self.status_text.as_deref() != Some(thinking.as_str()) {
                    self.show_status(thinking).await;
                }
            }
        }

        if chunk.is_tool_invocation {
            let tool = chunk
                .tool_name
                .clone()
                .unwrap_or_else(|| "tool".to_string());
            self.handle_tool_invocation(&tool).await;
        }
    }

    async fn handle_tool_invocation(&mut self, tool: &str) {
        let count = self.state.divert_to_tool(tool);
        info!("Tool {} invoked (use #{})", tool, count);

        let status = tool_status_text(tool, count, self.request.language, self.l10n);
        let reasoning = self.state.unsent_reasoning().trim();

        if self.request.show_thinking && !reasoning.is_empty() {
            // The status line always fits; the reasoning keeps its newest tail
            let safe = self.config.safe_message_length;
            let status_rich = quote_expanded(&status);
            let rich_budget = safe.saturating_sub(char_len(&status_rich) + 1);
            let rich = format!("{}\n{}", quote_expanded_tail(reasoning, rich_budget), status_rich);

            let plain_budget = safe.saturating_sub(char_len(&status) + 1);
            let skip = char_len(reasoning).saturating_sub(plain_budget);
            let plain = format!("{}\n{}", &reasoning[char_offset(reasoning, skip)..], status);
            self.push_preview(OutgoingText::rich(rich, plain)).await;
            self.status_text = Some(status);
        } else {
            self.show_status(status).await;
        }
    }

    /// Steps that only run when the throttle gate is open.
    async fn render_step(&mut self) -> Result<()> {
        if self.request.show_thinking
            && !self.state.thinking_finalized()
            && self.state.pending_tool().is_none()
            && !self.state.answer_confirmed()
        {
            self.handle_reasoning_overflow().await?;
        }

        self.handle_answer_overflow().await?;
        self.update_answer_preview().await;
        Ok(())
    }

    async fn handle_reasoning_overflow(&mut self) -> Result<()> {
        let threshold = self.config.overflow_threshold();

        loop {
            let unsent = self.state.unsent_reasoning();
            if unsent.is_empty() || char_len(&quote_expanded(unsent)) < threshold {
                break;
            }
            let split = reasoning_split_point(unsent, self.config.split_limit());
            debug!("Reasoning overflow, finalizing {} bytes", split);
            self.send_reasoning_segment(split).await?;
        }

        let remaining = self.state.unsent_reasoning();
        if remaining.is_empty() {
            return Ok(());
        }

        let safe = self.config.safe_message_length;
        let rich = truncate_rich(&quote_expanded(remaining), safe);
        let plain = truncate_chars(remaining, safe).to_string();
        self.push_preview(OutgoingText::rich(rich, plain)).await;
        self.status_text = None;
        Ok(())
    }

    async fn handle_answer_overflow(&mut self) -> Result<()> {
        while char_len(self.state.unsent_answer()) >= self.config.overflow_threshold() {
            let Some(piece) = self.next_answer_piece(self.config.split_limit()) else {
                break;
            };
            debug!(
                "Answer overflow, finalizing {} bytes (ends in fence: {})",
                piece.raw_len, piece.ends_in_fence
            );

            if self.request.show_thinking
                && !self.state.thinking_finalized()
                && !self.state.reasoning_text().is_empty()
            {
                self.flush_reasoning().await?;
            }

            self.deliver_answer_piece(piece).await?;
            self.rotate_surface();
        }
        Ok(())
    }

    async fn update_answer_preview(&mut self) {
        let confirmed = self.state.confirm_answer(self.config.confirm_threshold);
        let unsent = self.state.unsent_answer();
        if !confirmed || unsent.trim().is_empty() {
            return;
        }

        let safe = self.config.safe_message_length;
        let mut draft = String::with_capacity(unsent.len() + 4);
        if self.state.in_code_fence() {
            draft.push_str(CODE_FENCE);
            draft.push('\n');
        }
        draft.push_str(unsent);
        let draft = truncate_chars(&draft, safe).to_string();

        let text = if !self.request.show_thinking || self.state.thinking_finalized() {
            let rich = truncate_rich(&to_rich_text(&draft), self.config.max_message_length);
            OutgoingText::rich(rich, draft)
        } else {
            let reasoning = self.state.unsent_reasoning();
            let combined = combine_quote_and_answer(reasoning, &draft);
            if char_len(&combined) > safe {
                // Leave the preview showing reasoning alone
                return;
            }
            let plain = if reasoning.is_empty() {
                draft
            } else {
                format!("{}\n\n{}", reasoning, draft)
            };
            OutgoingText::rich(combined, plain)
        };

        self.push_preview(text).await;
        self.state.set_preview_shows_answer(true);
        self.status_text = None;
    }

    async fn finalize(&mut self) -> Result<()> {
        self.pacing = true;

        if !self.state.has_delivered_answer() && self.state.unsent_answer().trim().is_empty() {
            debug!("Empty answer at stream end, sending the no-response sentinel");
            let sentinel = self
                .l10n
                .text("no_response", self.request.language)
                .to_string();
            self.state.replace_unsent_answer(&sentinel);
        }

        if self.request.show_thinking
            && !self.state.thinking_finalized()
            && !self.state.unsent_reasoning().trim().is_empty()
        {
            self.finalize_reasoning_with_answer().await?;
        }

        while let Some(piece) = self.next_answer_piece(self.config.safe_message_length) {
            self.deliver_answer_piece(piece).await?;
        }
        Ok(())
    }

    /// Send the open reasoning together with the first answer fragment when
    /// both fit one message, otherwise the reasoning on its own.
    async fn finalize_reasoning_with_answer(&mut self) -> Result<()> {
        let safe = self.config.safe_message_length;

        if let Some(piece) = self.next_answer_piece(safe) {
            if !piece.text.trim().is_empty() {
                let reasoning = self.state.unsent_reasoning().trim().to_string();
                let combined = combine_quote_and_answer(&reasoning, &piece.text);
                if char_len(&combined) <= safe {
                    let plain = format!("{}\n\n{}", reasoning, piece.text);
                    self.send_segment(OutgoingText::rich(combined, plain)).await?;

                    let reasoning_len = self.state.unsent_reasoning().len();
                    self.state.commit_reasoning(reasoning_len);
                    self.state.finalize_thinking();
                    self.state.commit_answer(piece.raw_len, piece.ends_in_fence);
                    return Ok(());
                }
            }
        }

        self.flush_reasoning().await
    }

    /// Finalize all unsent reasoning as collapsed quotes and latch it.
    async fn flush_reasoning(&mut self) -> Result<()> {
        let safe = self.config.safe_message_length;
        while !self.state.unsent_reasoning().is_empty() {
            let unsent = self.state.unsent_reasoning();
            let split = if char_len(&quote_collapsed(unsent)) <= safe {
                unsent.len()
            } else {
                reasoning_split_point(unsent, safe)
            };
            self.send_reasoning_segment(split).await?;
        }
        self.state.finalize_thinking();
        Ok(())
    }

    async fn send_reasoning_segment(&mut self, raw_len: usize) -> Result<()> {
        let head = self.state.unsent_reasoning()[..raw_len].trim().to_string();
        if !head.is_empty() {
            let text = self.permanent_text(quote_collapsed(&head), head);
            self.send_segment(text).await?;
        }
        self.state.commit_reasoning(raw_len);
        self.rotate_surface();
        Ok(())
    }

    /// Cut the next answer piece of at most `limit` characters, reopening a
    /// fence carried over from the previous piece and closing one left open.
    fn next_answer_piece(&self, limit: usize) -> Option<AnswerPiece> {
        let unsent = self.state.unsent_answer();
        if unsent.is_empty() {
            return None;
        }

        let raw_len = find_split_point(unsent, limit);
        let body = unsent[..raw_len].trim();
        if body.is_empty() {
            return Some(AnswerPiece {
                raw_len,
                text: String::new(),
                ends_in_fence: self.state.in_code_fence(),
            });
        }

        let mut text = String::with_capacity(body.len() + 8);
        if self.state.in_code_fence() {
            text.push_str(CODE_FENCE);
            text.push('\n');
        }
        text.push_str(body);

        let ends_in_fence = ends_inside_fence(&text);
        if ends_in_fence {
            text.push('\n');
            text.push_str(CODE_FENCE);
        }

        Some(AnswerPiece {
            raw_len,
            text,
            ends_in_fence,
        })
    }

    async fn deliver_answer_piece(&mut self, piece: AnswerPiece) -> Result<()> {
        if !piece.text.trim().is_empty() {
            let rich = to_rich_text(&piece.text);
            let text = self.permanent_text(rich, piece.text);
            self.send_segment(text).await?;
        }
        self.state.commit_answer(piece.raw_len, piece.ends_in_fence);
        Ok(())
    }

    /// Rich text that grew past the platform limit goes out as plain text.
    fn permanent_text(&self, rich: String, plain: String) -> OutgoingText {
        if char_len(&rich) > self.config.max_message_length {
            warn!(
                "Rich text is {} chars, over the {} limit; sending plain text",
                char_len(&rich),
                self.config.max_message_length
            );
            return OutgoingText::plain(plain);
        }
        OutgoingText::rich(rich, plain)
    }

    async fn send_segment(&mut self, text: OutgoingText) -> Result<MessageId> {
        if self.pacing && !self.state.sent_message_ids().is_empty() {
            tokio::time::sleep(self.config.inter_message_delay()).await;
        }

        let id = delivery::send_permanent(self.delivery, &self.request.target, &text)
            .await
            .map_err(|e| {
                error!("Permanent send failed: {}", e);
                e
            })
            .context("Failed to deliver a permanent message")?;

        debug!("Sent permanent message {:?}", id);
        self.state.record_sent(id);
        Ok(id)
    }

    async fn show_status(&mut self, status: String) {
        self.push_preview(OutgoingText::plain(status.clone())).await;
        self.status_text = Some(status);
    }

    async fn push_preview(&mut self, text: OutgoingText) {
        let surface = self.state.preview_surface();
        delivery::refresh_preview(self.delivery, &self.request.target, surface, &text).await;
        self.last_preview = Some(text);
    }

    /// Start a new preview lifecycle. The old frame belongs to the old surface.
    fn rotate_surface(&mut self) {
        self.state.rotate_surface();
        self.last_preview = None;
    }

    async fn refresh_stalled_preview(&mut self) {
        let nothing_unsent = self.state.unsent_answer().trim().is_empty()
            && self.state.unsent_reasoning().trim().is_empty();
        if self.status_text.is_none() && nothing_unsent {
            return;
        }
        let Some(text) = self.last_preview.clone() else {
            return;
        };
        debug!(
            "No chunks for {:?}, refreshing preview",
            self.config.stall_refresh()
        );
        let surface = self.state.preview_surface();
        delivery::refresh_preview(self.delivery, &self.request.target, surface, &text).await;
    }
}
