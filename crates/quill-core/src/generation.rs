//! One reply, end to end: history, model stream, rendering, storage.

use anyhow::{Context, Result};
use quill_providers::{ChunkStream, CompletionRequest, Message, MessageRole, ModelBackend};
use tracing::{debug, warn, Instrument};

use crate::config::RenderConfig;
use crate::delivery::{Delivery, MessageId};
use crate::history::{trim_history, TokenEstimator};
use crate::i18n::Localizer;
use crate::outcome::RenderOutcome;
use crate::renderer::{RenderRequest, ResponseRenderer};
use crate::store::ConversationStore;

/// Shared, read-only collaborators. One instance serves every conversation.
pub struct ReplyServices<'a, D: Delivery + ?Sized> {
    pub delivery: &'a D,
    pub backend: &'a dyn ModelBackend,
    pub store: &'a dyn ConversationStore,
    pub config: &'a RenderConfig,
    pub l10n: &'a Localizer,
    pub estimator: &'a TokenEstimator,
}

/// The user message that triggered the reply.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub text: String,
    pub message_id: Option<MessageId>,
    pub system_prompt: Option<String>,
}

impl IncomingMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            message_id: None,
            system_prompt: None,
        }
    }
}

/// Store the user message, stream a reply to the chat and store the answer.
///
/// A backend that fails to open its stream is handled like a stream that
/// fails midway: the user gets the apology and the error is recorded in the
/// outcome. Only delivery and store failures are returned as errors.
pub async fn generate_reply<D: Delivery + ?Sized>(
    services: &ReplyServices<'_, D>,
    request: RenderRequest,
    incoming: IncomingMessage,
) -> Result<RenderOutcome> {
    let conversation_id = request.conversation_id.clone();

    services
        .store
        .append_message(
            &conversation_id,
            MessageRole::User,
            &incoming.text,
            incoming.message_id,
        )
        .await
        .context("Failed to store user message")?;

    let stored = services
        .store
        .history(&conversation_id)
        .await
        .context("Failed to load conversation history")?;
    let history: Vec<Message> = stored.iter().map(|m| m.to_message()).collect();
    let mut messages = trim_history(
        &history,
        services.config.context_token_limit,
        services.estimator,
    );
    if let Some(prompt) = incoming.system_prompt {
        messages.insert(0, Message::new(MessageRole::System, prompt));
    }

    debug!(
        "Requesting completion from {} with {} messages for conversation {}",
        services.backend.name(),
        messages.len(),
        conversation_id
    );

    let completion = CompletionRequest {
        messages,
        include_reasoning: request.show_thinking,
    };
    let renderer = ResponseRenderer::new(services.delivery, services.config, services.l10n, request);
    let span = renderer.span().clone();

    let stream: ChunkStream = match services
        .backend
        .stream(completion)
        .instrument(span.clone())
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            span.in_scope(|| {
                warn!("Backend {} failed to open stream: {:#}", services.backend.name(), e)
            });
            Box::pin(tokio_stream::once(Err(e)))
        }
    };

    let outcome = renderer.render(stream).await?;

    services
        .store
        .append_message(
            &conversation_id,
            MessageRole::Assistant,
            &outcome.answer,
            outcome.first_message_id(),
        )
        .await
        .context("Failed to store assistant message")?;

    Ok(outcome)
}
