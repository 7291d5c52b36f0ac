//! Generation Driver Tests
//!
//! What these tests protect:
//! - The user message and the final answer are stored, in order
//! - The stored answer carries the id of the first permanent message
//! - A backend that cannot open its stream still yields the apology
//! - History is trimmed and the system prompt leads the request
//! - Concurrent conversations do not share state
//! - Warnings about a failed stream carry the generation span
//!
//! What these tests intentionally do NOT assert:
//! - Preview traffic (covered by the renderer characterization tests)

mod common;

use anyhow::Result;
use async_trait::async_trait;
use common::{request, RecordingDelivery};
use quill_core::quill_providers::{
    Chunk, ChunkStream, CompletionRequest, MessageContent, MessageRole, ModelBackend,
    ScriptedBackend,
};
use quill_core::{
    generate_reply, ConversationStore, InMemoryStore, IncomingMessage, Localizer, RenderConfig,
    RenderRequest, ReplyServices, TokenEstimator,
};
use std::sync::{Arc, Mutex};
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Records the request it receives and answers with a fixed text.
struct CapturingBackend {
    seen: Mutex<Option<CompletionRequest>>,
}

#[async_trait]
impl ModelBackend for CapturingBackend {
    fn name(&self) -> &str {
        "capturing"
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream> {
        *self.seen.lock().unwrap() = Some(request);
        Ok(Box::pin(tokio_stream::iter(vec![Ok(Chunk::answer("ack"))])))
    }
}

/// Records, for every warning or error, the names of its enclosing spans.
#[derive(Clone, Default)]
struct SpanRecorder {
    events: Arc<Mutex<Vec<(Level, Vec<String>)>>>,
}

impl<S> Layer<S> for SpanRecorder
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: LayerContext<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }
        let spans: Vec<String> = ctx
            .event_scope(event)
            .map(|scope| scope.from_root().map(|span| span.name().to_string()).collect())
            .unwrap_or_default();
        self.events.lock().unwrap().push((level, spans));
    }
}

fn request_for(conversation_id: &str) -> RenderRequest {
    RenderRequest {
        conversation_id: conversation_id.to_string(),
        ..request(false)
    }
}

#[tokio::test]
async fn stores_user_and_assistant_messages() {
    let delivery = RecordingDelivery::new();
    let backend = ScriptedBackend::from_chunks(vec![Chunk::answer("Forty-two")]);
    let store = InMemoryStore::new();
    let config = RenderConfig::default();
    let l10n = Localizer::new();
    let estimator = TokenEstimator::new().unwrap();
    let services = ReplyServices {
        delivery: &delivery,
        backend: &backend,
        store: &store,
        config: &config,
        l10n: &l10n,
        estimator: &estimator,
    };

    let outcome = generate_reply(
        &services,
        request_for("conv-1"),
        IncomingMessage::new("What is the answer?"),
    )
    .await
    .unwrap();

    let history = store.history("conv-1").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, MessageRole::User);
    assert_eq!(history[0].text, "What is the answer?");
    assert_eq!(history[1].role, MessageRole::Assistant);
    assert_eq!(history[1].text, "Forty-two");
    assert_eq!(history[1].external_message_id, outcome.first_message_id());
}

#[tokio::test]
async fn backend_open_failure_delivers_apology() {
    let delivery = RecordingDelivery::new();
    let backend = ScriptedBackend::failing_to_open("401 Unauthorized");
    let store = InMemoryStore::new();
    let config = RenderConfig::default();
    let l10n = Localizer::new();
    let estimator = TokenEstimator::new().unwrap();
    let services = ReplyServices {
        delivery: &delivery,
        backend: &backend,
        store: &store,
        config: &config,
        l10n: &l10n,
        estimator: &estimator,
    };

    let outcome = generate_reply(&services, request_for("conv-err"), IncomingMessage::new("hi"))
        .await
        .unwrap();

    assert!(outcome.is_error());
    assert_eq!(delivery.sent().len(), 1);
    assert!(delivery.sent()[0].contains("Sorry, an error occurred"));
    let history = store.history("conv-err").await.unwrap();
    assert_eq!(history[1].text, "Sorry, an error occurred.");
}

#[tokio::test]
async fn history_is_trimmed_and_prompt_leads() {
    let delivery = RecordingDelivery::new();
    let backend = CapturingBackend {
        seen: Mutex::new(None),
    };
    let store = InMemoryStore::new();
    for i in 0..50 {
        store
            .append_message("conv-long", MessageRole::User, &format!("old message number {i}"), None)
            .await
            .unwrap();
    }
    let config = RenderConfig {
        context_token_limit: 60,
        ..RenderConfig::default()
    };
    let l10n = Localizer::new();
    let estimator = TokenEstimator::new().unwrap();
    let services = ReplyServices {
        delivery: &delivery,
        backend: &backend,
        store: &store,
        config: &config,
        l10n: &l10n,
        estimator: &estimator,
    };

    let incoming = IncomingMessage {
        system_prompt: Some("You are terse.".to_string()),
        ..IncomingMessage::new("newest question")
    };
    generate_reply(&services, request_for("conv-long"), incoming)
        .await
        .unwrap();

    let seen = backend.seen.lock().unwrap().clone().unwrap();
    assert!(seen.messages.len() < 52);
    assert_eq!(seen.messages[0].role, MessageRole::System);
    assert_eq!(
        seen.messages.last().unwrap().content,
        MessageContent::PlainText("newest question".to_string())
    );
    assert!(!seen.include_reasoning);
}

#[tokio::test]
async fn concurrent_conversations_are_independent() {
    let delivery = RecordingDelivery::new();
    let first = ScriptedBackend::from_chunks(vec![Chunk::answer("one")]);
    let second = ScriptedBackend::from_chunks(vec![Chunk::answer("two")]);
    let store = InMemoryStore::new();
    let config = RenderConfig::default();
    let l10n = Localizer::new();
    let estimator = TokenEstimator::new().unwrap();

    let services_a = ReplyServices {
        delivery: &delivery,
        backend: &first,
        store: &store,
        config: &config,
        l10n: &l10n,
        estimator: &estimator,
    };
    let services_b = ReplyServices {
        backend: &second,
        ..services_a
    };

    let (a, b) = tokio::join!(
        generate_reply(&services_a, request_for("a"), IncomingMessage::new("q1")),
        generate_reply(&services_b, request_for("b"), IncomingMessage::new("q2")),
    );

    assert_eq!(a.unwrap().answer, "one");
    assert_eq!(b.unwrap().answer, "two");
    assert_eq!(store.history("a").await.unwrap()[1].text, "one");
    assert_eq!(store.history("b").await.unwrap()[1].text, "two");
}

#[tokio::test]
async fn open_failure_is_logged_inside_the_generation_span() {
    let recorder = SpanRecorder::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(recorder.clone()));

    let delivery = RecordingDelivery::new();
    let backend = ScriptedBackend::failing_to_open("503 Service Unavailable");
    let store = InMemoryStore::new();
    let config = RenderConfig::default();
    let l10n = Localizer::new();
    let estimator = TokenEstimator::new().unwrap();
    let services = ReplyServices {
        delivery: &delivery,
        backend: &backend,
        store: &store,
        config: &config,
        l10n: &l10n,
        estimator: &estimator,
    };

    generate_reply(&services, request_for("conv-span"), IncomingMessage::new("hi"))
        .await
        .unwrap();

    let events = recorder.events.lock().unwrap().clone();
    assert!(events.iter().any(|(level, _)| *level == Level::WARN));
    for (level, spans) in &events {
        assert!(
            spans.iter().any(|name| name == "generation"),
            "{level} event logged outside the generation span"
        );
    }
}
