//! Shared test doubles for quill-core integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use quill_core::quill_providers::{Chunk, ChunkStream};
use quill_core::{
    ChatTarget, Delivery, DeliveryError, Localizer, MessageId, RenderConfig, RenderOutcome,
    RenderRequest, ResponseRenderer, SurfaceId, TextFormat,
};
use quill_core::i18n::Language;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryCall {
    Send {
        text: String,
        format: TextFormat,
        delivered: bool,
    },
    Preview {
        surface: SurfaceId,
        text: String,
        format: TextFormat,
    },
    Delete {
        message_id: MessageId,
    },
}

/// Records every delivery call and fails on demand.
///
/// Injected send failures are consumed in order, one per `send_message`
/// call. With `reject_rich` set, every rich-text send and preview is refused
/// as a formatting error.
#[derive(Default)]
pub struct RecordingDelivery {
    calls: Mutex<Vec<DeliveryCall>>,
    send_failures: Mutex<VecDeque<DeliveryError>>,
    preview_failures: Mutex<VecDeque<DeliveryError>>,
    reject_rich: AtomicBool,
    next_id: AtomicI64,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(100),
            ..Self::default()
        }
    }

    pub fn rejecting_rich_text() -> Self {
        let delivery = Self::new();
        delivery.reject_rich.store(true, Ordering::SeqCst);
        delivery
    }

    pub fn fail_next_send(&self, error: DeliveryError) {
        self.send_failures.lock().unwrap().push_back(error);
    }

    pub fn fail_next_preview(&self, error: DeliveryError) {
        self.preview_failures.lock().unwrap().push_back(error);
    }

    pub fn calls(&self) -> Vec<DeliveryCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Texts of permanent messages that were accepted, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent_with_format().into_iter().map(|(t, _)| t).collect()
    }

    pub fn sent_with_format(&self) -> Vec<(String, TextFormat)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                DeliveryCall::Send {
                    text,
                    format,
                    delivered: true,
                } => Some((text, format)),
                _ => None,
            })
            .collect()
    }

    pub fn send_attempts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, DeliveryCall::Send { .. }))
            .count()
    }

    pub fn previews(&self) -> Vec<(SurfaceId, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                DeliveryCall::Preview { surface, text, .. } => Some((surface, text)),
                _ => None,
            })
            .collect()
    }

    pub fn preview_texts(&self) -> Vec<String> {
        self.previews().into_iter().map(|(_, text)| text).collect()
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    async fn send_message(
        &self,
        _target: &ChatTarget,
        text: &str,
        format: TextFormat,
    ) -> Result<MessageId, DeliveryError> {
        let failure = if format == TextFormat::Rich && self.reject_rich.load(Ordering::SeqCst) {
            Some(DeliveryError::Formatting("can't parse entities".to_string()))
        } else {
            self.send_failures.lock().unwrap().pop_front()
        };

        self.calls.lock().unwrap().push(DeliveryCall::Send {
            text: text.to_string(),
            format,
            delivered: failure.is_none(),
        });

        match failure {
            Some(err) => Err(err),
            None => Ok(MessageId(self.next_id.fetch_add(1, Ordering::SeqCst))),
        }
    }

    async fn update_preview(
        &self,
        _target: &ChatTarget,
        surface: SurfaceId,
        text: &str,
        format: TextFormat,
    ) -> Result<(), DeliveryError> {
        self.calls.lock().unwrap().push(DeliveryCall::Preview {
            surface,
            text: text.to_string(),
            format,
        });

        if format == TextFormat::Rich && self.reject_rich.load(Ordering::SeqCst) {
            return Err(DeliveryError::Formatting("can't parse entities".to_string()));
        }
        match self.preview_failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn delete_message(
        &self,
        _target: &ChatTarget,
        message_id: MessageId,
    ) -> Result<(), DeliveryError> {
        self.calls
            .lock()
            .unwrap()
            .push(DeliveryCall::Delete { message_id });
        Ok(())
    }
}

pub fn target() -> ChatTarget {
    ChatTarget::new(4242)
}

pub fn request(show_thinking: bool) -> RenderRequest {
    RenderRequest {
        target: target(),
        conversation_id: "test-conversation".to_string(),
        show_thinking,
        language: Language::En,
    }
}

/// Stream that yields every chunk immediately.
pub fn instant_stream(chunks: Vec<Chunk>) -> ChunkStream {
    Box::pin(tokio_stream::iter(chunks.into_iter().map(Ok)))
}

pub async fn render(
    delivery: &RecordingDelivery,
    stream: ChunkStream,
    show_thinking: bool,
) -> RenderOutcome {
    let config = RenderConfig::default();
    let l10n = Localizer::new();
    ResponseRenderer::new(delivery, &config, &l10n, request(show_thinking))
        .render(stream)
        .await
        .expect("render should succeed")
}

/// Whether the answer ledger is a prefix of the raw answer text.
pub fn ledger_is_prefix(outcome: &RenderOutcome) -> bool {
    let joined: String = outcome
        .answer_segments
        .iter()
        .map(|s| s.raw.as_str())
        .collect();
    outcome.answer_text.starts_with(&joined)
}
