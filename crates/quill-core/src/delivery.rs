//! Delivery contract consumed by the renderer, plus the retry policy on top.
//!
//! Implementations only translate single calls to the platform. Recovery
//! (plain-text fallback, rate-limit backoff) lives in the free functions here
//! so every adapter gets the same semantics.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::error_handling::DeliveryError;

/// Identifier of a permanently sent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i64);

/// Identifier of a preview surface.
///
/// A new id starts a new preview lifecycle, so an adapter that cannot tell
/// an edit from a replacement opens a fresh surface instead of overwriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub i64);

impl SurfaceId {
    pub fn generate() -> Self {
        SurfaceId(rand::thread_rng().gen_range(1..i32::MAX as i64))
    }

    /// A fresh id guaranteed to differ from `self`.
    pub fn rotate(self) -> Self {
        loop {
            let next = Self::generate();
            if next != self {
                return next;
            }
        }
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where messages go: a chat, optionally a forum topic inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatTarget {
    pub chat_id: i64,
    pub thread_id: Option<i64>,
}

impl ChatTarget {
    pub fn new(chat_id: i64) -> Self {
        Self {
            chat_id,
            thread_id: None,
        }
    }

    pub fn in_thread(mut self, thread_id: i64) -> Self {
        self.thread_id = Some(thread_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextFormat {
    Rich,
    Plain,
}

/// Text ready for delivery: the rich form, if any, and its plain fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingText {
    pub rich: Option<String>,
    pub plain: String,
}

impl OutgoingText {
    pub fn rich(rich: impl Into<String>, plain: impl Into<String>) -> Self {
        Self {
            rich: Some(rich.into()),
            plain: plain.into(),
        }
    }

    pub fn plain(plain: impl Into<String>) -> Self {
        Self {
            rich: None,
            plain: plain.into(),
        }
    }
}

#[async_trait]
pub trait Delivery: Send + Sync {
    async fn send_message(
        &self,
        target: &ChatTarget,
        text: &str,
        format: TextFormat,
    ) -> Result<MessageId, DeliveryError>;

    async fn update_preview(
        &self,
        target: &ChatTarget,
        surface: SurfaceId,
        text: &str,
        format: TextFormat,
    ) -> Result<(), DeliveryError>;

    async fn delete_message(
        &self,
        target: &ChatTarget,
        message_id: MessageId,
    ) -> Result<(), DeliveryError>;
}

/// Send a permanent message.
///
/// Rich text first; a formatting rejection is retried once as plain text. A
/// rate limit sleeps the requested backoff and retries once with the same
/// formatting. Any other failure, or a second rate limit, propagates.
pub async fn send_permanent<D: Delivery + ?Sized>(
    delivery: &D,
    target: &ChatTarget,
    text: &OutgoingText,
) -> Result<MessageId, DeliveryError> {
    match send_with_fallback(delivery, target, text).await {
        Err(DeliveryError::RateLimited { retry_after }) => {
            warn!("Rate limited on permanent send, retrying in {:?}", retry_after);
            tokio::time::sleep(retry_after).await;
            send_with_fallback(delivery, target, text).await
        }
        other => other,
    }
}

async fn send_with_fallback<D: Delivery + ?Sized>(
    delivery: &D,
    target: &ChatTarget,
    text: &OutgoingText,
) -> Result<MessageId, DeliveryError> {
    let Some(rich) = &text.rich else {
        return delivery
            .send_message(target, &text.plain, TextFormat::Plain)
            .await;
    };

    match delivery.send_message(target, rich, TextFormat::Rich).await {
        Err(DeliveryError::Formatting(reason)) => {
            warn!("Rich text rejected ({}), sending plain text", reason);
            delivery
                .send_message(target, &text.plain, TextFormat::Plain)
                .await
        }
        other => other,
    }
}

/// Push text to a preview surface. Best-effort: returns whether it landed.
pub async fn refresh_preview<D: Delivery + ?Sized>(
    delivery: &D,
    target: &ChatTarget,
    surface: SurfaceId,
    text: &OutgoingText,
) -> bool {
    let result = match &text.rich {
        Some(rich) => match delivery
            .update_preview(target, surface, rich, TextFormat::Rich)
            .await
        {
            Err(DeliveryError::Formatting(reason)) => {
                debug!("Preview rich text rejected ({}), retrying plain", reason);
                delivery
                    .update_preview(target, surface, &text.plain, TextFormat::Plain)
                    .await
            }
            other => other,
        },
        None => {
            delivery
                .update_preview(target, surface, &text.plain, TextFormat::Plain)
                .await
        }
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            debug!("Preview update on surface {} failed, continuing: {}", surface, e);
            false
        }
    }
}

/// Delete a message, treating failure as a no-op.
pub async fn delete_quietly<D: Delivery + ?Sized>(
    delivery: &D,
    target: &ChatTarget,
    message_id: MessageId,
) {
    if let Err(e) = delivery.delete_message(target, message_id).await {
        debug!("Delete of message {:?} failed, ignoring: {}", message_id, e);
    }
}
