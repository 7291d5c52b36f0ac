//! Retry Behavior Tests
//!
//! CHARACTERIZATION: These tests lock down the delivery policy that sits
//! between the renderer and a platform adapter.
//!
//! What these tests protect:
//! - Formatting rejections are retried once as plain text
//! - Rate limits are waited out once, with the original formatting
//! - A second rate limit, or any other error, propagates
//! - Preview updates and deletes never fail the caller
//!
//! What these tests intentionally do NOT assert:
//! - Log output
//! - Platform-specific error strings beyond classification
//!
//! Surface: delivery::{send_permanent, refresh_preview, delete_quietly}
//! Boundary: Delivery trait

mod common;

use common::{target, DeliveryCall, RecordingDelivery};
use quill_core::delivery::{delete_quietly, refresh_preview, send_permanent};
use quill_core::{DeliveryError, MessageId, OutgoingText, SurfaceId, TextFormat};
use std::time::Duration;
use tokio::time::Instant;

fn rate_limited(secs: u64) -> DeliveryError {
    DeliveryError::RateLimited {
        retry_after: Duration::from_secs(secs),
    }
}

// =============================================================================
// Permanent sends
// =============================================================================

mod permanent_send {
    use super::*;

    #[tokio::test]
    async fn rich_text_succeeds_first_time() {
        let delivery = RecordingDelivery::new();
        let text = OutgoingText::rich("*bold*", "bold");

        send_permanent(&delivery, &target(), &text).await.unwrap();

        assert_eq!(
            delivery.sent_with_format(),
            vec![("*bold*".to_string(), TextFormat::Rich)]
        );
        assert_eq!(delivery.send_attempts(), 1);
    }

    #[tokio::test]
    async fn formatting_rejection_retries_as_plain() {
        let delivery = RecordingDelivery::rejecting_rich_text();
        let text = OutgoingText::rich("*broken", "*broken");

        let id = send_permanent(&delivery, &target(), &text).await.unwrap();

        assert_eq!(delivery.send_attempts(), 2);
        assert_eq!(
            delivery.sent_with_format(),
            vec![("*broken".to_string(), TextFormat::Plain)]
        );
        assert!(id.0 > 0);
    }

    #[tokio::test]
    async fn plain_only_text_is_sent_plain() {
        let delivery = RecordingDelivery::new();
        send_permanent(&delivery, &target(), &OutgoingText::plain("hi"))
            .await
            .unwrap();
        assert_eq!(
            delivery.sent_with_format(),
            vec![("hi".to_string(), TextFormat::Plain)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_then_retries_with_same_format() {
        let delivery = RecordingDelivery::new();
        delivery.fail_next_send(rate_limited(5));
        let start = Instant::now();

        send_permanent(&delivery, &target(), &OutgoingText::rich("ok", "ok"))
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(5));
        let formats: Vec<TextFormat> = delivery
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                DeliveryCall::Send { format, .. } => Some(format),
                _ => None,
            })
            .collect();
        assert_eq!(formats, vec![TextFormat::Rich, TextFormat::Rich]);
    }

    #[tokio::test(start_paused = true)]
    async fn second_rate_limit_propagates() {
        let delivery = RecordingDelivery::new();
        delivery.fail_next_send(rate_limited(1));
        delivery.fail_next_send(rate_limited(1));

        let err = send_permanent(&delivery, &target(), &OutgoingText::plain("x"))
            .await
            .unwrap_err();

        assert!(err.is_rate_limit());
        assert_eq!(delivery.send_attempts(), 2);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let delivery = RecordingDelivery::new();
        delivery.fail_next_send(DeliveryError::Transport("connection refused".to_string()));

        let err = send_permanent(&delivery, &target(), &OutgoingText::plain("x"))
            .await
            .unwrap_err();

        assert!(matches!(err, DeliveryError::Transport(_)));
        assert_eq!(delivery.send_attempts(), 1);
    }
}

// =============================================================================
// Best-effort operations
// =============================================================================

mod best_effort {
    use super::*;

    #[tokio::test]
    async fn preview_falls_back_to_plain() {
        let delivery = RecordingDelivery::rejecting_rich_text();
        let surface = SurfaceId(7);

        let landed = refresh_preview(
            &delivery,
            &target(),
            surface,
            &OutgoingText::rich("*x", "x"),
        )
        .await;

        assert!(landed);
        assert_eq!(
            delivery.preview_texts(),
            vec!["*x".to_string(), "x".to_string()]
        );
    }

    #[tokio::test]
    async fn preview_failure_is_swallowed() {
        let delivery = RecordingDelivery::new();
        delivery.fail_next_preview(DeliveryError::Api {
            code: 400,
            description: "Bad Request: draft expired".to_string(),
        });

        let landed =
            refresh_preview(&delivery, &target(), SurfaceId(1), &OutgoingText::plain("x")).await;

        assert!(!landed);
        assert_eq!(delivery.previews().len(), 1);
    }

    #[tokio::test]
    async fn delete_is_recorded() {
        let delivery = RecordingDelivery::new();
        delete_quietly(&delivery, &target(), MessageId(9)).await;
        assert_eq!(
            delivery.calls(),
            vec![DeliveryCall::Delete {
                message_id: MessageId(9)
            }]
        );
    }
}
