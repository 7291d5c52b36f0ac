//! Telegram Bot API delivery adapter.
//!
//! Previews are drafts (`sendMessageDraft`) keyed by the surface id, so a
//! rotated surface starts a new draft instead of overwriting the old one.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::TelegramConfig;
use crate::delivery::{ChatTarget, Delivery, MessageId, SurfaceId, TextFormat};
use crate::error_handling::{classify_api_error, DeliveryError};

const RICH_PARSE_MODE: &str = "MarkdownV2";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Clone)]
pub struct TelegramDelivery {
    client: Client,
    /// `<api_base>/bot<token>`, no trailing slash.
    base_url: String,
}

impl TelegramDelivery {
    pub fn new(api_base: &str, bot_token: &str) -> Self {
        let base_url = format!("{}/bot{}", api_base.trim_end_matches('/'), bot_token);
        Self {
            client: Client::new(),
            base_url,
        }
    }

    pub fn from_config(config: &TelegramConfig) -> Result<Self> {
        let token = config
            .bot_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| anyhow!("No Telegram bot token configured"))?;
        Ok(Self::new(&config.api_base, token))
    }

    async fn call(&self, method: &str, body: Value) -> Result<Value, DeliveryError> {
        debug!("Telegram {} request", method);

        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        parse_api_response(status.as_u16(), &text)
    }
}

/// Turn a raw Bot API response into the result payload or a classified error.
fn parse_api_response(status: u16, body: &str) -> Result<Value, DeliveryError> {
    let parsed: ApiResponse = serde_json::from_str(body).map_err(|e| {
        DeliveryError::Transport(format!("unreadable response (HTTP {}): {}", status, e))
    })?;

    if parsed.ok {
        return Ok(parsed.result.unwrap_or(Value::Bool(true)));
    }

    let code = parsed.error_code.unwrap_or(status as i64);
    let description = parsed.description.unwrap_or_default();
    let retry_after = parsed.parameters.and_then(|p| p.retry_after);
    Err(classify_api_error(code, &description, retry_after))
}

fn message_body(target: &ChatTarget, text: &str, format: TextFormat) -> Value {
    let mut body = json!({
        "chat_id": target.chat_id,
        "text": text,
    });
    if let Some(thread_id) = target.thread_id {
        body["message_thread_id"] = json!(thread_id);
    }
    if format == TextFormat::Rich {
        body["parse_mode"] = json!(RICH_PARSE_MODE);
    }
    body
}

#[async_trait]
impl Delivery for TelegramDelivery {
    async fn send_message(
        &self,
        target: &ChatTarget,
        text: &str,
        format: TextFormat,
    ) -> Result<MessageId, DeliveryError> {
        let result = self
            .call("sendMessage", message_body(target, text, format))
            .await?;
        let sent: SentMessage = serde_json::from_value(result)
            .map_err(|e| DeliveryError::Transport(format!("missing message_id: {}", e)))?;
        Ok(MessageId(sent.message_id))
    }

    async fn update_preview(
        &self,
        target: &ChatTarget,
        surface: SurfaceId,
        text: &str,
        format: TextFormat,
    ) -> Result<(), DeliveryError> {
        let mut body = message_body(target, text, format);
        body["draft_id"] = json!(surface.0);
        self.call("sendMessageDraft", body).await?;
        Ok(())
    }

    async fn delete_message(
        &self,
        target: &ChatTarget,
        message_id: MessageId,
    ) -> Result<(), DeliveryError> {
        let body = json!({
            "chat_id": target.chat_id,
            "message_id": message_id.0,
        });
        self.call("deleteMessage", body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn ok_response_returns_result() {
        let result = parse_api_response(200, r#"{"ok":true,"result":{"message_id":77}}"#).unwrap();
        let sent: SentMessage = serde_json::from_value(result).unwrap();
        assert_eq!(sent.message_id, 77);
    }

    #[test]
    fn parse_rejection_maps_to_formatting() {
        let body = r#"{"ok":false,"error_code":400,"description":"Bad Request: can't parse entities: Can't find end of Bold entity at byte offset 3"}"#;
        let err = parse_api_response(400, body).unwrap_err();
        assert!(err.is_formatting());
    }

    #[test]
    fn flood_control_carries_retry_after() {
        let body = r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 3","parameters":{"retry_after":3}}"#;
        let err = parse_api_response(429, body).unwrap_err();
        assert_eq!(
            err,
            DeliveryError::RateLimited {
                retry_after: Duration::from_secs(3)
            }
        );
    }

    #[test]
    fn non_json_body_is_transport_error() {
        let err = parse_api_response(502, "<html>Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
    }

    #[test]
    fn body_includes_thread_and_parse_mode() {
        let target = ChatTarget::new(5).in_thread(9);
        let body = message_body(&target, "hi", TextFormat::Rich);
        assert_eq!(body["message_thread_id"], 9);
        assert_eq!(body["parse_mode"], "MarkdownV2");

        let plain = message_body(&ChatTarget::new(5), "hi", TextFormat::Plain);
        assert!(plain.get("parse_mode").is_none());
        assert!(plain.get("message_thread_id").is_none());
    }

    #[test]
    fn missing_token_is_an_error() {
        assert!(TelegramDelivery::from_config(&TelegramConfig::default()).is_err());
    }
}
