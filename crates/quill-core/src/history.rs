//! Conversation history preparation for the model request.

use anyhow::{Context, Result};
use quill_providers::{Message, MessageContent};
use regex::Regex;
use tracing::debug;

/// Fixed overhead per message on top of its content.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;
/// Flat cost of an image or file part.
const ATTACHMENT_TOKENS: usize = 85;
/// Characters one token covers inside a long word piece.
const CHARS_PER_TOKEN: usize = 6;

/// BPE-style pre-tokenizer: contractions, letter runs, up to three digits,
/// punctuation runs, whitespace.
const PRE_TOKEN_PATTERN: &str =
    r"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s+";

/// Approximate token counter.
///
/// Compiling the pattern is the expensive part, so build one estimator and
/// share it by reference for the life of the process.
#[derive(Debug, Clone)]
pub struct TokenEstimator {
    pre_token: Regex,
}

impl TokenEstimator {
    pub fn new() -> Result<Self> {
        let pre_token =
            Regex::new(PRE_TOKEN_PATTERN).context("Failed to compile token pattern")?;
        Ok(Self { pre_token })
    }

    pub fn count(&self, text: &str) -> usize {
        self.pre_token
            .find_iter(text)
            .map(|m| m.as_str().chars().count().div_ceil(CHARS_PER_TOKEN).max(1))
            .sum()
    }

    pub fn count_message(&self, message: &Message) -> usize {
        let content = match &message.content {
            MessageContent::PlainText(text) => self.count(text),
            MessageContent::MixedParts(_) => {
                let text: usize = message.content.texts().iter().map(|t| self.count(t)).sum();
                text + message.content.attachment_count() * ATTACHMENT_TOKENS
            }
        };
        MESSAGE_OVERHEAD_TOKENS + content + self.count(message.role.as_str())
    }
}

/// Keep the most recent messages that fit in `limit` tokens.
///
/// Stops at the first message (walking back from the newest) that would
/// overflow, so the result is always a contiguous suffix.
pub fn trim_history(messages: &[Message], limit: usize, estimator: &TokenEstimator) -> Vec<Message> {
    if messages.is_empty() {
        return Vec::new();
    }

    let costs: Vec<usize> = messages.iter().map(|m| estimator.count_message(m)).collect();
    let total: usize = costs.iter().sum();
    if total <= limit {
        return messages.to_vec();
    }

    let mut used = 0;
    let mut keep_from = messages.len();
    for (idx, cost) in costs.iter().enumerate().rev() {
        if used + cost > limit {
            break;
        }
        used += cost;
        keep_from = idx;
    }

    debug!(
        "Trimmed history from {} to {} messages ({} tokens)",
        messages.len(),
        messages.len() - keep_from,
        used
    );
    messages[keep_from..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_providers::{ContentPart, ImageUrl, MessageRole};

    #[test]
    fn counts_words_and_punctuation() {
        let estimator = TokenEstimator::new().unwrap();
        assert_eq!(estimator.count(""), 0);
        // "Hello" "," " world" "!"
        assert_eq!(estimator.count("Hello, world!"), 4);
    }

    #[test]
    fn long_words_cost_more() {
        let estimator = TokenEstimator::new().unwrap();
        assert!(estimator.count("internationalization") > estimator.count("intern"));
    }

    #[test]
    fn attachments_have_flat_cost() {
        let estimator = TokenEstimator::new().unwrap();
        let text_only = Message::new(MessageRole::User, "look");
        let with_image = Message::with_parts(
            MessageRole::User,
            vec![
                ContentPart::Text {
                    text: "look".to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "data:image/png;base64,AAAA".to_string(),
                    },
                },
            ],
        );
        assert_eq!(
            estimator.count_message(&with_image),
            estimator.count_message(&text_only) + ATTACHMENT_TOKENS
        );
    }

    #[test]
    fn everything_fits() {
        let estimator = TokenEstimator::new().unwrap();
        let messages = vec![
            Message::new(MessageRole::User, "hi"),
            Message::new(MessageRole::Assistant, "hello"),
        ];
        assert_eq!(trim_history(&messages, 1000, &estimator), messages);
    }
}
