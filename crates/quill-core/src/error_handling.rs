//! Delivery failure taxonomy.
//!
//! Formatting rejections and rate limits are recovered locally by the
//! delivery policy; everything else propagates to the caller.

use std::time::Duration;
use thiserror::Error;

/// Backoff used when the platform reports a rate limit without a delay.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The rich-text form was syntactically invalid for the platform.
    #[error("rich text rejected: {0}")]
    Formatting(String),
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("platform error {code}: {description}")]
    Api { code: i64, description: String },
    #[error("transport error: {0}")]
    Transport(String),
}

impl DeliveryError {
    pub fn is_formatting(&self) -> bool {
        matches!(self, DeliveryError::Formatting(_))
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, DeliveryError::RateLimited { .. })
    }
}

/// Map a platform error response onto the taxonomy.
pub fn classify_api_error(code: i64, description: &str, retry_after: Option<u64>) -> DeliveryError {
    if code == 429 || retry_after.is_some() {
        return DeliveryError::RateLimited {
            retry_after: retry_after
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER),
        };
    }

    let lower = description.to_lowercase();
    if lower.contains("can't parse") || lower.contains("parse entities") || lower.contains("parse error") {
        return DeliveryError::Formatting(description.to_string());
    }

    DeliveryError::Api {
        code,
        description: description.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_failure_is_formatting() {
        let err = classify_api_error(
            400,
            "Bad Request: can't parse entities: Character '.' is reserved",
            None,
        );
        assert!(err.is_formatting());
    }

    #[test]
    fn retry_after_wins_over_description() {
        let err = classify_api_error(429, "Too Many Requests: retry after 7", Some(7));
        assert_eq!(
            err,
            DeliveryError::RateLimited {
                retry_after: Duration::from_secs(7)
            }
        );
    }

    #[test]
    fn other_errors_keep_code_and_description() {
        let err = classify_api_error(403, "Forbidden: bot was blocked by the user", None);
        assert!(matches!(err, DeliveryError::Api { code: 403, .. }));
    }
}
