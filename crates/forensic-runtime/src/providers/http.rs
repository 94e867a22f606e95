//! Shared HTTP plumbing for the reqwest-backed providers.

use std::time::Duration;

use parking_lot::RwLock;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

use super::ProviderError;

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 500;

/// A `reqwest::Client` built on first use and dropped on shutdown.
///
/// The client is cloned out of the lock, so no guard is held across an
/// `.await`.
#[derive(Debug, Default)]
pub(crate) struct LazyClient {
    client: RwLock<Option<reqwest::Client>>,
}

impl LazyClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self) -> Result<reqwest::Client, ProviderError> {
        if let Some(client) = self.client.read().as_ref() {
            return Ok(client.clone());
        }

        let mut slot = self.client.write();
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::HttpError(format!("failed to build HTTP client: {e}")))?;
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Drop the pooled client. Returns whether one existed.
    pub(crate) fn shutdown(&self) -> bool {
        self.client.write().take().is_some()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.client.read().is_some()
    }
}

/// Map a transport failure from `send()`.
pub(crate) fn send_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::HttpError(err.to_string())
    }
}

/// `retry-after` in whole seconds, when present.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Classify a non-success status. `message` is the provider's error text.
pub(crate) fn status_error(
    status: StatusCode,
    retry_after: Option<Duration>,
    message: String,
) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::AuthError(message),
        429 => ProviderError::RateLimited { retry_after },
        code => ProviderError::ApiError {
            status: code,
            message,
        },
    }
}

/// Pull `error.message` out of a JSON error body, falling back to the
/// (truncated) raw body.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(MAX_ERROR_BODY).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, None, "bad key".into()),
            ProviderError::AuthError(_)
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(3)), String::new()),
            ProviderError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(3)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, None, "upstream".into()),
            ProviderError::ApiError { status: 502, .. }
        ));
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"type":"error","error":{"type":"not_found_error","message":"model: nope"}}"#;
        assert_eq!(error_message(body), "model: nope");
        assert_eq!(error_message("<html>bad gateway</html>"), "<html>bad gateway</html>");
    }

    #[test]
    fn test_lazy_client_lifecycle() {
        let slot = LazyClient::new();
        assert!(!slot.is_active());
        assert!(slot.get().is_ok());
        assert!(slot.is_active());
        assert!(slot.shutdown());
        assert!(!slot.shutdown());
    }
}
