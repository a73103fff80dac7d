//! Notifier trait definition and shared error types.

use std::sync::Arc;
use std::time::Duration;

use vaccibot_core::GeoPoint;

/// Errors that can occur during notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API rejected the request: {0}")]
    Api(String),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

/// Outbound channel for slot alerts.
///
/// `send_message` carries the alert itself; `send_location` is a follow-up
/// that callers treat as supplementary.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a formatted text message.
    async fn send_message(&self, text: &str) -> Result<(), NotifyError>;

    /// Deliver a map pin.
    async fn send_location(&self, point: GeoPoint) -> Result<(), NotifyError>;

    /// Human-readable name for this channel (e.g., "telegram").
    fn channel_name(&self) -> &str;
}

#[async_trait::async_trait]
impl<T: Notifier + ?Sized> Notifier for Arc<T> {
    async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        (**self).send_message(text).await
    }

    async fn send_location(&self, point: GeoPoint) -> Result<(), NotifyError> {
        (**self).send_location(point).await
    }

    fn channel_name(&self) -> &str {
        (**self).channel_name()
    }
}
