//! Notification interface
//!
//! Delivery (SMS/email/push) belongs to an external layer. This core only
//! hands a message over and records whether it was accepted; delivery retry
//! is the notification layer's concern, not ours.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::domain::Priority;

/// Errors from the notification layer
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),

    #[error("unknown recipient: {0}")]
    UnknownRecipient(String),
}

/// Delivery receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: bool,
}

/// Notification sender
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a message to a user. Failures are logged by callers, never
    /// retried here.
    async fn notify(&self, user_id: &str, message: &str, priority: Priority) -> Result<Delivery, NotifyError>;
}

/// Log-backed notifier for local runs and tests
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: &str, message: &str, priority: Priority) -> Result<Delivery, NotifyError> {
        info!(%user_id, %priority, message, "notification");
        Ok(Delivery { delivered: true })
    }
}
