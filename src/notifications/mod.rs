//! Outbound order emails.
//!
//! Delivery is delegated to a [`Notifier`]. Callers never branch on the
//! outcome beyond logging it; see `services::notifications` for the
//! idempotent dispatcher that wraps a notifier.

use crate::entities::{notification::NotificationKind, order};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument};

/// A rendered email ready for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub from: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Notification delivery errors
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Relay request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Relay rejected message with status {0}")]
    Rejected(u16),
    #[error("No recipient address for user {0}")]
    MissingRecipient(uuid::Uuid),
    #[error("Notification ledger error: {0}")]
    Ledger(String),
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Sends one email. Implementations make a single best-effort attempt.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError>;

    fn name(&self) -> &'static str;
}

/// Writes messages to the log instead of delivering them.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    #[instrument(skip(self, message), fields(recipient = %message.recipient))]
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        info!(subject = %message.subject, "email (log notifier)");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Posts messages as JSON to an HTTP mail relay.
#[derive(Clone)]
pub struct HttpRelayNotifier {
    client: reqwest::Client,
    relay_url: String,
}

impl HttpRelayNotifier {
    pub fn new(relay_url: impl Into<String>, timeout: Duration) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            relay_url: relay_url.into(),
        })
    }
}

#[async_trait]
impl Notifier for HttpRelayNotifier {
    #[instrument(
        skip(self, message),
        fields(recipient = %message.recipient, relay = %self.relay_url)
    )]
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.relay_url)
            .json(message)
            .send()
            .await?;

        if response.status().is_success() {
            info!("Email handed to relay");
            Ok(())
        } else {
            Err(NotificationError::Rejected(response.status().as_u16()))
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Keeps sent messages in memory. Delivery can be switched to fail.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    sent: Mutex<Vec<EmailMessage>>,
    failing: AtomicBool,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent sends fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Messages whose subject contains `needle`
    pub fn sent_matching(&self, needle: &str) -> Vec<EmailMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.subject.contains(needle))
            .collect()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Delivery("in-memory notifier set to fail".into()));
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| NotificationError::Delivery("notifier mutex poisoned".into()))?;
        sent.push(message.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

/// Builds the notifier selected by `notifier_backend`.
pub fn notifier_from_config(
    cfg: &crate::config::AppConfig,
) -> Result<Arc<dyn Notifier>, NotificationError> {
    match cfg.notifier_backend.to_ascii_lowercase().as_str() {
        "http" => {
            let url = cfg
                .notifier_relay_url
                .clone()
                .ok_or_else(|| NotificationError::Delivery("relay url not configured".into()))?;
            Ok(Arc::new(HttpRelayNotifier::new(
                url,
                Duration::from_secs(cfg.notifier_timeout_secs),
            )?))
        }
        "in-memory" => Ok(Arc::new(InMemoryNotifier::new())),
        _ => Ok(Arc::new(LogNotifier)),
    }
}

/// Renders order emails
pub struct NotificationBuilder;

impl NotificationBuilder {
    pub fn order_email(
        kind: NotificationKind,
        order: &order::Model,
        from: &str,
        recipient: &str,
    ) -> EmailMessage {
        let (subject, body) = match kind {
            NotificationKind::OrderPlaced => (
                format!("Order {} placed: please pay", order.slug),
                format!(
                    "Thank you for your order {}. Please pay {} {} to complete it.",
                    order.slug,
                    order.total_sum.round_dp(2),
                    order.currency
                ),
            ),
            NotificationKind::OrderPaid => (
                format!("Order {} paid", order.slug),
                format!(
                    "We received full payment of {} {} for order {}.",
                    order.total_sum.round_dp(2),
                    order.currency,
                    order.slug
                ),
            ),
            NotificationKind::OrderUnpaid => (
                format!("Order {} payment incomplete", order.slug),
                format!(
                    "The payment for order {} did not cover the total of {} {}. \
                     Please submit a new payment.",
                    order.slug,
                    order.total_sum.round_dp(2),
                    order.currency
                ),
            ),
            NotificationKind::OrderCancelled => (
                format!("Order {} cancelled", order.slug),
                format!("Your order {} has been cancelled.", order.slug),
            ),
        };

        EmailMessage {
            from: from.to_string(),
            recipient: recipient.to_string(),
            subject,
            body,
        }
    }
}
