//! Slack notifier behind a bounded queue.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::warn;

use crate::Notifier;

/// Queue depth before messages are dropped.
const QUEUE_CAPACITY: usize = 256;

/// Transport for chat messages; injectable for tests.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn post(&self, channel: &str, text: &str) -> anyhow::Result<()>;
}

/// Slack Web API transport (`chat.postMessage`).
pub struct SlackTransport {
    client: reqwest::Client,
    token: String,
}

impl SlackTransport {
    pub fn new(token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.to_owned(),
        }
    }
}

#[async_trait]
impl ChatTransport for SlackTransport {
    async fn post(&self, channel: &str, text: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .post("https://slack.com/api/chat.postMessage")
            .bearer_auth(&self.token)
            .json(&json!({"channel": channel, "text": text}))
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let reason = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            anyhow::bail!("slack rejected message: {reason}");
        }
        Ok(())
    }
}

/// Notifier that enqueues messages for a background worker.
///
/// `send` returns immediately; the worker drains the queue and posts each
/// message. When the queue is full the message is dropped with a warning so
/// a slow Slack endpoint can never stall the learn path.
pub struct SlackNotifier {
    tx: mpsc::Sender<String>,
    channel_id: String,
}

impl SlackNotifier {
    /// Build with the real Slack transport. Spawns the delivery worker, so a
    /// Tokio runtime must be running.
    pub fn new(token: &str, channel_id: &str) -> Self {
        Self::with_transport(Arc::new(SlackTransport::new(token)), channel_id)
    }

    pub fn with_transport(transport: Arc<dyn ChatTransport>, channel_id: &str) -> Self {
        let (tx, mut rx) = mpsc::channel::<String>(QUEUE_CAPACITY);
        let channel = channel_id.to_owned();
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(error) = transport.post(&channel, &text).await {
                    warn!(%error, "failed to deliver notification");
                }
            }
        });
        Self {
            tx,
            channel_id: channel_id.to_owned(),
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn is_active(&self) -> bool {
        !self.channel_id.is_empty()
    }

    async fn send(&self, message: &str) -> anyhow::Result<()> {
        if self.tx.try_send(message.to_owned()).is_err() {
            counter!("haven_notifications_dropped_total").increment(1);
            warn!("notification queue full, dropping message");
        }
        Ok(())
    }
}
