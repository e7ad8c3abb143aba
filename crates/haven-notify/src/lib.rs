//! Schema-change notifications.
//!
//! A fire-and-forget side channel announcing new schema versions. Delivery is
//! best effort: the learn path invokes the notifier only after commit, and
//! failures are logged and swallowed, never failing the request.

use async_trait::async_trait;

mod slack;

pub use slack::{ChatTransport, SlackNotifier, SlackTransport};

/// Side channel for schema-change announcements.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn is_active(&self) -> bool;

    /// Queue a message for delivery. Must never block the caller; an
    /// implementation that cannot keep up drops messages instead.
    async fn send(&self, message: &str) -> anyhow::Result<()>;
}

/// No-op notifier used when no channel is configured.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    fn is_active(&self) -> bool {
        false
    }

    async fn send(&self, _message: &str) -> anyhow::Result<()> {
        Ok(())
    }
}
