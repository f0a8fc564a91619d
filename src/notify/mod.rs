//! Notification dispatch for RSS Monitor.
//!
//! New items of a cycle are fanned out to the client's sinks and the global
//! sinks. Each sink kind is backed by a [`NotificationTransport`].

mod dispatcher;
mod mail;
mod types;
mod webhook;

use async_trait::async_trait;

use crate::feed::Item;
use crate::Result;

pub use dispatcher::Dispatcher;
pub use mail::MailSpoolTransport;
pub use types::{DispatchResult, NotificationSink, SinkKind, SinkOutcome};
pub use webhook::{ChatTransport, WebhookTransport};

/// Delivery channel for one sink kind.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Deliver `items` to `recipient`.
    ///
    /// Fails with [`crate::MonitorError::Sink`] on transport failure.
    async fn send(&self, recipient: &str, subject: &str, items: &[Item]) -> Result<()>;
}

/// Plain-text listing of items, one block per item.
pub(crate) fn render_items(items: &[Item], date: impl Fn(&Item) -> Option<String>) -> String {
    let mut out = String::new();
    for item in items {
        out.push_str("- ");
        out.push_str(&item.title);
        out.push('\n');
        if let Some(link) = &item.link {
            out.push_str("  ");
            out.push_str(link);
            out.push('\n');
        }
        if let Some(date) = date(item) {
            out.push_str("  ");
            out.push_str(&date);
            out.push('\n');
        }
    }
    out
}
