//! Fan-out of new items to notification sinks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};

use crate::config::NotifyConfig;
use crate::feed::Item;
use crate::notify::mail::MailSpoolTransport;
use crate::notify::types::{DispatchResult, NotificationSink, SinkKind, SinkOutcome};
use crate::notify::webhook::{ChatTransport, WebhookTransport};
use crate::notify::NotificationTransport;
use crate::subscription::{ClientId, Subscription};
use crate::{MonitorError, Result};

/// Routes notifications to the transport of each sink kind.
#[derive(Default, Clone)]
pub struct Dispatcher {
    transports: HashMap<SinkKind, Arc<dyn NotificationTransport>>,
    global_sinks: Vec<NotificationSink>,
}

impl Dispatcher {
    /// Create a dispatcher without transports.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the standard transports from configuration.
    pub fn from_config(config: &NotifyConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.delivery_timeout_secs);
        Ok(Self::new()
            .with_transport(
                SinkKind::Mail,
                Arc::new(MailSpoolTransport::new(
                    &config.mail_spool_dir,
                    &config.mail_from,
                    &config.timezone,
                )),
            )
            .with_transport(SinkKind::Webhook, Arc::new(WebhookTransport::new(timeout)?))
            .with_transport(SinkKind::Chat, Arc::new(ChatTransport::new(timeout)?))
            .with_global_sinks(config.sinks.clone()))
    }

    /// Register the transport for a sink kind.
    pub fn with_transport(
        mut self,
        kind: SinkKind,
        transport: Arc<dyn NotificationTransport>,
    ) -> Self {
        self.transports.insert(kind, transport);
        self
    }

    /// Sinks notified for every client.
    pub fn with_global_sinks(mut self, sinks: Vec<NotificationSink>) -> Self {
        self.global_sinks = sinks;
        self
    }

    /// Subject line of a notification.
    pub fn subject(subscription: &Subscription, count: usize) -> String {
        let noun = if count == 1 { "item" } else { "items" };
        format!(
            "[RSS Monitor] {} new {} in {}",
            count,
            noun,
            subscription.display_name()
        )
    }

    /// Notify every sink about `new_items`.
    ///
    /// Global sinks come first, followed by the client's `sinks`; duplicates
    /// are attempted once. Each sink is attempted independently and a failure
    /// never stops the others. Nothing is sent when `new_items` is empty.
    pub async fn dispatch(
        &self,
        client_id: &ClientId,
        subscription: &Subscription,
        new_items: &[Item],
        sinks: &[NotificationSink],
    ) -> DispatchResult {
        if new_items.is_empty() {
            return DispatchResult::default();
        }

        let mut targets: Vec<&NotificationSink> = Vec::new();
        for sink in self.global_sinks.iter().chain(sinks) {
            if !targets.contains(&sink) {
                targets.push(sink);
            }
        }
        if targets.is_empty() {
            return DispatchResult::default();
        }

        let subject = Self::subject(subscription, new_items.len());
        let deliveries = targets.into_iter().map(|sink| {
            let subject = subject.as_str();
            async move {
                let result = match self.transports.get(&sink.kind) {
                    Some(transport) => transport.send(&sink.target, subject, new_items).await,
                    None => Err(MonitorError::Sink(format!(
                        "no transport for {} sinks",
                        sink.kind
                    ))),
                };
                if let Err(e) = &result {
                    warn!(
                        "Notification for client {} to {} failed: {}",
                        client_id, sink, e
                    );
                }
                SinkOutcome {
                    sink: sink.clone(),
                    result,
                }
            }
        });

        let result = DispatchResult {
            outcomes: join_all(deliveries).await,
        };
        info!(
            "Dispatched {} new items of {} for client {}: {}/{} sinks delivered",
            new_items.len(),
            subscription.feed_url,
            client_id,
            result.delivered(),
            result.outcomes.len()
        );
        result
    }
}
