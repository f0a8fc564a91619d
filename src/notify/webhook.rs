//! HTTP transports: JSON webhooks and chat incoming webhooks.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::feed::Item;
use crate::notify::{render_items, NotificationTransport};
use crate::{MonitorError, Result};

/// Header carrying the delivery id of a webhook call.
pub const DELIVERY_ID_HEADER: &str = "X-RSS-Monitor-Delivery";

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| MonitorError::Config(format!("failed to create HTTP client: {}", e)))
}

async fn post_json<T: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    body: &T,
    delivery_id: Option<&str>,
) -> Result<()> {
    let mut request = client.post(url).json(body);
    if let Some(id) = delivery_id {
        request = request.header(DELIVERY_ID_HEADER, id);
    }
    let response = request
        .send()
        .await
        .map_err(|e| MonitorError::Sink(format!("POST {} failed: {}", url, e)))?;
    let status = response.status();
    if !status.is_success() {
        return Err(MonitorError::Sink(format!("POST {} returned {}", url, status)));
    }
    Ok(())
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    delivery_id: String,
    subject: &'a str,
    items: &'a [Item],
}

/// Posts a JSON document describing the new items.
pub struct WebhookTransport {
    client: Client,
}

impl WebhookTransport {
    /// Create a transport with its own HTTP client.
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self::with_client(build_client(timeout)?))
    }

    /// Create a transport on an existing HTTP client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NotificationTransport for WebhookTransport {
    async fn send(&self, recipient: &str, subject: &str, items: &[Item]) -> Result<()> {
        let payload = WebhookPayload {
            delivery_id: Uuid::new_v4().to_string(),
            subject,
            items,
        };
        debug!("Webhook delivery {} to {}", payload.delivery_id, recipient);
        post_json(&self.client, recipient, &payload, Some(&payload.delivery_id)).await
    }
}

#[derive(Serialize)]
struct ChatPayload {
    text: String,
}

/// Posts `{"text": ...}` to a chat incoming webhook.
pub struct ChatTransport {
    client: Client,
}

impl ChatTransport {
    /// Create a transport with its own HTTP client.
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self::with_client(build_client(timeout)?))
    }

    /// Create a transport on an existing HTTP client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn chat_text(subject: &str, items: &[Item]) -> String {
    format!("*{}*\n{}", subject, render_items(items, |_| None))
}

#[async_trait]
impl NotificationTransport for ChatTransport {
    async fn send(&self, recipient: &str, subject: &str, items: &[Item]) -> Result<()> {
        let payload = ChatPayload {
            text: chat_text(subject, items),
        };
        post_json(&self.client, recipient, &payload, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_payload_shape() {
        let items = vec![Item::new("id-1", "Title").with_link("https://example.com/1")];
        let payload = WebhookPayload {
            delivery_id: "d".to_string(),
            subject: "Subject",
            items: &items,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["delivery_id"], "d");
        assert_eq!(json["subject"], "Subject");
        assert_eq!(json["items"][0]["identity"], "id-1");
        assert_eq!(json["items"][0]["link"], "https://example.com/1");
    }

    #[test]
    fn test_chat_text() {
        let items = vec![Item::new("1", "Hello")];
        assert_eq!(chat_text("2 new", &items), "*2 new*\n- Hello\n");
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_sink_error() {
        let transport = WebhookTransport::new(Duration::from_millis(500)).unwrap();
        let result = transport
            .send("http://127.0.0.1:1/hook", "subject", &[])
            .await;
        assert!(matches!(result, Err(MonitorError::Sink(_))));
    }
}
