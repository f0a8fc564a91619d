//! Mail transport writing RFC 5322 messages to a pickup directory.
//!
//! An MTA (or any other relay) picks up `*.eml` files from the spool
//! directory. Files are written under a temporary name and renamed once
//! complete, so a reader never sees a partial message.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::datetime::{format_in_timezone, rfc2822_in_timezone, DEFAULT_FORMAT};
use crate::feed::Item;
use crate::notify::{render_items, NotificationTransport};
use crate::{MonitorError, Result};

/// Writes one `.eml` file per notification.
pub struct MailSpoolTransport {
    dir: PathBuf,
    from: String,
    timezone: String,
}

impl MailSpoolTransport {
    /// Create a transport spooling into `dir`.
    pub fn new(dir: impl Into<PathBuf>, from: impl Into<String>, timezone: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            from: from.into(),
            timezone: timezone.into(),
        }
    }

    /// Render a complete message.
    fn render(&self, message_id: &str, recipient: &str, subject: &str, items: &[Item]) -> String {
        let now = Utc::now();
        let body = render_items(items, |item| {
            item.published_at
                .map(|dt| format_in_timezone(&dt, &self.timezone, DEFAULT_FORMAT))
        });

        let mut message = String::new();
        message.push_str(&format!("From: {}\r\n", self.from));
        message.push_str(&format!("To: {}\r\n", recipient));
        message.push_str(&format!("Subject: {}\r\n", encode_header(subject)));
        message.push_str(&format!(
            "Date: {}\r\n",
            rfc2822_in_timezone(&now, &self.timezone)
        ));
        message.push_str(&format!("Message-ID: <{}@rss-monitor>\r\n", message_id));
        message.push_str("MIME-Version: 1.0\r\n");
        message.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        message.push_str("Content-Transfer-Encoding: 8bit\r\n");
        message.push_str("\r\n");
        message.push_str(&body.replace('\n', "\r\n"));
        message
    }
}

#[async_trait]
impl NotificationTransport for MailSpoolTransport {
    async fn send(&self, recipient: &str, subject: &str, items: &[Item]) -> Result<()> {
        if recipient.contains(['\r', '\n']) || self.from.contains(['\r', '\n']) {
            return Err(MonitorError::Sink(
                "mail address contains a line break".to_string(),
            ));
        }

        let message_id = Uuid::new_v4().to_string();
        let message = self.render(&message_id, recipient, subject, items);

        let sink_err = |e: std::io::Error| MonitorError::Sink(format!("mail spool: {}", e));
        tokio::fs::create_dir_all(&self.dir).await.map_err(sink_err)?;
        let tmp_path = self.dir.join(format!("{}.eml.tmp", message_id));
        let path = self.dir.join(format!("{}.eml", message_id));
        tokio::fs::write(&tmp_path, message).await.map_err(sink_err)?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(sink_err)?;

        debug!("Spooled mail to {} at {}", recipient, path.display());
        Ok(())
    }
}

/// Encode a header value as an RFC 2047 Q-encoded word when it is not plain ASCII.
///
/// Line breaks are always dropped.
fn encode_header(value: &str) -> String {
    let value: String = value.chars().filter(|c| *c != '\r' && *c != '\n').collect();
    if value.is_ascii() {
        return value;
    }

    let mut encoded = String::from("=?UTF-8?Q?");
    for byte in value.bytes() {
        match byte {
            b' ' => encoded.push('_'),
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'!' | b'*' | b'+' | b'-' | b'/' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("={:02X}", byte)),
        }
    }
    encoded.push_str("?=");
    encoded
}
