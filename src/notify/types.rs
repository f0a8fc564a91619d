//! Notification sink types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{MonitorError, Result};

/// Kind of notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Mail address.
    Mail,
    /// Generic JSON webhook URL.
    Webhook,
    /// Chat incoming-webhook URL.
    Chat,
}

impl SinkKind {
    /// Get the kind as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Mail => "mail",
            SinkKind::Webhook => "webhook",
            SinkKind::Chat => "chat",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured notification target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationSink {
    pub kind: SinkKind,
    /// Address, webhook URL or chat hook URL depending on `kind`.
    pub target: String,
}

impl NotificationSink {
    /// Create a sink.
    pub fn new(kind: SinkKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
        }
    }

    /// Mail sink.
    pub fn mail(address: impl Into<String>) -> Self {
        Self::new(SinkKind::Mail, address)
    }

    /// Webhook sink.
    pub fn webhook(url: impl Into<String>) -> Self {
        Self::new(SinkKind::Webhook, url)
    }

    /// Chat sink.
    pub fn chat(url: impl Into<String>) -> Self {
        Self::new(SinkKind::Chat, url)
    }

    /// Check that the target fits the sink kind.
    pub fn validate(&self) -> Result<()> {
        let target = self.target.trim();
        if target.is_empty() {
            return Err(MonitorError::Validation(format!(
                "{} sink target is empty",
                self.kind
            )));
        }

        match self.kind {
            SinkKind::Mail => {
                let valid = !target
                    .contains(|c: char| c.is_whitespace() || c == '<' || c == '>')
                    && target
                        .split_once('@')
                        .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
                        .unwrap_or(false);
                if !valid {
                    return Err(MonitorError::Validation(format!(
                        "invalid mail address: {}",
                        target
                    )));
                }
            }
            SinkKind::Webhook | SinkKind::Chat => {
                let url = url::Url::parse(target).map_err(|e| {
                    MonitorError::Validation(format!("invalid {} URL: {}", self.kind, e))
                })?;
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(MonitorError::Validation(format!(
                        "unsupported {} URL scheme: {}",
                        self.kind,
                        url.scheme()
                    )));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for NotificationSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.target)
    }
}

/// Delivery outcome of a single sink.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkOutcome {
    pub sink: NotificationSink,
    pub result: Result<()>,
}

impl SinkOutcome {
    /// Whether the sink accepted the notification.
    pub fn is_delivered(&self) -> bool {
        self.result.is_ok()
    }
}

/// Aggregate result of one dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchResult {
    /// One outcome per attempted sink, in sink order.
    pub outcomes: Vec<SinkOutcome>,
}

impl DispatchResult {
    /// Whether nothing was attempted.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Number of sinks that accepted the notification.
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_delivered()).count()
    }

    /// Number of sinks that failed.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }

    /// Whether every attempted sink accepted the notification.
    pub fn all_delivered(&self) -> bool {
        self.failed() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_kind_serde() {
        let sink: NotificationSink =
            serde_json::from_str(r#"{"kind":"chat","target":"https://hooks.example.com/x"}"#)
                .unwrap();
        assert_eq!(sink.kind, SinkKind::Chat);
        assert_eq!(
            serde_json::to_string(&NotificationSink::mail("a@example.com")).unwrap(),
            r#"{"kind":"mail","target":"a@example.com"}"#
        );
    }

    #[test]
    fn test_validate_mail() {
        assert!(NotificationSink::mail("user@example.com").validate().is_ok());
        assert!(NotificationSink::mail("").validate().is_err());
        assert!(NotificationSink::mail("no-at-sign").validate().is_err());
        assert!(NotificationSink::mail("user@localhost").validate().is_err());
        assert!(NotificationSink::mail("a@example.com\r\nBcc: x@example.com")
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_hook_urls() {
        assert!(NotificationSink::webhook("https://example.com/hook")
            .validate()
            .is_ok());
        assert!(NotificationSink::chat("not a url").validate().is_err());
        assert!(NotificationSink::webhook("ftp://example.com/hook")
            .validate()
            .is_err());
    }

    #[test]
    fn test_dispatch_result_counts() {
        let result = DispatchResult {
            outcomes: vec![
                SinkOutcome {
                    sink: NotificationSink::mail("a@example.com"),
                    result: Ok(()),
                },
                SinkOutcome {
                    sink: NotificationSink::webhook("https://example.com/hook"),
                    result: Err(MonitorError::Sink("503".to_string())),
                },
            ],
        };
        assert_eq!(result.delivered(), 1);
        assert_eq!(result.failed(), 1);
        assert!(!result.all_delivered());
        assert!(DispatchResult::default().all_delivered());
    }
}
