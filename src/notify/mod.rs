//! Notification dispatch with per-channel failure isolation.
//!
//! Channels are independent senders behind the [`Notifier`] trait. A
//! channel failure is captured in the outcome set and never aborts
//! sibling channels, the check that triggered it, or record persistence.

mod email;
mod line;

pub use email::EmailChannel;
pub use line::LineChannel;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::NotifySettings;
use crate::models::{ChangeVerdict, ChannelKind, MonitoredSite, NotificationOutcome, Recipient};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("send timed out")]
    Timeout,

    #[error("channel misconfigured: {0}")]
    Config(String),

    #[error("smtp error: {0}")]
    Smtp(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("recipient has no address for this channel")]
    NoAddress,
}

/// A composed notification ready for delivery.
#[derive(Debug, Clone)]
pub struct AlertMessage {
    pub subject: String,
    pub body: String,
    pub html_body: String,
}

/// An independent notification delivery mechanism.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Deliver one message, returning a provider message id when available.
    async fn send(
        &self,
        recipient: &Recipient,
        message: &AlertMessage,
    ) -> Result<Option<String>, NotifyError>;
}

/// Structural events reported on the lower-frequency admin digest path.
#[derive(Debug, Clone)]
pub enum AdminEvent {
    SiteAdded { name: String, url: String },
    SiteDisabled { name: String },
    SiteEnabled { name: String },
}

impl std::fmt::Display for AdminEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SiteAdded { name, url } => write!(f, "site added: {name} ({url})"),
            Self::SiteDisabled { name } => write!(f, "site disabled: {name}"),
            Self::SiteEnabled { name } => write!(f, "site re-enabled: {name}"),
        }
    }
}

/// Fans a detected change out to every configured channel.
pub struct Dispatcher {
    channels: Vec<Arc<dyn Notifier>>,
    send_timeout: Duration,
    admin_email: Option<String>,
}

impl Dispatcher {
    /// Build the dispatcher from validated settings. Unconfigured channels
    /// are simply absent and every send to them is skipped.
    pub fn from_settings(settings: &NotifySettings) -> Result<Self, NotifyError> {
        let mut channels: Vec<Arc<dyn Notifier>> = Vec::new();
        if let Some(email) = &settings.email {
            channels.push(Arc::new(EmailChannel::new(email)?));
        }
        if let Some(line) = &settings.line {
            channels.push(Arc::new(LineChannel::new(line)));
        }
        Ok(Self {
            channels,
            send_timeout: settings.send_timeout(),
            admin_email: settings.admin_email.clone(),
        })
    }

    /// Build a dispatcher over caller-supplied channels (used by tests).
    pub fn with_channels(channels: Vec<Arc<dyn Notifier>>, send_timeout: Duration) -> Self {
        Self {
            channels,
            send_timeout,
            admin_email: None,
        }
    }

    pub fn has_channels(&self) -> bool {
        !self.channels.is_empty()
    }

    /// Deliver a change alert to every recipient over every enabled
    /// channel. Sends run concurrently; each is bounded by its own
    /// timeout and failures are isolated per channel.
    pub async fn dispatch(
        &self,
        site: &MonitoredSite,
        verdict: &ChangeVerdict,
        recipients: &[Recipient],
    ) -> Vec<NotificationOutcome> {
        let message = compose_alert(site, verdict);

        let mut sends = Vec::new();
        for channel in &self.channels {
            for recipient in recipients {
                if !channel_enabled(channel.kind(), recipient) {
                    continue;
                }
                let channel = channel.clone();
                let message = message.clone();
                let recipient = recipient.clone();
                let timeout = self.send_timeout;
                sends.push(async move {
                    let kind = channel.kind();
                    let result =
                        match tokio::time::timeout(timeout, channel.send(&recipient, &message))
                            .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(NotifyError::Timeout),
                        };
                    match result {
                        Ok(message_id) => NotificationOutcome {
                            channel: kind,
                            delivered: true,
                            message_id,
                            error: None,
                        },
                        Err(err) => NotificationOutcome {
                            channel: kind,
                            delivered: false,
                            message_id: None,
                            error: Some(err.to_string()),
                        },
                    }
                });
            }
        }

        let outcomes = join_all(sends).await;
        for outcome in &outcomes {
            if outcome.delivered {
                info!(
                    site = %site.name,
                    channel = outcome.channel.as_str(),
                    "notification delivered"
                );
            } else {
                warn!(
                    site = %site.name,
                    channel = outcome.channel.as_str(),
                    error = outcome.error.as_deref().unwrap_or(""),
                    "notification failed"
                );
            }
        }
        outcomes
    }

    /// Send a digest-style notification about a structural event to the
    /// configured admin address. Distinct from per-change alerts; does
    /// nothing unless an admin address and the email channel exist.
    pub async fn notify_admin(&self, event: &AdminEvent) {
        let Some(address) = self.admin_email.clone() else {
            return;
        };
        let Some(email) = self
            .channels
            .iter()
            .find(|c| c.kind() == ChannelKind::Email)
        else {
            return;
        };

        let message = AlertMessage {
            subject: format!("[sitewatch] {event}"),
            body: format!(
                "Monitoring configuration changed.\n\n{event}\nAt: {}\n",
                Utc::now().to_rfc3339()
            ),
            html_body: format!("<p>Monitoring configuration changed.</p><p>{event}</p>"),
        };
        let admin = Recipient {
            id: 0,
            site_id: 0,
            email: Some(address),
            line_user_id: None,
            email_enabled: true,
            line_enabled: false,
        };

        match tokio::time::timeout(self.send_timeout, email.send(&admin, &message)).await {
            Ok(Ok(_)) => info!(event = %event, "admin digest sent"),
            Ok(Err(err)) => warn!(event = %event, error = %err, "admin digest failed"),
            Err(_) => warn!(event = %event, "admin digest timed out"),
        }
    }
}

fn channel_enabled(kind: ChannelKind, recipient: &Recipient) -> bool {
    match kind {
        ChannelKind::Email => recipient.email_enabled && recipient.email.is_some(),
        ChannelKind::Line => recipient.line_enabled && recipient.line_user_id.is_some(),
    }
}

/// Compose the per-change alert sent to subscribers.
fn compose_alert(site: &MonitoredSite, verdict: &ChangeVerdict) -> AlertMessage {
    let checked_at = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    let preview = truncate_chars(&verdict.new_preview, 300);

    let body = format!(
        "Website update detected for \"{name}\"\n\
         \n\
         URL: {url}\n\
         Change: {detail}\n\
         Checked at: {checked_at}\n\
         \n\
         Content preview:\n\
         {preview}\n\
         \n\
         This notification was sent automatically by sitewatch.\n",
        name = site.name,
        url = site.url,
        detail = verdict.detail,
    );

    let html_body = format!(
        "<div style=\"font-family: sans-serif; max-width: 560px\">\
           <h2>Website update detected</h2>\
           <p><strong>Site:</strong> {name}<br>\
              <strong>URL:</strong> <a href=\"{url}\">{url}</a><br>\
              <strong>Change:</strong> {detail}<br>\
              <strong>Checked at:</strong> {checked_at}</p>\
           <blockquote>{preview}</blockquote>\
         </div>",
        name = html_escape(&site.name),
        url = html_escape(&site.url),
        detail = html_escape(&verdict.detail),
        preview = html_escape(&preview),
    );

    AlertMessage {
        subject: format!("Website update detected - {}", site.name),
        body,
        html_body,
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Escape HTML special characters for safe rendering.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChangeReason;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubChannel {
        kind: ChannelKind,
        fail: bool,
        sent: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for StubChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn send(
            &self,
            _recipient: &Recipient,
            _message: &AlertMessage,
        ) -> Result<Option<String>, NotifyError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotifyError::Api("boom".into()))
            } else {
                Ok(Some("msg-1".into()))
            }
        }
    }

    fn site() -> MonitoredSite {
        MonitoredSite {
            id: 1,
            url: "https://example.com".into(),
            name: "example".into(),
            owner: "tester".into(),
            check_interval_secs: 3600,
            selector: None,
            keywords: Vec::new(),
            enabled: true,
            last_checked: None,
            last_fingerprint: None,
            last_preview: None,
            created_at: Utc::now(),
        }
    }

    fn verdict() -> ChangeVerdict {
        ChangeVerdict {
            changed: true,
            reason: ChangeReason::ContentChanged,
            detail: "content hash differs".into(),
            fingerprint: "abc".into(),
            new_preview: "new text".into(),
            old_preview: None,
            matched_keywords: Vec::new(),
        }
    }

    fn recipient() -> Recipient {
        Recipient {
            id: 1,
            site_id: 1,
            email: Some("user@example.com".into()),
            line_user_id: Some("U123".into()),
            email_enabled: true,
            line_enabled: true,
        }
    }

    #[tokio::test]
    async fn one_failing_channel_never_aborts_the_other() {
        let email = Arc::new(StubChannel {
            kind: ChannelKind::Email,
            fail: true,
            sent: AtomicUsize::new(0),
        });
        let line = Arc::new(StubChannel {
            kind: ChannelKind::Line,
            fail: false,
            sent: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::with_channels(
            vec![email.clone(), line.clone()],
            Duration::from_secs(5),
        );

        let outcomes = dispatcher
            .dispatch(&site(), &verdict(), &[recipient()])
            .await;

        assert_eq!(outcomes.len(), 2);
        let email_outcome = outcomes.iter().find(|o| o.channel == ChannelKind::Email).unwrap();
        let line_outcome = outcomes.iter().find(|o| o.channel == ChannelKind::Line).unwrap();
        assert!(!email_outcome.delivered);
        assert!(email_outcome.error.as_deref().unwrap().contains("boom"));
        assert!(line_outcome.delivered);
        assert_eq!(line_outcome.message_id.as_deref(), Some("msg-1"));
        assert_eq!(line.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recipient_opt_out_skips_the_channel() {
        let line = Arc::new(StubChannel {
            kind: ChannelKind::Line,
            fail: false,
            sent: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::with_channels(vec![line.clone()], Duration::from_secs(5));

        let mut recipient = recipient();
        recipient.line_enabled = false;

        let outcomes = dispatcher.dispatch(&site(), &verdict(), &[recipient]).await;
        assert!(outcomes.is_empty());
        assert_eq!(line.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_configured_channels_means_no_outcomes() {
        let dispatcher = Dispatcher::with_channels(Vec::new(), Duration::from_secs(5));
        let outcomes = dispatcher.dispatch(&site(), &verdict(), &[recipient()]).await;
        assert!(outcomes.is_empty());
        assert!(!dispatcher.has_channels());
    }

    #[test]
    fn alert_contains_site_and_reason() {
        let message = compose_alert(&site(), &verdict());
        assert!(message.subject.contains("example"));
        assert!(message.body.contains("https://example.com"));
        assert!(message.body.contains("content hash differs"));
        assert!(message.html_body.contains("https://example.com"));
    }
}
