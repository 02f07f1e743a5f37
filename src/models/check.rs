//! Check records and change verdicts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which fetch strategy produced the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMethod {
    Http,
    Browser,
    Fallback,
}

impl FetchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Browser => "browser",
            Self::Fallback => "fallback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Self::Http),
            "browser" => Some(Self::Browser),
            "fallback" => Some(Self::Fallback),
            _ => None,
        }
    }
}

/// One completed check attempt, successful or not. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRecord {
    /// Database row ID (0 before insertion).
    pub id: i64,
    pub site_id: i64,
    pub checked_at: DateTime<Utc>,
    /// Fingerprint of the canonical text, when the fetch succeeded.
    pub fingerprint: Option<String>,
    pub changed: bool,
    /// Human-readable reason for the verdict (or the failure).
    pub reason: String,
    /// Fetch method that produced the content, when one succeeded.
    pub method: Option<FetchMethod>,
    /// URL after redirects, as reported by the winning method.
    pub final_url: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    /// Bounded canonical-text preview.
    pub preview: Option<String>,
    /// HTTP status observed on the winning method.
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub content_length: u64,
    /// Set when a configured selector matched nothing and monitoring
    /// degraded to full-page text.
    pub selector_degraded: bool,
}

impl CheckRecord {
    /// Record for a check whose fetch or normalization failed. Failed
    /// checks are never marked changed and carry no fingerprint.
    pub fn failure(site_id: i64, reason: &str, error: String) -> Self {
        Self {
            id: 0,
            site_id,
            checked_at: Utc::now(),
            fingerprint: None,
            changed: false,
            reason: reason.to_string(),
            method: None,
            final_url: None,
            success: false,
            error: Some(error),
            preview: None,
            status_code: None,
            response_time_ms: None,
            content_length: 0,
            selector_degraded: false,
        }
    }
}

/// Why a check produced (or did not produce) a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    /// No stored fingerprint existed; this check establishes the baseline.
    FirstCheck,
    /// The content hash differs from the stored fingerprint.
    ContentChanged,
    /// The hash differs and configured keywords appeared or disappeared.
    KeywordsChanged,
    /// Hash identical to the stored fingerprint.
    Unchanged,
}

impl ChangeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstCheck => "first check",
            Self::ContentChanged => "content changed",
            Self::KeywordsChanged => "keywords changed",
            Self::Unchanged => "no change",
        }
    }
}

/// Outcome of comparing a new canonical text against stored state.
#[derive(Debug, Clone)]
pub struct ChangeVerdict {
    pub changed: bool,
    pub reason: ChangeReason,
    /// Human-readable reason, naming keywords that appeared or disappeared.
    pub detail: String,
    /// New fingerprint, to be stored on success.
    pub fingerprint: String,
    /// Bounded preview of the new canonical text.
    pub new_preview: String,
    /// Preview stored at the previous successful check.
    pub old_preview: Option<String>,
    /// Configured keywords present in the new canonical text.
    pub matched_keywords: Vec<String>,
}

/// Notification delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Line,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Line => "line",
        }
    }
}

/// Per-channel delivery result for one dispatched change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationOutcome {
    pub channel: ChannelKind,
    pub delivered: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}
