//! Monitored site and recipient models.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of the stored text snapshot used for previews and
/// keyword comparison against the previous check.
pub(crate) const PREVIEW_LEN: usize = 500;

/// A web page registered for change monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredSite {
    /// Database row ID.
    pub id: i64,
    /// Page URL to monitor.
    pub url: String,
    /// Display name.
    pub name: String,
    /// Opaque owner reference.
    pub owner: String,
    /// Interval between checks, in seconds.
    pub check_interval_secs: u64,
    /// Optional CSS selector restricting monitoring to a sub-element.
    pub selector: Option<String>,
    /// Trigger keywords, matched case-insensitively against canonical text.
    pub keywords: Vec<String>,
    /// Disabled sites are kept for history but never scheduled.
    pub enabled: bool,
    /// When the last check attempt completed (success or failure).
    pub last_checked: Option<DateTime<Utc>>,
    /// SHA-256 of the canonical text at the last successful check.
    pub last_fingerprint: Option<String>,
    /// Bounded text snapshot from the last successful check.
    pub last_preview: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MonitoredSite {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// The timestamp at which this site becomes eligible for its next
    /// scheduled check. Never-checked sites are immediately due.
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        self.last_checked
            .map(|t| t + chrono::Duration::seconds(self.check_interval_secs as i64))
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.due_at() {
            Some(due) => now >= due,
            None => true,
        }
    }
}

/// Input for registering a new site.
#[derive(Debug, Clone)]
pub struct NewSite {
    pub url: String,
    pub name: String,
    pub owner: String,
    pub check_interval_secs: u64,
    pub selector: Option<String>,
    pub keywords: Vec<String>,
}

/// Someone subscribed to a site's change alerts, with per-channel opt-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: i64,
    pub site_id: i64,
    pub email: Option<String>,
    pub line_user_id: Option<String>,
    pub email_enabled: bool,
    pub line_enabled: bool,
}

/// Serialize a keyword list for storage as a single comma-separated column.
pub(crate) fn keywords_to_column(keywords: &[String]) -> String {
    keywords.join(",")
}

/// Parse the stored keyword column back into a trimmed, non-empty list.
pub(crate) fn keywords_from_column(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(last_checked: Option<DateTime<Utc>>, interval: u64) -> MonitoredSite {
        MonitoredSite {
            id: 1,
            url: "https://example.com".into(),
            name: "example".into(),
            owner: "tester".into(),
            check_interval_secs: interval,
            selector: None,
            keywords: Vec::new(),
            enabled: true,
            last_checked,
            last_fingerprint: None,
            last_preview: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn never_checked_site_is_due() {
        assert!(site(None, 3600).is_due(Utc::now()));
    }

    #[test]
    fn due_time_advances_by_interval() {
        let now = Utc::now();
        let checked = now - chrono::Duration::seconds(1800);
        assert!(!site(Some(checked), 3600).is_due(now));
        assert!(site(Some(checked), 900).is_due(now));
    }

    #[test]
    fn keyword_column_round_trip() {
        let keywords = vec!["sold out".to_string(), "restock".to_string()];
        let column = keywords_to_column(&keywords);
        assert_eq!(keywords_from_column(&column), keywords);
        assert!(keywords_from_column("").is_empty());
        assert_eq!(keywords_from_column(" a , ,b "), vec!["a", "b"]);
    }
}
