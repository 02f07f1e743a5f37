//! Persistence gateway for sites, check history and notification logs.
//!
//! The scheduler and CLI only see the [`SiteStore`] trait; tests substitute
//! their own stores. Gateway failures are fatal to the single check that
//! hit them, never to the scheduler.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{CheckRecord, MonitoredSite, NewSite, NotificationOutcome, Recipient};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("site {0} not found")]
    SiteNotFound(i64),

    #[error("check interval {got}s is below the minimum {min}s")]
    IntervalTooShort { got: u64, min: u64 },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Contract between the check pipeline and storage.
#[async_trait]
pub trait SiteStore: Send + Sync {
    /// Register a site. Rejects intervals below the configured minimum.
    async fn add_site(&self, site: NewSite) -> Result<MonitoredSite>;

    async fn site(&self, id: i64) -> Result<MonitoredSite>;

    async fn list_sites(&self) -> Result<Vec<MonitoredSite>>;

    /// Soft-disable (or re-enable) a site; history is preserved.
    async fn set_enabled(&self, id: i64, enabled: bool) -> Result<()>;

    /// Enabled sites whose due-time has passed (or that were never
    /// checked).
    async fn sites_due(&self, now: DateTime<Utc>) -> Result<Vec<MonitoredSite>>;

    async fn all_enabled(&self) -> Result<Vec<MonitoredSite>>;

    async fn recipients(&self, site_id: i64) -> Result<Vec<Recipient>>;

    async fn add_recipient(&self, recipient: Recipient) -> Result<Recipient>;

    /// Append one completed check attempt. Returns the record id.
    async fn save_check_record(&self, record: &CheckRecord) -> Result<i64>;

    /// Store the new fingerprint and preview after a successful, persisted
    /// check.
    async fn update_site_after_check(
        &self,
        id: i64,
        fingerprint: &str,
        preview: &str,
        last_checked: DateTime<Utc>,
    ) -> Result<()>;

    /// Advance last-checked without touching the fingerprint (failure
    /// path; the next due-time still moves forward).
    async fn touch_last_checked(&self, id: i64, last_checked: DateTime<Utc>) -> Result<()>;

    async fn latest_check(&self, site_id: i64) -> Result<Option<CheckRecord>>;

    async fn recent_checks(&self, site_id: i64, limit: usize) -> Result<Vec<CheckRecord>>;

    async fn record_notification(
        &self,
        site_id: i64,
        outcome: &NotificationOutcome,
    ) -> Result<()>;
}
