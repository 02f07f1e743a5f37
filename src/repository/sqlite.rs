//! SQLite-backed site store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::{Result, SiteStore, StoreError};
use crate::models::{
    keywords_from_column, keywords_to_column, CheckRecord, FetchMethod, MonitoredSite, NewSite,
    NotificationOutcome, Recipient,
};

/// SQLite persistence gateway.
pub struct SqliteStore {
    db_path: PathBuf,
    min_interval: Duration,
}

impl SqliteStore {
    /// Open (creating if necessary) the database at `db_path`.
    pub fn new(db_path: &Path, min_interval: Duration) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_path_buf(),
            min_interval,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 30000;
        "#,
        )?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            -- Registered pages
            CREATE TABLE IF NOT EXISTS sites (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                name TEXT NOT NULL,
                owner TEXT NOT NULL DEFAULT '',
                check_interval_secs INTEGER NOT NULL,
                selector TEXT,
                keywords TEXT NOT NULL DEFAULT '',
                enabled INTEGER NOT NULL DEFAULT 1,
                last_checked TEXT,
                last_fingerprint TEXT,
                last_preview TEXT,
                created_at TEXT NOT NULL
            );

            -- Subscribers per site with per-channel opt-in
            CREATE TABLE IF NOT EXISTS recipients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                site_id INTEGER NOT NULL REFERENCES sites(id),
                email TEXT,
                line_user_id TEXT,
                email_enabled INTEGER NOT NULL DEFAULT 1,
                line_enabled INTEGER NOT NULL DEFAULT 0
            );

            -- Append-only check log, one row per completed attempt
            CREATE TABLE IF NOT EXISTS site_checks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                site_id INTEGER NOT NULL REFERENCES sites(id),
                checked_at TEXT NOT NULL,
                fingerprint TEXT,
                changed INTEGER NOT NULL DEFAULT 0,
                reason TEXT NOT NULL DEFAULT '',
                method TEXT,
                final_url TEXT,
                success INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                preview TEXT,
                status_code INTEGER,
                response_time_ms INTEGER,
                content_length INTEGER NOT NULL DEFAULT 0,
                selector_degraded INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_site_checks_site
                ON site_checks(site_id, checked_at);

            -- Delivery audit per dispatched change
            CREATE TABLE IF NOT EXISTS notification_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                site_id INTEGER NOT NULL REFERENCES sites(id),
                channel TEXT NOT NULL,
                delivered INTEGER NOT NULL,
                message_id TEXT,
                error TEXT,
                sent_at TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }
}

fn site_from_row(row: &Row<'_>) -> rusqlite::Result<MonitoredSite> {
    Ok(MonitoredSite {
        id: row.get(0)?,
        url: row.get(1)?,
        name: row.get(2)?,
        owner: row.get(3)?,
        check_interval_secs: row.get::<_, i64>(4)? as u64,
        selector: row.get(5)?,
        keywords: keywords_from_column(&row.get::<_, String>(6)?),
        enabled: row.get::<_, i64>(7)? != 0,
        last_checked: parse_ts_opt(row.get::<_, Option<String>>(8)?),
        last_fingerprint: row.get(9)?,
        last_preview: row.get(10)?,
        created_at: parse_ts(&row.get::<_, String>(11)?),
    })
}

fn check_from_row(row: &Row<'_>) -> rusqlite::Result<CheckRecord> {
    Ok(CheckRecord {
        id: row.get(0)?,
        site_id: row.get(1)?,
        checked_at: parse_ts(&row.get::<_, String>(2)?),
        fingerprint: row.get(3)?,
        changed: row.get::<_, i64>(4)? != 0,
        reason: row.get(5)?,
        method: row
            .get::<_, Option<String>>(6)?
            .as_deref()
            .and_then(FetchMethod::parse),
        final_url: row.get(7)?,
        success: row.get::<_, i64>(8)? != 0,
        error: row.get(9)?,
        preview: row.get(10)?,
        status_code: row.get::<_, Option<i64>>(11)?.map(|v| v as u16),
        response_time_ms: row.get::<_, Option<i64>>(12)?.map(|v| v as u64),
        content_length: row.get::<_, i64>(13)? as u64,
        selector_degraded: row.get::<_, i64>(14)? != 0,
    })
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

fn parse_ts_opt(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref().map(parse_ts)
}

const SITE_COLUMNS: &str = "id, url, name, owner, check_interval_secs, selector, keywords, \
     enabled, last_checked, last_fingerprint, last_preview, created_at";

const CHECK_COLUMNS: &str = "id, site_id, checked_at, fingerprint, changed, reason, method, \
     final_url, success, error, preview, status_code, response_time_ms, content_length, \
     selector_degraded";

#[async_trait]
impl SiteStore for SqliteStore {
    async fn add_site(&self, site: NewSite) -> Result<MonitoredSite> {
        let min = self.min_interval.as_secs();
        if site.check_interval_secs < min {
            return Err(StoreError::IntervalTooShort {
                got: site.check_interval_secs,
                min,
            });
        }

        let conn = self.connect()?;
        let created_at = Utc::now();
        conn.execute(
            r#"INSERT INTO sites (url, name, owner, check_interval_secs, selector, keywords, enabled, created_at)
               VALUES (?, ?, ?, ?, ?, ?, 1, ?)"#,
            params![
                site.url,
                site.name,
                site.owner,
                site.check_interval_secs as i64,
                site.selector,
                keywords_to_column(&site.keywords),
                created_at.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);

        self.site(id).await
    }

    async fn site(&self, id: i64) -> Result<MonitoredSite> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {SITE_COLUMNS} FROM sites WHERE id = ?"))?;
        let mut rows = stmt.query_map(params![id], site_from_row)?;
        match rows.next() {
            Some(row) => Ok(row?),
            None => Err(StoreError::SiteNotFound(id)),
        }
    }

    async fn list_sites(&self) -> Result<Vec<MonitoredSite>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {SITE_COLUMNS} FROM sites ORDER BY id"))?;
        let rows = stmt.query_map([], site_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn set_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        let conn = self.connect()?;
        let updated = conn.execute(
            "UPDATE sites SET enabled = ? WHERE id = ?",
            params![enabled as i64, id],
        )?;
        if updated == 0 {
            return Err(StoreError::SiteNotFound(id));
        }
        Ok(())
    }

    async fn sites_due(&self, now: DateTime<Utc>) -> Result<Vec<MonitoredSite>> {
        Ok(self
            .all_enabled()
            .await?
            .into_iter()
            .filter(|site| site.is_due(now))
            .collect())
    }

    async fn all_enabled(&self) -> Result<Vec<MonitoredSite>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SITE_COLUMNS} FROM sites WHERE enabled = 1 ORDER BY id"
        ))?;
        let rows = stmt.query_map([], site_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn recipients(&self, site_id: i64) -> Result<Vec<Recipient>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, site_id, email, line_user_id, email_enabled, line_enabled \
             FROM recipients WHERE site_id = ? ORDER BY id",
        )?;
        let rows = stmt.query_map(params![site_id], |row| {
            Ok(Recipient {
                id: row.get(0)?,
                site_id: row.get(1)?,
                email: row.get(2)?,
                line_user_id: row.get(3)?,
                email_enabled: row.get::<_, i64>(4)? != 0,
                line_enabled: row.get::<_, i64>(5)? != 0,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn add_recipient(&self, recipient: Recipient) -> Result<Recipient> {
        let conn = self.connect()?;
        conn.execute(
            r#"INSERT INTO recipients (site_id, email, line_user_id, email_enabled, line_enabled)
               VALUES (?, ?, ?, ?, ?)"#,
            params![
                recipient.site_id,
                recipient.email,
                recipient.line_user_id,
                recipient.email_enabled as i64,
                recipient.line_enabled as i64,
            ],
        )?;
        Ok(Recipient {
            id: conn.last_insert_rowid(),
            ..recipient
        })
    }

    async fn save_check_record(&self, record: &CheckRecord) -> Result<i64> {
        let conn = self.connect()?;
        conn.execute(
            r#"INSERT INTO site_checks
               (site_id, checked_at, fingerprint, changed, reason, method, final_url, success,
                error, preview, status_code, response_time_ms, content_length, selector_degraded)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                record.site_id,
                record.checked_at.to_rfc3339(),
                record.fingerprint,
                record.changed as i64,
                record.reason,
                record.method.map(|m| m.as_str()),
                record.final_url,
                record.success as i64,
                record.error,
                record.preview,
                record.status_code.map(|s| s as i64),
                record.response_time_ms.map(|t| t as i64),
                record.content_length as i64,
                record.selector_degraded as i64,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn update_site_after_check(
        &self,
        id: i64,
        fingerprint: &str,
        preview: &str,
        last_checked: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.connect()?;
        let updated = conn.execute(
            r#"UPDATE sites
               SET last_checked = ?, last_fingerprint = ?, last_preview = ?
               WHERE id = ?"#,
            params![last_checked.to_rfc3339(), fingerprint, preview, id],
        )?;
        if updated == 0 {
            return Err(StoreError::SiteNotFound(id));
        }
        Ok(())
    }

    async fn touch_last_checked(&self, id: i64, last_checked: DateTime<Utc>) -> Result<()> {
        let conn = self.connect()?;
        let updated = conn.execute(
            "UPDATE sites SET last_checked = ? WHERE id = ?",
            params![last_checked.to_rfc3339(), id],
        )?;
        if updated == 0 {
            return Err(StoreError::SiteNotFound(id));
        }
        Ok(())
    }

    async fn latest_check(&self, site_id: i64) -> Result<Option<CheckRecord>> {
        Ok(self.recent_checks(site_id, 1).await?.into_iter().next())
    }

    async fn recent_checks(&self, site_id: i64, limit: usize) -> Result<Vec<CheckRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHECK_COLUMNS} FROM site_checks \
             WHERE site_id = ? ORDER BY checked_at DESC, id DESC LIMIT ?"
        ))?;
        let rows = stmt.query_map(params![site_id, limit as i64], check_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn record_notification(
        &self,
        site_id: i64,
        outcome: &NotificationOutcome,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"INSERT INTO notification_log (site_id, channel, delivered, message_id, error, sent_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
            params![
                site_id,
                outcome.channel.as_str(),
                outcome.delivered as i64,
                outcome.message_id,
                outcome.error,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}
