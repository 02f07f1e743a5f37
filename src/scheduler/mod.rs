//! Check scheduling and the per-site check pipeline.
//!
//! A single periodic driver ticks at a global cadence. Each tick fans due
//! sites out into concurrent check workflows bounded by a semaphore; a
//! mutex-guarded map of running site ids serializes checks per site. One
//! site's failure never touches another site's scheduling or state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, warn};

use crate::config::SchedulerSettings;
use crate::detect;
use crate::fetch::FetchChain;
use crate::models::{CheckRecord, MonitoredSite};
use crate::normalize::{self, MIN_TEXT_LEN};
use crate::notify::Dispatcher;
use crate::repository::{SiteStore, StoreError};

/// Pipeline stage of an in-flight check, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckPhase {
    Fetching,
    Evaluating,
    Notifying,
}

impl CheckPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetching => "fetching",
            Self::Evaluating => "evaluating",
            Self::Notifying => "notifying",
        }
    }
}

/// Result of asking for a check on one site.
#[derive(Debug)]
pub enum CheckOutcome {
    /// The check ran to completion; the record has been persisted.
    Completed(CheckRecord),
    /// A check for this site was already in flight; nothing ran and no
    /// record was written.
    Skipped,
}

/// Errors that abort a single site's check.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("persistence failure: {0}")]
    Store(#[from] StoreError),
}

/// Drives due-time scheduling and runs the check pipeline.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn SiteStore>,
    chain: Arc<FetchChain>,
    dispatcher: Arc<Dispatcher>,
    running: Arc<Mutex<HashMap<i64, CheckPhase>>>,
    limiter: Arc<Semaphore>,
    tick: Duration,
    site_delay: Duration,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn SiteStore>,
        chain: Arc<FetchChain>,
        dispatcher: Arc<Dispatcher>,
        settings: &SchedulerSettings,
    ) -> Self {
        Self {
            store,
            chain,
            dispatcher,
            running: Arc::new(Mutex::new(HashMap::new())),
            limiter: Arc::new(Semaphore::new(settings.max_concurrent_checks)),
            tick: settings.tick(),
            site_delay: settings.site_delay(),
        }
    }

    /// Sites with a check currently in flight, with their pipeline phase.
    pub async fn running_checks(&self) -> Vec<(i64, CheckPhase)> {
        self.running
            .lock()
            .await
            .iter()
            .map(|(id, phase)| (*id, *phase))
            .collect()
    }

    /// Run the periodic driver until the task is cancelled.
    ///
    /// Ticks fire at the configured cadence regardless of in-flight work;
    /// a site whose previous check is still running is skipped by the
    /// exclusion map, not queued.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(tick_secs = self.tick.as_secs(), "scheduler started");
        loop {
            interval.tick().await;
            self.tick_once().await;
        }
    }

    /// Select due sites and dispatch their checks. Spawned checks outlive
    /// the tick; completion is not awaited here.
    pub async fn tick_once(&self) {
        let due = match self.store.sites_due(Utc::now()).await {
            Ok(sites) => sites,
            Err(err) => {
                error!(error = %err, "failed to query due sites");
                return;
            }
        };

        if due.is_empty() {
            return;
        }
        info!(count = due.len(), "dispatching due site checks");

        for site in due {
            let this = self.clone();
            tokio::spawn(async move {
                let Ok(_permit) = this.limiter.acquire().await else {
                    return;
                };
                if let Err(err) = this.check_site(&site).await {
                    error!(site_id = site.id, site = %site.name, error = %err, "check aborted");
                }
            });
            // Stagger dispatches; a courtesy toward target servers.
            if !self.site_delay.is_zero() {
                tokio::time::sleep(self.site_delay).await;
            }
        }
    }

    /// Manually check one site, bypassing the due-time gate. The per-site
    /// in-flight exclusion still applies.
    pub async fn trigger_check(&self, site_id: i64) -> Result<CheckOutcome, CheckError> {
        let site = self.store.site(site_id).await?;
        let _permit = self.limiter.acquire().await.ok();
        self.check_site(&site).await
    }

    /// Manually sweep every enabled site, bounded by the concurrency
    /// limit. Returns one outcome per site.
    pub async fn trigger_check_all(
        &self,
    ) -> Result<Vec<(MonitoredSite, Result<CheckOutcome, CheckError>)>, CheckError> {
        let sites = self.store.all_enabled().await?;

        let checks = sites.into_iter().map(|site| {
            let this = self.clone();
            async move {
                let _permit = this.limiter.acquire().await.ok();
                let outcome = this.check_site(&site).await;
                (site, outcome)
            }
        });

        Ok(join_all(checks).await)
    }

    /// Run the pipeline for one site under the in-flight exclusion.
    pub async fn check_site(&self, site: &MonitoredSite) -> Result<CheckOutcome, CheckError> {
        {
            let mut running = self.running.lock().await;
            if running.contains_key(&site.id) {
                info!(site_id = site.id, site = %site.name, "check already in flight, skipping");
                return Ok(CheckOutcome::Skipped);
            }
            running.insert(site.id, CheckPhase::Fetching);
        }

        let result = self.perform_check(site).await;

        self.running.lock().await.remove(&site.id);

        result.map(CheckOutcome::Completed)
    }

    async fn set_phase(&self, site_id: i64, phase: CheckPhase) {
        self.running.lock().await.insert(site_id, phase);
    }

    /// Fetch, normalize, evaluate, persist and (on change) notify.
    async fn perform_check(&self, site: &MonitoredSite) -> Result<CheckRecord, CheckError> {
        info!(site_id = site.id, site = %site.name, url = %site.url, "checking site");

        let page = match self.chain.fetch(&site.url).await {
            Ok(page) => page,
            Err(err) => {
                warn!(site_id = site.id, site = %site.name, error = %err, "fetch failed");
                let record = CheckRecord::failure(
                    site.id,
                    "fetch failed (treated as no change)",
                    err.to_string(),
                );
                return self.persist_failure(site, record).await;
            }
        };

        self.set_phase(site.id, CheckPhase::Evaluating).await;

        let content = match normalize::normalize(&page.html, site.selector.as_deref(), MIN_TEXT_LEN)
        {
            Ok(content) => content,
            Err(err) => {
                warn!(site_id = site.id, site = %site.name, error = %err, "invalid content");
                let mut record = CheckRecord::failure(
                    site.id,
                    "invalid content (treated as no change)",
                    err.to_string(),
                );
                record.method = Some(page.method);
                record.final_url = Some(page.final_url.clone());
                record.status_code = Some(page.status);
                record.response_time_ms = Some(page.response_time_ms);
                return self.persist_failure(site, record).await;
            }
        };

        let text = content.monitored_text();
        let verdict = detect::evaluate(
            text,
            site.last_fingerprint.as_deref(),
            site.last_preview.as_deref(),
            &site.keywords,
        );

        let checked_at = Utc::now();
        let mut record = CheckRecord {
            id: 0,
            site_id: site.id,
            checked_at,
            fingerprint: Some(verdict.fingerprint.clone()),
            changed: verdict.changed,
            reason: verdict.detail.clone(),
            method: Some(page.method),
            final_url: Some(page.final_url.clone()),
            success: true,
            error: None,
            preview: Some(verdict.new_preview.clone()),
            status_code: Some(page.status),
            response_time_ms: Some(page.response_time_ms),
            content_length: text.chars().count() as u64,
            selector_degraded: content.selector_degraded,
        };

        // The record is persisted before the site row: a fingerprint must
        // never get ahead of the history that justifies it.
        record.id = self.store.save_check_record(&record).await?;
        self.store
            .update_site_after_check(site.id, &verdict.fingerprint, &verdict.new_preview, checked_at)
            .await?;

        if verdict.changed {
            self.set_phase(site.id, CheckPhase::Notifying).await;
            info!(
                site_id = site.id,
                site = %site.name,
                reason = %verdict.detail,
                "change detected"
            );

            match self.store.recipients(site.id).await {
                Ok(recipients) => {
                    let outcomes = self.dispatcher.dispatch(site, &verdict, &recipients).await;
                    for outcome in &outcomes {
                        if let Err(err) = self.store.record_notification(site.id, outcome).await {
                            warn!(site_id = site.id, error = %err, "failed to log notification");
                        }
                    }
                }
                Err(err) => {
                    warn!(site_id = site.id, error = %err, "failed to load recipients, skipping notification");
                }
            }
        }

        Ok(record)
    }

    /// Persist a failed attempt: the record is appended and last-checked
    /// advances (so the next due-time moves on), but the stored
    /// fingerprint stays untouched.
    async fn persist_failure(
        &self,
        site: &MonitoredSite,
        record: CheckRecord,
    ) -> Result<CheckRecord, CheckError> {
        let mut record = record;
        record.id = self.store.save_check_record(&record).await?;
        self.store.touch_last_checked(site.id, record.checked_at).await?;
        Ok(record)
    }
}
