//! End-to-end pipeline tests against a local HTTP fixture.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sitewatch::config::{FetchSettings, SchedulerSettings};
use sitewatch::fetch::{FallbackFetcher, FetchChain, HttpFetcher};
use sitewatch::models::{ChannelKind, NewSite, Recipient};
use sitewatch::notify::{AlertMessage, Dispatcher, Notifier, NotifyError};
use sitewatch::repository::{SiteStore, SqliteStore};
use sitewatch::scheduler::{CheckOutcome, Scheduler};

/// Email-channel stand-in that records every delivered message.
struct CaptureChannel {
    sent: Arc<Mutex<Vec<(String, AlertMessage)>>>,
}

#[async_trait]
impl Notifier for CaptureChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(
        &self,
        recipient: &Recipient,
        message: &AlertMessage,
    ) -> Result<Option<String>, NotifyError> {
        let address = recipient.email.clone().ok_or(NotifyError::NoAddress)?;
        self.sent.lock().unwrap().push((address, message.clone()));
        Ok(Some("captured".into()))
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<SqliteStore>,
    scheduler: Scheduler,
    sent: Arc<Mutex<Vec<(String, AlertMessage)>>>,
}

fn fetch_settings() -> FetchSettings {
    FetchSettings {
        http_timeout_secs: 5,
        attempt_delay_ms: 0,
        min_content_len: 1,
        ..FetchSettings::default()
    }
}

/// Build a scheduler over a scratch database, HTTP-only fetch chain and a
/// capturing notification channel.
fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteStore::new(&dir.path().join("watch.db"), Duration::from_secs(60)).unwrap(),
    );

    let settings = fetch_settings();
    let chain = FetchChain::with_fetchers(
        vec![
            Box::new(HttpFetcher::new(&settings)),
            Box::new(FallbackFetcher::new(&settings)),
        ],
        &settings,
    );

    let sent = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = Dispatcher::with_channels(
        vec![Arc::new(CaptureChannel { sent: sent.clone() })],
        Duration::from_secs(5),
    );

    let scheduler = Scheduler::new(
        store.clone(),
        Arc::new(chain),
        Arc::new(dispatcher),
        &SchedulerSettings {
            tick_secs: 60,
            max_concurrent_checks: 4,
            site_delay_ms: 0,
        },
    );

    Harness {
        _dir: dir,
        store,
        scheduler,
        sent,
    }
}

async fn serve(server: &MockServer, page_path: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(page_path.to_string()))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

async fn register(harness: &Harness, url: String, keywords: Vec<String>) -> i64 {
    let site = harness
        .store
        .add_site(NewSite {
            url,
            name: "product page".into(),
            owner: "tester".into(),
            check_interval_secs: 3600,
            selector: None,
            keywords,
        })
        .await
        .unwrap();

    harness
        .store
        .add_recipient(Recipient {
            id: 0,
            site_id: site.id,
            email: Some("user@example.com".into()),
            line_user_id: None,
            email_enabled: true,
            line_enabled: false,
        })
        .await
        .unwrap();

    site.id
}

fn completed(outcome: CheckOutcome) -> sitewatch::models::CheckRecord {
    match outcome {
        CheckOutcome::Completed(record) => record,
        CheckOutcome::Skipped => panic!("check unexpectedly skipped"),
    }
}

const IN_STOCK: &str = "<html><body><h1>Product A</h1><p>Product A - in stock, ships within two days.</p></body></html>";
const DISCONTINUED: &str = "<html><body><h1>Product A</h1><p>Product A - discontinued, no longer available.</p></body></html>";

#[tokio::test]
async fn first_check_establishes_baseline_without_notifying() {
    let server = MockServer::start().await;
    serve(&server, "/page", IN_STOCK).await;

    let harness = harness();
    let site_id = register(&harness, format!("{}/page", server.uri()), vec![]).await;

    let record = completed(harness.scheduler.trigger_check(site_id).await.unwrap());
    assert!(record.success);
    assert!(!record.changed);
    assert_eq!(record.reason, "first check, baseline stored");

    let site = harness.store.site(site_id).await.unwrap();
    assert!(site.last_fingerprint.is_some());
    assert!(harness.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn keyword_change_notifies_with_reason() {
    let server = MockServer::start().await;
    serve(&server, "/page", IN_STOCK).await;

    let harness = harness();
    let site_id = register(
        &harness,
        format!("{}/page", server.uri()),
        vec!["discontinued".into()],
    )
    .await;

    completed(harness.scheduler.trigger_check(site_id).await.unwrap());

    // The page flips to the discontinued notice.
    server.reset().await;
    serve(&server, "/page", DISCONTINUED).await;

    let record = completed(harness.scheduler.trigger_check(site_id).await.unwrap());
    assert!(record.success);
    assert!(record.changed);
    assert!(record.reason.contains("discontinued"));

    let sent = harness.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let (address, message) = &sent[0];
    assert_eq!(address, "user@example.com");
    assert!(message.subject.contains("product page"));
    assert!(message.body.contains("discontinued"));
}

#[tokio::test]
async fn unchanged_page_stays_silent_and_keeps_fingerprint() {
    let server = MockServer::start().await;
    serve(&server, "/page", IN_STOCK).await;

    let harness = harness();
    let site_id = register(&harness, format!("{}/page", server.uri()), vec![]).await;

    completed(harness.scheduler.trigger_check(site_id).await.unwrap());
    let baseline = harness.store.site(site_id).await.unwrap().last_fingerprint;

    let record = completed(harness.scheduler.trigger_check(site_id).await.unwrap());
    assert!(!record.changed);

    let site = harness.store.site(site_id).await.unwrap();
    assert_eq!(site.last_fingerprint, baseline);
    assert!(harness.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn exhausted_fetch_chain_records_failure_without_notification() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let harness = harness();
    let site_id = register(&harness, format!("{}/gone", server.uri()), vec![]).await;

    let record = completed(harness.scheduler.trigger_check(site_id).await.unwrap());
    assert!(!record.success);
    assert!(!record.changed);
    assert!(record.error.as_deref().unwrap().contains("404"));

    let site = harness.store.site(site_id).await.unwrap();
    assert!(site.last_fingerprint.is_none());
    assert!(site.last_checked.is_some());
    assert!(harness.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn one_failing_site_never_blocks_another() {
    let server = MockServer::start().await;
    serve(&server, "/good", IN_STOCK).await;
    Mock::given(method("GET"))
        .and(path("/bad"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let harness = harness();
    let good = register(&harness, format!("{}/good", server.uri()), vec![]).await;
    let bad = register(&harness, format!("{}/bad", server.uri()), vec![]).await;

    // Baseline for the good site so the next sweep can detect its change.
    completed(harness.scheduler.trigger_check(good).await.unwrap());
    server.reset().await;
    serve(&server, "/good", DISCONTINUED).await;
    Mock::given(method("GET"))
        .and(path("/bad"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let results = harness.scheduler.trigger_check_all().await.unwrap();
    assert_eq!(results.len(), 2);

    let good_site = harness.store.site(good).await.unwrap();
    assert!(good_site.last_fingerprint.is_some());
    let good_record = harness.store.latest_check(good).await.unwrap().unwrap();
    assert!(good_record.changed);

    let bad_record = harness.store.latest_check(bad).await.unwrap().unwrap();
    assert!(!bad_record.success);
    assert!(harness.store.site(bad).await.unwrap().last_fingerprint.is_none());

    // Only the changed site notified.
    assert_eq!(harness.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn selector_degradation_is_flagged_on_the_record() {
    let server = MockServer::start().await;
    serve(&server, "/page", IN_STOCK).await;

    let harness = harness();
    let site = harness
        .store
        .add_site(NewSite {
            url: format!("{}/page", server.uri()),
            name: "product page".into(),
            owner: "tester".into(),
            check_interval_secs: 3600,
            selector: Some("#does-not-exist".into()),
            keywords: vec![],
        })
        .await
        .unwrap();

    let record = completed(harness.scheduler.trigger_check(site.id).await.unwrap());
    assert!(record.success);
    assert!(record.selector_degraded);
}
