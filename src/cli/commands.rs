//! Command handlers.

use std::sync::Arc;

use console::style;
use indicatif::ProgressBar;

use crate::config::{Settings, MIN_CHECK_INTERVAL};
use crate::fetch::FetchChain;
use crate::models::{MonitoredSite, NewSite, Recipient};
use crate::notify::{AdminEvent, Dispatcher};
use crate::repository::{SiteStore, SqliteStore};
use crate::scheduler::{CheckOutcome, Scheduler};

fn open_store(settings: &Settings) -> anyhow::Result<Arc<SqliteStore>> {
    Ok(Arc::new(SqliteStore::new(
        &settings.database,
        MIN_CHECK_INTERVAL,
    )?))
}

fn build_scheduler(settings: &Settings) -> anyhow::Result<(Arc<SqliteStore>, Scheduler)> {
    let store = open_store(settings)?;
    let chain = Arc::new(FetchChain::new(&settings.fetch));
    let dispatcher = Arc::new(Dispatcher::from_settings(&settings.notify)?);
    let scheduler = Scheduler::new(
        store.clone(),
        chain,
        dispatcher,
        &settings.scheduler,
    );
    Ok((store, scheduler))
}

pub fn init(settings: &Settings) -> anyhow::Result<()> {
    let _store = SqliteStore::new(&settings.database, MIN_CHECK_INTERVAL)?;
    println!(
        "{} database initialized at {}",
        style("✓").green(),
        settings.database.display()
    );
    Ok(())
}

pub async fn site_add(
    settings: &Settings,
    url: String,
    name: String,
    owner: String,
    interval: u64,
    selector: Option<String>,
    keywords: String,
) -> anyhow::Result<()> {
    let store = open_store(settings)?;

    let keywords: Vec<String> = keywords
        .split(',')
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();

    let site = store
        .add_site(NewSite {
            url,
            name,
            owner,
            check_interval_secs: interval,
            selector,
            keywords,
        })
        .await?;

    println!(
        "{} site {} registered: {} ({})",
        style("✓").green(),
        style(site.id).bold(),
        site.name,
        site.url
    );

    let dispatcher = Dispatcher::from_settings(&settings.notify)?;
    dispatcher
        .notify_admin(&AdminEvent::SiteAdded {
            name: site.name.clone(),
            url: site.url.clone(),
        })
        .await;

    Ok(())
}

pub async fn site_list(settings: &Settings) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let sites = store.list_sites().await?;

    if sites.is_empty() {
        println!("no sites registered");
        return Ok(());
    }

    for site in sites {
        print_site_line(&site);
    }
    Ok(())
}

fn print_site_line(site: &MonitoredSite) {
    let state = if site.enabled {
        style("enabled").green()
    } else {
        style("disabled").red()
    };
    let last = site
        .last_checked
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "never".to_string());
    println!(
        "{:>4}  {}  {}  every {}s  last checked {}  {}",
        style(site.id).bold(),
        state,
        site.name,
        site.check_interval_secs,
        last,
        style(&site.url).dim(),
    );
}

pub async fn site_set_enabled(
    settings: &Settings,
    site_id: i64,
    enabled: bool,
) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    store.set_enabled(site_id, enabled).await?;
    let site = store.site(site_id).await?;

    let verb = if enabled { "enabled" } else { "disabled" };
    println!("{} site {} {}", style("✓").green(), site.name, verb);

    let dispatcher = Dispatcher::from_settings(&settings.notify)?;
    let event = if enabled {
        AdminEvent::SiteEnabled {
            name: site.name.clone(),
        }
    } else {
        AdminEvent::SiteDisabled {
            name: site.name.clone(),
        }
    };
    dispatcher.notify_admin(&event).await;

    Ok(())
}

pub async fn site_subscribe(
    settings: &Settings,
    site_id: i64,
    email: Option<String>,
    line_user: Option<String>,
) -> anyhow::Result<()> {
    if email.is_none() && line_user.is_none() {
        anyhow::bail!("provide --email and/or --line-user");
    }

    let store = open_store(settings)?;
    // Fails early when the site does not exist.
    let site = store.site(site_id).await?;

    let recipient = store
        .add_recipient(Recipient {
            id: 0,
            site_id,
            email_enabled: email.is_some(),
            line_enabled: line_user.is_some(),
            email,
            line_user_id: line_user,
        })
        .await?;

    println!(
        "{} recipient {} subscribed to {}",
        style("✓").green(),
        recipient.id,
        site.name
    );
    Ok(())
}

pub async fn check(settings: &Settings, site_id: i64) -> anyhow::Result<()> {
    let (_store, scheduler) = build_scheduler(settings)?;

    match scheduler.trigger_check(site_id).await? {
        CheckOutcome::Completed(record) => {
            print_check_result(&record.reason, record.success, record.changed);
        }
        CheckOutcome::Skipped => {
            println!("{} check already in flight, skipped", style("-").yellow());
        }
    }
    Ok(())
}

fn print_check_result(reason: &str, success: bool, changed: bool) {
    if !success {
        println!("{} check failed: {}", style("✗").red(), reason);
    } else if changed {
        println!("{} change detected: {}", style("!").yellow().bold(), reason);
    } else {
        println!("{} no change: {}", style("✓").green(), reason);
    }
}

pub async fn check_all(settings: &Settings) -> anyhow::Result<()> {
    let (_store, scheduler) = build_scheduler(settings)?;

    let spinner = ProgressBar::new_spinner().with_message("checking sites...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));
    let results = scheduler.trigger_check_all().await?;
    spinner.finish_and_clear();

    let mut changed = 0usize;
    let mut failed = 0usize;
    for (site, outcome) in &results {
        match outcome {
            Ok(CheckOutcome::Completed(record)) => {
                if record.changed {
                    changed += 1;
                }
                if !record.success {
                    failed += 1;
                }
                print!("{:>4}  {}  ", style(site.id).bold(), site.name);
                print_check_result(&record.reason, record.success, record.changed);
            }
            Ok(CheckOutcome::Skipped) => {
                println!("{:>4}  {}  skipped (already in flight)", site.id, site.name);
            }
            Err(err) => {
                failed += 1;
                println!(
                    "{:>4}  {}  {} {}",
                    site.id,
                    site.name,
                    style("aborted:").red(),
                    err
                );
            }
        }
    }

    println!(
        "checked {} sites: {} changed, {} failed",
        results.len(),
        style(changed).yellow().bold(),
        style(failed).red(),
    );
    Ok(())
}

pub async fn run_scheduler(settings: &Settings) -> anyhow::Result<()> {
    let (_store, scheduler) = build_scheduler(settings)?;

    println!(
        "{} scheduler running (tick every {}s, ctrl-c to stop)",
        style("▶").green(),
        settings.scheduler.tick_secs
    );

    // The interval fires immediately, so startup includes a first sweep.
    tokio::select! {
        _ = scheduler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            println!("\n{} scheduler stopped", style("■").red());
        }
    }
    Ok(())
}

pub async fn status(settings: &Settings) -> anyhow::Result<()> {
    let store = open_store(settings)?;

    let sites = store.list_sites().await?;
    let enabled = sites.iter().filter(|s| s.enabled).count();
    let due = store.sites_due(chrono::Utc::now()).await?.len();

    println!("sites:   {} registered, {} enabled", sites.len(), enabled);
    println!("due now: {due}");

    for site in sites.iter().filter(|s| s.enabled) {
        if let Some(record) = store.latest_check(site.id).await? {
            print_site_line(site);
            println!(
                "      last check: {} ({})",
                record.reason,
                if record.success {
                    style("ok").green()
                } else {
                    style("failed").red()
                }
            );
        }
    }
    Ok(())
}

pub async fn history(settings: &Settings, site_id: i64, limit: usize) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let site = store.site(site_id).await?;
    let records = store.recent_checks(site_id, limit).await?;

    println!("history for {} ({})", style(&site.name).bold(), site.url);
    if records.is_empty() {
        println!("no checks recorded");
        return Ok(());
    }

    for record in records {
        let mark = if !record.success {
            style("✗").red()
        } else if record.changed {
            style("!").yellow()
        } else {
            style("·").dim()
        };
        let method = record
            .method
            .map(|m| m.as_str())
            .unwrap_or("-");
        let degraded = if record.selector_degraded {
            " [selector degraded]"
        } else {
            ""
        };
        println!(
            "{} {}  {:9}  {}{}",
            mark,
            record.checked_at.format("%Y-%m-%d %H:%M:%S"),
            method,
            record.reason,
            style(degraded).yellow(),
        );
    }
    Ok(())
}
