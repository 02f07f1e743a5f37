//! Headless-browser fetch method for JavaScript-heavy sites.
//!
//! Uses chromiumoxide (CDP) against a locally installed Chrome/Chromium.
//! The browser process is launched lazily and reused across checks; pages
//! are scoped to a single fetch and closed on every exit path.

#[cfg(feature = "browser")]
use std::sync::Arc;
#[cfg(feature = "browser")]
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{FetchError, FetchedPage, PageFetcher};
use crate::config::FetchSettings;
use crate::models::FetchMethod;

#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig, Page};
#[cfg(feature = "browser")]
use futures::StreamExt;
#[cfg(feature = "browser")]
use tokio::sync::Mutex;
#[cfg(feature = "browser")]
use tracing::{debug, info, warn};

/// Headless render fetcher.
#[cfg(feature = "browser")]
pub struct BrowserFetcher {
    timeout: Duration,
    settle: Duration,
    browser: Mutex<Option<Arc<Mutex<Browser>>>>,
}

#[cfg(feature = "browser")]
impl BrowserFetcher {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    pub fn new(settings: &FetchSettings) -> Self {
        Self {
            timeout: settings.browser_timeout(),
            settle: settings.browser_settle(),
            browser: Mutex::new(None),
        }
    }

    /// Find a Chrome executable on this machine.
    fn find_chrome() -> Result<std::path::PathBuf, FetchError> {
        for path in Self::CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                return Ok(p.to_path_buf());
            }
        }

        for cmd in &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        return Ok(std::path::PathBuf::from(path));
                    }
                }
            }
        }

        Err(FetchError::Browser(
            "Chrome/Chromium not found on this machine".to_string(),
        ))
    }

    /// Launch the browser if not already running, returning a shared handle.
    async fn ensure_browser(&self) -> Result<Arc<Mutex<Browser>>, FetchError> {
        let mut slot = self.browser.lock().await;
        if let Some(browser) = slot.as_ref() {
            return Ok(browser.clone());
        }

        let chrome_path = Self::find_chrome()?;
        info!(path = %chrome_path.display(), "launching headless browser");

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(1920, 1080)
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .build()
            .map_err(FetchError::Browser)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::Browser(e.to_string()))?;

        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let browser = Arc::new(Mutex::new(browser));
        *slot = Some(browser.clone());
        Ok(browser)
    }

    /// Navigate, wait for the document plus the settle delay, and pull the
    /// rendered DOM.
    async fn render(&self, page: &Page, url: &str) -> Result<(String, String), FetchError> {
        page.goto(url)
            .await
            .map_err(|e| FetchError::Browser(e.to_string()))?;

        // Wait on document.readyState rather than a fixed timeout; some
        // pages never fire load when long-polling is involved.
        let ready_script = r#"
            new Promise((resolve) => {
                if (document.readyState === 'complete' || document.readyState === 'interactive') {
                    resolve(document.readyState);
                } else {
                    document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
                    setTimeout(() => resolve('timeout'), 10000);
                }
            })
        "#;
        match page.evaluate(ready_script.to_string()).await {
            Ok(result) => {
                let state: String = result
                    .into_value()
                    .unwrap_or_else(|_| "unknown".to_string());
                debug!(url, state, "page ready state");
            }
            Err(e) => debug!(url, error = %e, "could not check ready state"),
        }

        // Settle time for late-rendering dynamic content.
        tokio::time::sleep(self.settle).await;

        let final_url = page
            .url()
            .await
            .map_err(|e| FetchError::Browser(e.to_string()))?
            .unwrap_or_else(|| url.to_string());

        let html = page
            .content()
            .await
            .map_err(|e| FetchError::Browser(e.to_string()))?;

        Ok((html, final_url))
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl PageFetcher for BrowserFetcher {
    fn method(&self) -> FetchMethod {
        FetchMethod::Browser
    }

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let browser = self.ensure_browser().await?;

        let start = Instant::now();
        let page = {
            let guard = browser.lock().await;
            guard.new_page("about:blank").await
        }
        .map_err(|e| FetchError::Browser(e.to_string()))?;

        let result = tokio::time::timeout(self.timeout, self.render(&page, url)).await;

        // The page is released whether the render succeeded, failed, or
        // timed out; leaked tabs accumulate in a long-lived browser.
        if let Err(e) = page.close().await {
            warn!(url, error = %e, "failed to close browser page");
        }

        let (html, final_url) = match result {
            Ok(Ok(rendered)) => rendered,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(FetchError::Timeout),
        };

        Ok(FetchedPage {
            html,
            final_url,
            // CDP does not surface the navigation status; a rendered
            // document is treated as a successful response.
            status: 200,
            method: FetchMethod::Browser,
            response_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Stub used when the `browser` feature is disabled; always escalates the
/// chain to the fallback method.
#[cfg(not(feature = "browser"))]
pub struct BrowserFetcher;

#[cfg(not(feature = "browser"))]
impl BrowserFetcher {
    pub fn new(_settings: &FetchSettings) -> Self {
        Self
    }
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl PageFetcher for BrowserFetcher {
    fn method(&self) -> FetchMethod {
        FetchMethod::Browser
    }

    async fn fetch(&self, _url: &str) -> Result<FetchedPage, FetchError> {
        Err(FetchError::Browser(
            "browser support not compiled; rebuild with --features browser".to_string(),
        ))
    }
}
