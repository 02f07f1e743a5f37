//! Multi-strategy page fetching.
//!
//! Strategies are tried in fixed priority order: plain HTTP GET with
//! browser-like headers, headless browser render for JavaScript-heavy
//! pages, then a minimal relaxed GET as a last resort. Each method carries
//! its own timeout; failures advance the chain and only exhaustion of all
//! methods is an error.

mod browser;
mod fallback;
mod http;

pub use browser::BrowserFetcher;
pub use fallback::FallbackFetcher;
pub use http::HttpFetcher;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::FetchSettings;
use crate::models::FetchMethod;

/// Errors from a single fetch method or from chain exhaustion.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("http status {0}")]
    Status(u16),

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("response body suspiciously short ({0} bytes)")]
    SuspectContent(usize),

    #[error("browser render failed: {0}")]
    Browser(String),

    #[error("all fetch methods failed: {summary}")]
    AllMethodsFailed { summary: String },
}

impl FetchError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// A successfully retrieved page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub html: String,
    /// URL after redirects.
    pub final_url: String,
    pub status: u16,
    pub method: FetchMethod,
    pub response_time_ms: u64,
}

/// A single fetch strategy. Implementations are independently swappable
/// and mockable; the chain only sees this interface.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    fn method(&self) -> FetchMethod;

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

/// Ordered fetch strategy chain with escalation.
pub struct FetchChain {
    fetchers: Vec<Box<dyn PageFetcher>>,
    min_content_len: usize,
    attempt_delay: std::time::Duration,
}

impl FetchChain {
    /// Build the standard chain: HTTP, browser render, relaxed fallback.
    pub fn new(settings: &FetchSettings) -> Self {
        let fetchers: Vec<Box<dyn PageFetcher>> = vec![
            Box::new(HttpFetcher::new(settings)),
            Box::new(BrowserFetcher::new(settings)),
            Box::new(FallbackFetcher::new(settings)),
        ];
        Self::with_fetchers(fetchers, settings)
    }

    /// Build a chain over caller-supplied strategies, in the given order.
    pub fn with_fetchers(fetchers: Vec<Box<dyn PageFetcher>>, settings: &FetchSettings) -> Self {
        Self {
            fetchers,
            min_content_len: settings.min_content_len,
            attempt_delay: settings.attempt_delay(),
        }
    }

    /// Try each strategy in order until one yields usable content.
    ///
    /// A response shorter than the configured minimum is treated as suspect
    /// and escalates even on HTTP success. A fixed courtesy delay separates
    /// attempts.
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let mut failures: Vec<String> = Vec::new();

        for (i, fetcher) in self.fetchers.iter().enumerate() {
            if i > 0 && !self.attempt_delay.is_zero() {
                tokio::time::sleep(self.attempt_delay).await;
            }

            let method = fetcher.method();
            debug!(url, method = method.as_str(), "trying fetch method");

            match fetcher.fetch(url).await {
                Ok(page) if page.html.len() < self.min_content_len => {
                    warn!(
                        url,
                        method = method.as_str(),
                        bytes = page.html.len(),
                        "response too short, escalating"
                    );
                    failures.push(format!(
                        "{}: {}",
                        method.as_str(),
                        FetchError::SuspectContent(page.html.len())
                    ));
                }
                Ok(page) => {
                    debug!(
                        url,
                        method = method.as_str(),
                        status = page.status,
                        "fetch succeeded"
                    );
                    return Ok(page);
                }
                Err(err) => {
                    debug!(url, method = method.as_str(), error = %err, "fetch method failed");
                    failures.push(format!("{}: {}", method.as_str(), err));
                }
            }
        }

        Err(FetchError::AllMethodsFailed {
            summary: failures.join("; "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedFetcher {
        method: FetchMethod,
        result: Result<String, ()>,
    }

    #[async_trait]
    impl PageFetcher for FixedFetcher {
        fn method(&self) -> FetchMethod {
            self.method
        }

        async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
            match &self.result {
                Ok(html) => Ok(FetchedPage {
                    html: html.clone(),
                    final_url: url.to_string(),
                    status: 200,
                    method: self.method,
                    response_time_ms: 1,
                }),
                Err(()) => Err(FetchError::Timeout),
            }
        }
    }

    fn settings() -> FetchSettings {
        FetchSettings {
            attempt_delay_ms: 0,
            min_content_len: 10,
            ..FetchSettings::default()
        }
    }

    #[tokio::test]
    async fn chain_escalates_past_failures() {
        let chain = FetchChain::with_fetchers(
            vec![
                Box::new(FixedFetcher {
                    method: FetchMethod::Http,
                    result: Err(()),
                }),
                Box::new(FixedFetcher {
                    method: FetchMethod::Fallback,
                    result: Ok("<html>long enough body</html>".into()),
                }),
            ],
            &settings(),
        );

        let page = chain.fetch("https://example.com").await.unwrap();
        assert_eq!(page.method, FetchMethod::Fallback);
    }

    #[tokio::test]
    async fn short_body_escalates_even_on_success() {
        let chain = FetchChain::with_fetchers(
            vec![
                Box::new(FixedFetcher {
                    method: FetchMethod::Http,
                    result: Ok("tiny".into()),
                }),
                Box::new(FixedFetcher {
                    method: FetchMethod::Fallback,
                    result: Ok("<html>long enough body</html>".into()),
                }),
            ],
            &settings(),
        );

        let page = chain.fetch("https://example.com").await.unwrap();
        assert_eq!(page.method, FetchMethod::Fallback);
    }

    #[tokio::test]
    async fn exhaustion_reports_every_method() {
        let chain = FetchChain::with_fetchers(
            vec![
                Box::new(FixedFetcher {
                    method: FetchMethod::Http,
                    result: Err(()),
                }),
                Box::new(FixedFetcher {
                    method: FetchMethod::Browser,
                    result: Err(()),
                }),
            ],
            &settings(),
        );

        let err = chain.fetch("https://example.com").await.unwrap_err();
        match err {
            FetchError::AllMethodsFailed { summary } => {
                assert!(summary.contains("http"));
                assert!(summary.contains("browser"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
