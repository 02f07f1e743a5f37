//! Primary HTTP fetch method.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, UPGRADE_INSECURE_REQUESTS};
use reqwest::redirect::Policy;

use super::{FetchError, FetchedPage, PageFetcher};
use crate::config::FetchSettings;
use crate::models::FetchMethod;

/// User agent presented to target sites by the HTTP methods.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Lightweight GET with browser-like headers. The fastest method and the
/// first tried; JavaScript-rendered pages escalate past it.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(settings: &FetchSettings) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("ja,en-US;q=0.7,en;q=0.3"),
        );
        headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(settings.http_timeout())
            .redirect(Policy::limited(settings.redirect_limit))
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .build()
            .expect("failed to build HTTP client");

        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    fn method(&self) -> FetchMethod {
        FetchMethod::Http
    }

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        let start = Instant::now();
        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let final_url = response.url().to_string();
        let html = response.text().await.map_err(FetchError::from_reqwest)?;
        let response_time_ms = start.elapsed().as_millis() as u64;

        Ok(FetchedPage {
            html,
            final_url,
            status: status.as_u16(),
            method: FetchMethod::Http,
            response_time_ms,
        })
    }
}
