//! Last-resort fetch method.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::redirect::Policy;

use super::http::USER_AGENT;
use super::{FetchError, FetchedPage, PageFetcher};
use crate::config::FetchSettings;
use crate::models::FetchMethod;

/// Minimal GET with relaxed requirements: no extra headers beyond the user
/// agent and certificate validation disabled for sites with broken TLS.
/// Only reached after the HTTP and browser methods have both failed.
pub struct FallbackFetcher {
    client: reqwest::Client,
}

impl FallbackFetcher {
    pub fn new(settings: &FetchSettings) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.http_timeout())
            .redirect(Policy::limited(settings.redirect_limit))
            .danger_accept_invalid_certs(true)
            .build()
            .expect("failed to build fallback HTTP client");

        Self { client }
    }
}

#[async_trait]
impl PageFetcher for FallbackFetcher {
    fn method(&self) -> FetchMethod {
        FetchMethod::Fallback
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
            method: FetchMethod::Fallback,
            response_time_ms,
        })
    }
}
