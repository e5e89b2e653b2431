//! Turns a debugging port into the WebSocket URL of Discord's main window by
//! asking the DevTools HTTP listing.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::ScrapeError;
use crate::utils::cache_buster;

/// Where Discord's DevTools can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEndpoint {
    pub port: u16,
    /// `ws://127.0.0.1:<port>/devtools/browser/<id>`, known only when the
    /// supervisor relaunched the client and saw the banner.
    pub browser_url: Option<String>,
    /// WebSocket URL of the page to drive, once resolved from `/json/list`.
    pub page_url: Option<String>,
}

impl DebugEndpoint {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            browser_url: None,
            page_url: None,
        }
    }

    pub fn with_browser_id(port: u16, browser_id: &str) -> Self {
        Self {
            port,
            browser_url: Some(format!("ws://127.0.0.1:{port}/devtools/browser/{browser_id}")),
            page_url: None,
        }
    }

    pub fn with_page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = Some(url.into());
        self
    }
}

/// One entry of `/json/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub websocket_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DebugEndpointResolver {
    client: reqwest::Client,
    host: String,
    timeout: Duration,
    poll_interval: Duration,
}

impl DebugEndpointResolver {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            host: "localhost".to_string(),
            timeout,
            poll_interval,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn listing_url(&self, port: u16) -> String {
        format!("http://{}:{port}/json/list?t={}", self.host, cache_buster())
    }

    /// WebSocket URL of the first listed target.
    #[instrument(skip(self))]
    pub async fn resolve(&self, port: u16) -> Result<String, ScrapeError> {
        let body = self.fetch_listing(port).await?;
        let url = select_socket_url(&body)?;
        debug!(url = %url, "Resolved DevTools target");
        Ok(url)
    }

    /// Copy of `endpoint` with its page URL filled in from the listing.
    pub async fn resolve_endpoint(&self, endpoint: &DebugEndpoint) -> Result<DebugEndpoint, ScrapeError> {
        let url = self.resolve(endpoint.port).await?;
        Ok(endpoint.clone().with_page_url(url))
    }

    /// Fetch the listing body, polling until the port answers or the deadline
    /// passes.
    async fn fetch_listing(&self, port: u16) -> Result<String, ScrapeError> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut last_error;

        loop {
            let request = self
                .client
                .get(self.listing_url(port))
                .timeout(self.poll_interval.max(Duration::from_secs(2)))
                .send()
                .await;

            match request {
                Ok(response) if response.status().is_success() => {
                    return response
                        .text()
                        .await
                        .map_err(|e| ScrapeError::MalformedResponse(format!("target listing body: {e}")));
                }
                Ok(response) => last_error = format!("HTTP {}", response.status()),
                Err(e) => last_error = e.to_string(),
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(port, error = %last_error, "DevTools port never answered");
                return Err(ScrapeError::DebugPortTimeout {
                    port,
                    waited: self.timeout,
                    reason: last_error,
                });
            }
            debug!(port, error = %last_error, "DevTools port not ready yet");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Parse a `/json/list` body and pick the first target's socket URL.
pub fn select_socket_url(body: &str) -> Result<String, ScrapeError> {
    let targets: Vec<TargetInfo> = serde_json::from_str(body)
        .map_err(|e| ScrapeError::MalformedResponse(format!("target listing is not a target array: {e}")))?;
    let first = targets
        .into_iter()
        .next()
        .ok_or_else(|| ScrapeError::MalformedResponse("target listing is empty".into()))?;
    first.websocket_url.ok_or_else(|| {
        ScrapeError::MalformedResponse(format!("target {} has no webSocketDebuggerUrl", first.id))
    })
}
