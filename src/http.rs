use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::Client;
use serde_json::Value;
use sts_core_types::SyncError;
use sts_registry::{DetailRequest, SystemSource};
use tracing::debug;
use url::Url;

/// Roster and detail endpoints served over HTTP. The server only answers
/// JSON to requests that look like ajax calls, so every request carries
/// `X-Requested-With: XMLHttpRequest`.
pub struct HttpSource {
    client: Client,
    base: Url,
}

impl HttpSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let mut normalized = base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base = Url::parse(&normalized)
            .map_err(|err| SyncError::transport(format!("invalid base url {base_url}: {err}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("x-requested-with"),
            HeaderValue::from_static("XMLHttpRequest"),
        );
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| SyncError::transport(format!("failed to build HTTP client: {err}")))?;

        Ok(Self { client, base })
    }

    pub fn roster_url(&self) -> Url {
        self.base.clone()
    }

    /// The roster's `url` when it gave one, `{base}{id}/` otherwise, plus
    /// `?since=N` for incremental requests.
    pub fn detail_url(&self, request: &DetailRequest) -> Result<Url, SyncError> {
        let relative = match &request.url {
            Some(url) => url.clone(),
            None => format!("{}/", request.id),
        };
        let mut url = self
            .base
            .join(&relative)
            .map_err(|err| SyncError::transport(format!("invalid detail url {relative}: {err}")))?;
        if let Some(since) = request.since {
            url.query_pairs_mut()
                .append_pair("since", &since.to_string());
        }
        Ok(url)
    }

    async fn get_json(&self, url: Url) -> Result<Value, SyncError> {
        debug!(%url, "GET");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| SyncError::transport(format!("GET {url} failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::transport(format!("GET {url} returned {status}")));
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| SyncError::malformed(format!("GET {url} returned invalid JSON: {err}")))
    }
}

#[async_trait]
impl SystemSource for HttpSource {
    async fn fetch_roster(&self) -> Result<Value, SyncError> {
        self.get_json(self.roster_url()).await
    }

    async fn fetch_detail(&self, request: &DetailRequest) -> Result<Value, SyncError> {
        let url = self.detail_url(request)?;
        self.get_json(url).await
    }
}
