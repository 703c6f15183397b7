//! openFDA device API client

pub mod cache;
pub mod fetcher;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::ApiConfig;

pub use cache::{CacheKey, QueryCache};
pub use fetcher::{fetch_all, FetchOutcome, FetchRequest, StopReason};

/// The four device datasets this tool reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Registration,
    Classification,
    Clearance,
    Event,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Registration => "device/registrationlisting.json",
            Endpoint::Classification => "device/classification.json",
            Endpoint::Clearance => "device/510k.json",
            Endpoint::Event => "device/event.json",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Failure fetching a single page
#[derive(Debug, Error)]
pub enum FetchError {
    /// openFDA answers an unmatched search with 404 `NOT_FOUND`
    #[error("no matching records")]
    NoMatches,
    #[error("HTTP {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// One page of search results. `limit` and `skip` map to openFDA's paging parameters.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(
        &self,
        endpoint: Endpoint,
        search: &str,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<Value>, FetchError>;

    /// URL a page request would hit, for display
    fn page_url(&self, _endpoint: Endpoint, _search: &str, _limit: usize, _skip: usize) -> Option<String> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    results: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
}

/// HTTP client for api.fda.gov (or any server speaking the same protocol)
pub struct OpenFdaClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenFdaClient {
    pub fn new(config: &ApiConfig) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("fda-finder/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string),
        })
    }

    /// Build the request URL. The search expression goes in verbatim so the
    /// `+`, `:`, `(` and `[` of the query grammar survive.
    pub fn url(&self, endpoint: Endpoint, search: &str, limit: usize, skip: usize) -> Result<Url, FetchError> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url, endpoint.path()))
            .map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        let mut query = String::new();
        if !search.is_empty() {
            query.push_str("search=");
            query.push_str(search);
            query.push('&');
        }
        query.push_str(&format!("limit={}&skip={}", limit, skip));
        url.set_query(Some(&query));

        Ok(url)
    }
}

#[async_trait]
impl PageSource for OpenFdaClient {
    async fn fetch_page(
        &self,
        endpoint: Endpoint,
        search: &str,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<Value>, FetchError> {
        let url = self.url(endpoint, search, limit, skip)?;
        debug!("GET {}", url);

        let mut request = self.http.get(url);
        if let Some(ref key) = self.api_key {
            request = request.header("X-Api-Key", key);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            if status == StatusCode::NOT_FOUND {
                let body = response.text().await?;
                if let Ok(err) = serde_json::from_str::<ErrorEnvelope>(&body) {
                    if err.error.code == "NOT_FOUND" {
                        return Err(FetchError::NoMatches);
                    }
                }
            }
            return Err(FetchError::Status(status.as_u16()));
        }

        let envelope = response.json::<Envelope>().await.map_err(|e| {
            if e.is_decode() {
                FetchError::Malformed(e.to_string())
            } else {
                FetchError::Transport(e)
            }
        })?;
        Ok(envelope.results.unwrap_or_default())
    }

    fn page_url(&self, endpoint: Endpoint, search: &str, limit: usize, skip: usize) -> Option<String> {
        self.url(endpoint, search, limit, skip).ok().map(String::from)
    }
}
