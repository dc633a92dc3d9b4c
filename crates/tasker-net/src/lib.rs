//! # Tasker Net
//!
//! HTTP networking for the Tasker offline cache controller.
//!
//! [`ResourceLoader`] performs the requests the cache cannot answer: the
//! shell asset fetches during install and every passthrough on a cache miss.
//! It implements [`tasker_sw::Network`], so the controller never depends on
//! `reqwest` directly.

use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;
use reqwest::{Client, Method};
use tasker_core::OfflineConfig;
use tasker_sw::{FetchRequest, FetchResponse, Network, NetworkError};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl NetError {
    /// Convert into the error reported across the `Network` seam.
    pub fn into_network_error(self, timeout: Duration) -> NetworkError {
        match self {
            NetError::Timeout(d) => NetworkError::Timeout(d),
            NetError::InvalidMethod(m) => NetworkError::RequestFailed(format!("invalid method {m}")),
            NetError::RequestFailed(msg) => NetworkError::RequestFailed(msg),
            NetError::HttpError(e) if e.is_timeout() => NetworkError::Timeout(timeout),
            NetError::HttpError(e) if e.is_builder() => NetworkError::InvalidUrl(e.to_string()),
            NetError::HttpError(e) if e.is_connect() => NetworkError::Offline,
            NetError::HttpError(e) => NetworkError::RequestFailed(e.to_string()),
        }
    }
}

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Default timeout.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("tasker-offline/{}", env!("CARGO_PKG_VERSION")),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

impl LoaderConfig {
    /// Loader settings taken from the offline configuration.
    pub fn from_offline_config(config: &OfflineConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            default_timeout: config.request_timeout(),
            ..Default::default()
        }
    }
}

/// Resource loader for fetching URLs.
#[derive(Debug, Clone)]
pub struct ResourceLoader {
    client: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        info!(timeout = ?config.default_timeout, "ResourceLoader initialized");

        Ok(Self { client, config })
    }

    /// Loader configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Fetch a request. Any HTTP status is a successful fetch; only
    /// transport failures are errors.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| NetError::InvalidMethod(request.method.clone()))?;

        let mut req_builder = self.client.request(method, request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name.as_str(), value.as_str());
        }

        if let Some(ref body) = request.body {
            req_builder = req_builder.body(body.clone());
        }

        let response = req_builder.send().await?;

        let status = response.status();
        let url = response.url().to_string();
        let headers = collect_headers(response.headers());
        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        Ok(FetchResponse {
            url,
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: body.to_vec(),
            from_cache: false,
        })
    }
}

/// Flatten a header map, joining repeated headers with `", "`. Values that
/// are not valid UTF-8 are dropped.
fn collect_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    let mut out: HashMap<String, String> = HashMap::new();
    for (name, value) in headers.iter() {
        let Ok(value) = value.to_str() else {
            continue;
        };
        out.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    out
}

#[async_trait]
impl Network for ResourceLoader {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, NetworkError> {
        ResourceLoader::fetch(self, request)
            .await
            .map_err(|e| e.into_network_error(self.config.default_timeout))
    }
}
