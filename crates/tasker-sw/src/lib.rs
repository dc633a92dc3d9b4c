//! # Tasker Service Worker
//!
//! Offline asset cache controller for the Tasker PWA.
//!
//! ## Features
//!
//! - **Install**: fetch the shell asset list and store it atomically
//! - **Activate**: evict cache generations other than the current one
//! - **Fetch**: cache-first lookup with network passthrough on a miss
//! - **Lifecycle events**: state changes published on a channel
//!
//! ## Architecture
//!
//! ```text
//! OfflineCacheController
//!     ├── CacheManifest (cache name + shell assets)
//!     ├── CacheStorage  (injected: memory or disk)
//!     │       └── Cache
//!     │               └── RequestKey → CacheEntry
//!     └── Network       (injected: real loader or test double)
//! ```
//!
//! The fetch path only reads the cache. Entries are written during install
//! and nowhere else.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tasker_core::OfflineConfig;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, trace, warn};
use url::Url;

pub mod storage;

pub use storage::{Cache, CacheStorage, DiskCacheStorage, MemoryCacheStorage};

// ==================== Errors ====================

/// Failure reported by a [`Network`] implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network unreachable")]
    Offline,
}

/// Errors that can occur in the cache controller.
#[derive(Error, Debug, Clone)]
pub enum SwError {
    /// A shell asset could not be fetched or stored during install.
    #[error("Bootstrap incomplete for cache {cache}: {reason}")]
    BootstrapIncomplete {
        cache: String,
        url: Option<String>,
        reason: String,
    },

    /// A passthrough request failed; the network's own error, unchanged.
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Config error: {0}")]
    Config(String),
}

// ==================== Types ====================

/// Unique identifier for a controller instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControllerId(u64);

impl ControllerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Controller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ControllerState {
    /// Created, install not yet attempted.
    #[default]
    Parsed,
    /// Shell assets being fetched.
    Installing,
    /// Shell cached, stale generations not yet evicted.
    Installed,
    /// Evicting stale generations.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Install failed.
    Redundant,
}

impl ControllerState {
    /// Whether fetches are answered from the cache in this state.
    pub fn serves_from_cache(self) -> bool {
        matches!(self, Self::Installed | Self::Activating | Self::Activated)
    }
}

/// Cache lookup key: method plus absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    /// Create a key. The method is normalized to upper case.
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
        }
    }

    /// Key for a GET request.
    pub fn get(url: &str) -> Self {
        Self::new("GET", url)
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// An outgoing resource request from a controlled page.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Request URL.
    pub url: Url,

    /// Request method.
    pub method: String,

    /// Request headers.
    pub headers: HashMap<String, String>,

    /// Request body.
    pub body: Option<Vec<u8>>,
}

impl FetchRequest {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new("GET", url)
    }

    /// Create a request with the given method.
    pub fn new(method: &str, url: Url) -> Self {
        Self {
            url,
            method: method.to_ascii_uppercase(),
            headers: HashMap::new(),
            body: None,
        }
    }

    /// Add a header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Set the body.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Cache key for this request. Fragments never reach the server and
    /// are not part of the key.
    pub fn key(&self) -> RequestKey {
        let mut url = self.url.clone();
        url.set_fragment(None);
        RequestKey::new(&self.method, url.as_str())
    }
}

/// A response, either from the network or from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// Final URL.
    pub url: String,

    /// Status code.
    pub status: u16,

    /// Status text.
    pub status_text: String,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Whether from cache.
    pub from_cache: bool,
}

impl FetchResponse {
    /// Create a network response.
    pub fn new(url: &str, status: u16, body: Vec<u8>) -> Self {
        Self {
            url: url.to_string(),
            status,
            status_text: String::new(),
            headers: HashMap::new(),
            body,
            from_cache: false,
        }
    }

    /// Create a response from cache entry.
    pub fn from_cache(entry: &CacheEntry) -> Self {
        Self {
            url: entry.response_url().to_string(),
            status: entry.status,
            status_text: entry.status_text.clone(),
            headers: entry.headers.clone(),
            body: entry.body.clone(),
            from_cache: true,
        }
    }

    /// Add a header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Check if status is 2xx.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Final response URL, after redirects. Empty when it equals `url`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub response_url: String,

    /// Response status.
    pub status: u16,

    /// Response status text.
    #[serde(default)]
    pub status_text: String,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Create an entry storing `response` under `key`.
    pub fn from_response(key: RequestKey, response: FetchResponse) -> Self {
        let response_url = if response.url == key.url {
            String::new()
        } else {
            response.url
        };
        Self {
            url: key.url,
            method: key.method,
            response_url,
            status: response.status,
            status_text: response.status_text,
            headers: response.headers,
            body: response.body,
            cached_at: now_millis(),
        }
    }

    /// Cache key of this entry.
    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }

    /// URL the stored response was served from.
    pub fn response_url(&self) -> &str {
        if self.response_url.is_empty() {
            &self.url
        } else {
            &self.response_url
        }
    }
}

mod body_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ==================== Network ====================

/// Performs requests the cache cannot answer.
#[async_trait]
pub trait Network: Send + Sync {
    /// Perform a request and return its response, whatever the status.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, NetworkError>;
}

// ==================== Manifest ====================

/// What the controller installs: the cache identifier and the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheManifest {
    /// Current cache identifier.
    pub cache_name: String,

    /// Shell assets, absolute, in install order.
    pub shell_assets: Vec<Url>,
}

impl CacheManifest {
    /// Create a manifest.
    pub fn new(cache_name: impl Into<String>, shell_assets: Vec<Url>) -> Self {
        Self {
            cache_name: cache_name.into(),
            shell_assets,
        }
    }

    /// Build a manifest from the offline configuration.
    pub fn from_config(config: &OfflineConfig) -> Result<Self, SwError> {
        config
            .validate()
            .map_err(|e| SwError::Config(e.to_string()))?;
        let shell_assets = config
            .resolve_shell_assets()
            .map_err(|e| SwError::Config(e.to_string()))?;
        Ok(Self::new(config.cache_name.clone(), shell_assets))
    }
}

// ==================== Events ====================

/// Lifecycle events published by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// State changed.
    StateChange {
        controller_id: ControllerId,
        new_state: ControllerState,
    },
    /// A stale cache generation was deleted during activation.
    CacheDeleted { cache_name: String },
}

// ==================== Controller ====================

/// The offline asset cache controller (the service worker).
pub struct OfflineCacheController {
    id: ControllerId,
    manifest: CacheManifest,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    state: RwLock<ControllerState>,
    event_tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl fmt::Debug for OfflineCacheController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineCacheController")
            .field("id", &self.id)
            .field("manifest", &self.manifest)
            .finish_non_exhaustive()
    }
}

impl OfflineCacheController {
    /// Create a new controller.
    pub fn new(
        manifest: CacheManifest,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                id: ControllerId::new(),
                manifest,
                storage,
                network,
                state: RwLock::new(ControllerState::Parsed),
                event_tx,
            },
            event_rx,
        )
    }

    /// Controller ID.
    pub fn id(&self) -> ControllerId {
        self.id
    }

    /// Manifest this controller installs.
    pub fn manifest(&self) -> &CacheManifest {
        &self.manifest
    }

    /// Current state.
    pub async fn state(&self) -> ControllerState {
        *self.state.read().await
    }

    async fn set_state(&self, state: ControllerState) {
        *self.state.write().await = state;
        self.publish_state(state);
    }

    fn publish_state(&self, new_state: ControllerState) {
        debug!(controller = %self.id, state = ?new_state, "Controller state changed");
        let _ = self.event_tx.send(LifecycleEvent::StateChange {
            controller_id: self.id,
            new_state,
        });
    }

    /// Handle the install event.
    ///
    /// Fetches every shell asset, then stores all of them in one write.
    /// If any asset fails, nothing is stored, the controller becomes
    /// [`ControllerState::Redundant`] and a bootstrap error is returned.
    /// Returns the number of entries stored.
    ///
    /// Only a fresh controller (or one whose install failed) may install.
    /// An installed controller keeps serving its generation; reinstalling
    /// takes a new controller over the same storage.
    pub async fn install(&self) -> Result<usize, SwError> {
        {
            let mut state = self.state.write().await;
            if !matches!(
                *state,
                ControllerState::Parsed | ControllerState::Redundant
            ) {
                return Err(SwError::StateError(format!(
                    "Cannot install from {:?}",
                    *state
                )));
            }
            *state = ControllerState::Installing;
        }
        self.publish_state(ControllerState::Installing);

        let cache_name = &self.manifest.cache_name;
        info!(
            cache = %cache_name,
            assets = self.manifest.shell_assets.len(),
            "Installing shell assets"
        );

        match self.populate().await {
            Ok(stored) => {
                info!(cache = %cache_name, entries = stored, "Install complete");
                self.set_state(ControllerState::Installed).await;
                Ok(stored)
            }
            Err(e) => {
                warn!(cache = %cache_name, error = %e, "Install failed");
                self.set_state(ControllerState::Redundant).await;
                Err(e)
            }
        }
    }

    async fn populate(&self) -> Result<usize, SwError> {
        let cache_name = &self.manifest.cache_name;
        if self.manifest.shell_assets.is_empty() {
            return Err(self.bootstrap_error(None, "shell asset list is empty".to_string()));
        }
        self.storage
            .open(cache_name)
            .await
            .map_err(|e| self.bootstrap_error(None, e.to_string()))?;

        // Fail fast: the first failing asset drops the remaining fetches.
        let entries = try_join_all(
            self.manifest
                .shell_assets
                .iter()
                .map(|url| self.fetch_shell_asset(url)),
        )
        .await?;

        let stored = entries.len();
        self.storage
            .put_all(cache_name, entries)
            .await
            .map_err(|e| self.bootstrap_error(None, e.to_string()))?;
        Ok(stored)
    }

    async fn fetch_shell_asset(&self, url: &Url) -> Result<CacheEntry, SwError> {
        let request = FetchRequest::get(url.clone());
        trace!(url = %url, "Fetching shell asset");

        let response = self
            .network
            .fetch(&request)
            .await
            .map_err(|e| self.bootstrap_error(Some(url), e.to_string()))?;

        if !response.ok() {
            return Err(self.bootstrap_error(
                Some(url),
                format!("{url} responded with status {}", response.status),
            ));
        }
        Ok(CacheEntry::from_response(request.key(), response))
    }

    fn bootstrap_error(&self, url: Option<&Url>, reason: String) -> SwError {
        SwError::BootstrapIncomplete {
            cache: self.manifest.cache_name.clone(),
            url: url.map(|u| u.to_string()),
            reason,
        }
    }

    /// Handle the activate event.
    ///
    /// Deletes every cache whose name differs from the current identifier
    /// and returns the deleted names. Running it again on an active
    /// controller repeats the eviction.
    pub async fn activate(&self) -> Result<Vec<String>, SwError> {
        {
            let mut state = self.state.write().await;
            match *state {
                ControllerState::Installed | ControllerState::Activated => {
                    *state = ControllerState::Activating
                }
                other => {
                    return Err(SwError::StateError(format!(
                        "Cannot activate from {other:?}"
                    )))
                }
            }
        }
        self.publish_state(ControllerState::Activating);

        match self.evict_stale_caches().await {
            Ok(deleted) => {
                info!(cache = %self.manifest.cache_name, evicted = deleted.len(), "Activated");
                self.set_state(ControllerState::Activated).await;
                Ok(deleted)
            }
            Err(e) => {
                warn!(error = %e, "Activation failed");
                self.set_state(ControllerState::Installed).await;
                Err(e)
            }
        }
    }

    async fn evict_stale_caches(&self) -> Result<Vec<String>, SwError> {
        let mut deleted = Vec::new();
        for name in self.storage.keys().await? {
            if name == self.manifest.cache_name {
                continue;
            }
            if self.storage.delete(&name).await? {
                debug!(cache = %name, "Deleted stale cache");
                let _ = self.event_tx.send(LifecycleEvent::CacheDeleted {
                    cache_name: name.clone(),
                });
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    /// Take over an existing installation.
    ///
    /// If the current cache generation is already populated in storage the
    /// controller goes straight to [`ControllerState::Activated`]. Returns
    /// whether it did.
    pub async fn resume(&self) -> Result<bool, SwError> {
        if self.state().await != ControllerState::Parsed {
            return Ok(false);
        }
        // An install that failed after opening the cache leaves it empty.
        if self
            .storage
            .entry_keys(&self.manifest.cache_name)
            .await?
            .is_empty()
        {
            return Ok(false);
        }
        info!(cache = %self.manifest.cache_name, "Resuming with existing cache");
        self.set_state(ControllerState::Activated).await;
        Ok(true)
    }

    /// Handle a fetch event.
    ///
    /// Serves the cached response on an exact key match, otherwise forwards
    /// the request to the network and returns its result unchanged. Never
    /// writes to the cache.
    pub async fn handle_fetch(&self, request: FetchRequest) -> Result<FetchResponse, SwError> {
        if self.state().await.serves_from_cache() {
            let key = request.key();
            if let Some(entry) = self
                .storage
                .match_request(&self.manifest.cache_name, &key)
                .await?
            {
                trace!(key = %key, "Cache hit");
                return Ok(FetchResponse::from_cache(&entry));
            }
            trace!(key = %key, "Cache miss");
        }

        let response = self.network.fetch(&request).await?;
        trace!(url = %request.url, status = response.status, "Network response");
        Ok(response)
    }

    /// Keys stored in the current cache generation.
    pub async fn cached_keys(&self) -> Result<Vec<RequestKey>, SwError> {
        self.storage.entry_keys(&self.manifest.cache_name).await
    }
}
