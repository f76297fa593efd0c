//! Caching Strategy Engine.
//!
//! Each strategy returns an explicit [`Served`] or [`StrategyError`]; the
//! fetch handler turns `Exhausted` into the offline page and
//! `CacheUnavailable` into a direct network fetch.

use std::sync::Arc;

use sapos_common::SaposError;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{CacheStore, RequestKey};
use crate::event::Lifetime;
use crate::fetch::{FetchRequest, Response};
use crate::platform::Network;

/// A response produced by a strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum Served {
    Cache(Response),
    Network(Response),
}

impl Served {
    pub fn response(&self) -> &Response {
        match self {
            Served::Cache(r) | Served::Network(r) => r,
        }
    }

    pub fn into_response(self) -> Response {
        match self {
            Served::Cache(r) | Served::Network(r) => r,
        }
    }
}

/// Why a strategy could not produce a response.
#[derive(Error, Debug)]
pub enum StrategyError {
    /// Cache and network both failed; the offline page applies.
    #[error("cache and network exhausted: {0}")]
    Exhausted(#[source] SaposError),

    /// Network failed and no fallback applies; propagate.
    #[error("network failed: {0}")]
    Network(#[source] SaposError),

    /// The cache store itself failed; bypass it for this request.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(#[source] SaposError),
}

/// Runs strategies against a cache store and a network.
#[derive(Clone)]
pub struct StrategyEngine {
    caches: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
}

impl StrategyEngine {
    pub fn new(caches: Arc<dyn CacheStore>, network: Arc<dyn Network>) -> Self {
        Self { caches, network }
    }

    /// Cache-first: authoritative cache, network on miss, offline page on
    /// total failure.
    pub async fn cache_first(
        &self,
        request: &FetchRequest,
        cache_name: &str,
    ) -> Result<Served, StrategyError> {
        let key = RequestKey::get(&request.url);
        match self.caches.match_any(&key).await {
            Ok(Some(cached)) => {
                debug!(url = %request.url, "Cache-first hit");
                return Ok(Served::Cache(cached));
            }
            Ok(None) => {}
            Err(e) => return Err(StrategyError::CacheUnavailable(e)),
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                store(self.caches.as_ref(), cache_name, key, &response).await;
                Ok(Served::Network(response))
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Cache-first miss and network failed");
                Err(StrategyError::Exhausted(e))
            }
        }
    }

    /// Network-first: fresh when online, cached copy when not. `page`
    /// selects whether the offline page applies on a cache miss.
    pub async fn network_first(
        &self,
        request: &FetchRequest,
        cache_name: &str,
        page: bool,
    ) -> Result<Served, StrategyError> {
        let key = RequestKey::get(&request.url);
        let error = match self.network.fetch(request).await {
            Ok(response) => {
                store(self.caches.as_ref(), cache_name, key, &response).await;
                return Ok(Served::Network(response));
            }
            Err(e) => e,
        };

        debug!(url = %request.url, error = %error, "Network failed, trying cache");
        match self.caches.match_any(&key).await {
            Ok(Some(cached)) => return Ok(Served::Cache(cached)),
            Ok(None) => {}
            Err(cache_error) => {
                warn!(url = %request.url, error = %cache_error, "Cache lookup failed after network failure")
            }
        }

        if page {
            Err(StrategyError::Exhausted(error))
        } else {
            Err(StrategyError::Network(error))
        }
    }

    /// Stale-while-revalidate: answer from the cache at once and refresh it
    /// in the background; wait on the network only on a miss.
    pub async fn stale_while_revalidate(
        &self,
        request: &FetchRequest,
        cache_name: &str,
        page: bool,
        lifetime: &mut Lifetime,
    ) -> Result<Served, StrategyError> {
        let key = RequestKey::get(&request.url);
        let cached = self
            .caches
            .match_in(cache_name, &key)
            .await
            .map_err(StrategyError::CacheUnavailable)?;

        if let Some(cached) = cached {
            let engine = self.clone();
            let request = request.clone();
            let cache_name = cache_name.to_string();
            lifetime.wait_until(async move {
                engine.revalidate(&request, &cache_name, key).await;
            });
            return Ok(Served::Cache(cached));
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                store(self.caches.as_ref(), cache_name, key, &response).await;
                Ok(Served::Network(response))
            }
            Err(e) if page => Err(StrategyError::Exhausted(e)),
            Err(e) => Err(StrategyError::Network(e)),
        }
    }

    async fn revalidate(&self, request: &FetchRequest, cache_name: &str, key: RequestKey) {
        match self.network.fetch(request).await {
            Ok(response) => store(self.caches.as_ref(), cache_name, key, &response).await,
            Err(e) => debug!(url = %request.url, error = %e, "Revalidation failed, keeping cached copy"),
        }
    }
}

impl std::fmt::Debug for StrategyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyEngine").finish_non_exhaustive()
    }
}

/// Store a successful response; failed writes only cost a future hit.
async fn store(caches: &dyn CacheStore, cache_name: &str, key: RequestKey, response: &Response) {
    if !response.ok() {
        debug!(url = %key.url, status = response.status, "Not caching unsuccessful response");
        return;
    }
    if let Err(e) = caches.put(cache_name, key, response.clone()).await {
        warn!(cache = cache_name, error = %e, "Cache write failed");
    }
}
