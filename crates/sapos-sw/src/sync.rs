//! Background Sync Coordinator.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use sapos_common::{RetryConfig, SaposError};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CacheStore;
use crate::fetch::FetchRequest;
use crate::messaging::{broadcast, ClientMessage};
use crate::platform::{ClientRegistry, Network, NotificationCenter, SyncRegistry};
use crate::push::{render_with_retry, NotificationOutbox};
use crate::Result;

/// Known sync tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTag {
    /// Refetch authoritative data and broadcast it.
    DataResync,
    /// Render notifications that failed earlier.
    NotificationFlush,
    /// Trim the dynamic cache to its ceiling.
    CacheCleanup,
}

impl SyncTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTag::DataResync => "data-resync",
            SyncTag::NotificationFlush => "notification-flush",
            SyncTag::CacheCleanup => "cache-cleanup",
        }
    }
}

/// Accepts the legacy tag names (`sync-game-data`, `sync-notifications`,
/// `cleanup-cache`) still registered by older pages.
impl FromStr for SyncTag {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "data-resync" | "sync-game-data" => Ok(SyncTag::DataResync),
            "notification-flush" | "sync-notifications" => Ok(SyncTag::NotificationFlush),
            "cache-cleanup" | "cleanup-cache" => Ok(SyncTag::CacheCleanup),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for SyncTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a sync did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReport {
    DataResynced { clients: usize },
    NotificationsFlushed { delivered: usize, requeued: usize },
    CacheCleaned { evicted: usize, remaining: usize },
    /// Unknown tag; nothing done.
    Ignored(String),
}

/// Runs sync work by tag.
#[derive(Clone)]
pub struct SyncCoordinator {
    caches: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    notifications: Arc<dyn NotificationCenter>,
    clients: Arc<dyn ClientRegistry>,
    registry: Arc<dyn SyncRegistry>,
    outbox: Arc<NotificationOutbox>,
    dynamic_cache: String,
    dynamic_cache_limit: usize,
    sync_url: Url,
    render_retry: RetryConfig,
}

impl SyncCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        caches: Arc<dyn CacheStore>,
        network: Arc<dyn Network>,
        notifications: Arc<dyn NotificationCenter>,
        clients: Arc<dyn ClientRegistry>,
        registry: Arc<dyn SyncRegistry>,
        outbox: Arc<NotificationOutbox>,
        dynamic_cache: String,
        dynamic_cache_limit: usize,
        sync_url: Url,
        render_retry: RetryConfig,
    ) -> Self {
        Self {
            caches,
            network,
            notifications,
            clients,
            registry,
            outbox,
            dynamic_cache,
            dynamic_cache_limit,
            sync_url,
            render_retry,
        }
    }

    /// Run the work registered under `tag`. An `Err` tells the host to
    /// retry the sync later.
    pub async fn dispatch(&self, tag: &str) -> Result<SyncReport> {
        let Ok(known) = tag.parse::<SyncTag>() else {
            warn!(%tag, "Ignoring unknown sync tag");
            return Ok(SyncReport::Ignored(tag.to_string()));
        };
        debug!(tag = %known, "Sync started");

        let report = match known {
            SyncTag::DataResync => self.resync_data().await?,
            SyncTag::NotificationFlush => self.flush_notifications().await?,
            SyncTag::CacheCleanup => {
                let (evicted, remaining) =
                    evict_oldest(self.caches.as_ref(), &self.dynamic_cache, self.dynamic_cache_limit)
                        .await?;
                SyncReport::CacheCleaned { evicted, remaining }
            }
        };
        info!(tag = %known, ?report, "Sync finished");
        Ok(report)
    }

    async fn resync_data(&self) -> Result<SyncReport> {
        let response = self
            .network
            .fetch(&FetchRequest::get(self.sync_url.clone()))
            .await?;
        if !response.ok() {
            return Err(SaposError::sync(format!(
                "{} answered HTTP {}",
                self.sync_url, response.status
            ))
            .into());
        }
        let data: JsonValue = response.json()?;
        let clients = broadcast(self.clients.as_ref(), &ClientMessage::DataSynced { data }).await;
        Ok(SyncReport::DataResynced { clients })
    }

    async fn flush_notifications(&self) -> Result<SyncReport> {
        let pending = self.outbox.drain().await;
        let mut delivered = 0;
        let mut requeued = 0;

        for notification in pending {
            match render_with_retry(self.notifications.as_ref(), &notification, &self.render_retry)
                .await
            {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(tag = %notification.tag, error = %e, "Notification still undeliverable");
                    self.outbox.enqueue(notification).await;
                    requeued += 1;
                }
            }
        }

        if requeued > 0 {
            self.registry
                .register(SyncTag::NotificationFlush.as_str())
                .await?;
        }
        Ok(SyncReport::NotificationsFlushed {
            delivered,
            requeued,
        })
    }
}

impl fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("dynamic_cache", &self.dynamic_cache)
            .field("dynamic_cache_limit", &self.dynamic_cache_limit)
            .field("sync_url", &self.sync_url.as_str())
            .finish_non_exhaustive()
    }
}

/// Delete the oldest-inserted entries of `cache_name` until at most
/// `limit` remain. Returns `(evicted, remaining)`.
pub async fn evict_oldest(
    caches: &dyn CacheStore,
    cache_name: &str,
    limit: usize,
) -> sapos_common::Result<(usize, usize)> {
    let keys = caches.keys(cache_name).await?;
    if keys.len() <= limit {
        return Ok((0, keys.len()));
    }

    let excess = keys.len() - limit;
    let mut evicted = 0;
    for key in keys.iter().take(excess) {
        if caches.delete_entry(cache_name, key).await? {
            evicted += 1;
        }
    }
    debug!(cache = cache_name, evicted, "Evicted oldest entries");
    Ok((evicted, keys.len() - evicted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCacheStore, RequestKey};
    use crate::fetch::Response;
    use crate::platform::{
        ClientInfo, MemoryClients, MemoryNetwork, MemoryNotificationCenter, MemorySyncRegistry,
    };
    use crate::push::Notification;
    use serde_json::json;
    use std::time::Duration;

    const DYNAMIC: &str = "dynamic-2.1.3";

    struct Fixture {
        caches: Arc<MemoryCacheStore>,
        network: Arc<MemoryNetwork>,
        notifications: Arc<MemoryNotificationCenter>,
        clients: Arc<MemoryClients>,
        registry: Arc<MemorySyncRegistry>,
        outbox: Arc<NotificationOutbox>,
        coordinator: SyncCoordinator,
    }

    fn origin() -> Url {
        Url::parse("https://sapos-league.web.app/").unwrap()
    }

    fn fixture(limit: usize) -> Fixture {
        let caches = Arc::new(MemoryCacheStore::new());
        let network = Arc::new(MemoryNetwork::new());
        let notifications = Arc::new(MemoryNotificationCenter::new());
        let clients = Arc::new(MemoryClients::new());
        let registry = Arc::new(MemorySyncRegistry::new());
        let outbox = Arc::new(NotificationOutbox::new());
        let coordinator = SyncCoordinator::new(
            caches.clone(),
            network.clone(),
            notifications.clone(),
            clients.clone(),
            registry.clone(),
            outbox.clone(),
            DYNAMIC.to_string(),
            limit,
            origin().join("/api/sync-data").unwrap(),
            RetryConfig {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
                backoff_multiplier: 2.0,
                jitter: false,
            },
        );
        Fixture {
            caches,
            network,
            notifications,
            clients,
            registry,
            outbox,
            coordinator,
        }
    }

    async fn fill(caches: &MemoryCacheStore, count: usize) -> Vec<Url> {
        let mut urls = Vec::new();
        for i in 0..count {
            let url = origin().join(&format!("/images/escudo-{i}.png")).unwrap();
            caches
                .put(DYNAMIC, RequestKey::get(&url), Response::new(url.clone(), 200, "png"))
                .await
                .unwrap();
            urls.push(url);
        }
        urls
    }

    #[test]
    fn test_tag_parsing() {
        assert_eq!("cache-cleanup".parse::<SyncTag>(), Ok(SyncTag::CacheCleanup));
        assert_eq!(SyncTag::DataResync.to_string(), "data-resync");
        assert_eq!("sync-game-data".parse::<SyncTag>(), Ok(SyncTag::DataResync));
        assert!("whatever".parse::<SyncTag>().is_err());
    }

    #[tokio::test]
    async fn test_cleanup_evicts_oldest_first() {
        let f = fixture(50);
        let urls = fill(&f.caches, 73).await;

        let report = f.coordinator.dispatch("cache-cleanup").await.unwrap();
        assert_eq!(
            report,
            SyncReport::CacheCleaned {
                evicted: 23,
                remaining: 50
            }
        );
        assert_eq!(f.caches.len(DYNAMIC).await, 50);
        let oldest = f.caches.match_in(DYNAMIC, &RequestKey::get(&urls[22])).await.unwrap();
        assert!(oldest.is_none());
        let kept = f.caches.match_in(DYNAMIC, &RequestKey::get(&urls[23])).await.unwrap();
        assert!(kept.is_some());
    }

    #[tokio::test]
    async fn test_cleanup_under_limit_is_noop() {
        let f = fixture(50);
        fill(&f.caches, 10).await;
        assert_eq!(
            f.coordinator.dispatch("cache-cleanup").await.unwrap(),
            SyncReport::CacheCleaned {
                evicted: 0,
                remaining: 10
            }
        );
    }

    #[tokio::test]
    async fn test_data_resync_broadcasts() {
        let f = fixture(50);
        let page = f.clients.add(ClientInfo::window(origin()));
        f.network.route_response(
            Response::new(origin().join("/api/sync-data").unwrap(), 200, r#"{"jogos": 3}"#)
                .with_header("content-type", "application/json"),
        );

        let report = f.coordinator.dispatch("data-resync").await.unwrap();
        assert_eq!(report, SyncReport::DataResynced { clients: 1 });
        assert_eq!(
            f.clients.messages(&page),
            vec![ClientMessage::DataSynced {
                data: json!({"jogos": 3})
            }]
        );
    }

    #[tokio::test]
    async fn test_data_resync_failure_asks_for_retry() {
        let f = fixture(50);
        f.network.set_online(false);
        assert!(f.coordinator.dispatch("data-resync").await.is_err());
    }

    #[tokio::test]
    async fn test_flush_renders_and_requeues() {
        let f = fixture(50);
        f.outbox.enqueue(Notification { tag: "a".into(), ..Notification::default() }).await;
        f.outbox.enqueue(Notification { tag: "b".into(), ..Notification::default() }).await;

        // First notification fails on both attempts; second succeeds.
        f.notifications.fail_next(2);
        let report = f.coordinator.dispatch("notification-flush").await.unwrap();
        assert_eq!(
            report,
            SyncReport::NotificationsFlushed {
                delivered: 1,
                requeued: 1
            }
        );
        assert_eq!(f.outbox.len().await, 1);
        assert_eq!(f.registry.pending(), vec!["notification-flush"]);

        let report = f.coordinator.dispatch("notification-flush").await.unwrap();
        assert_eq!(
            report,
            SyncReport::NotificationsFlushed {
                delivered: 1,
                requeued: 0
            }
        );
        assert!(f.outbox.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_tag_ignored() {
        let f = fixture(50);
        assert_eq!(
            f.coordinator.dispatch("refresh-standings").await.unwrap(),
            SyncReport::Ignored("refresh-standings".into())
        );
    }
}
