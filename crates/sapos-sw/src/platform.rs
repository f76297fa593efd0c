//! Host platform seams.
//!
//! The runtime never touches the network, the OS notification tray, page
//! windows or the background sync scheduler directly. Each is a trait here;
//! the `Memory*` implementations act as a reference host for embedding and
//! for tests.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use hashbrown::HashMap;
use sapos_common::{OptionExt, Result, SaposError};
use url::Url;

use crate::cache::{CacheStore, RequestKey};
use crate::fetch::{FetchRequest, Response};
use crate::messaging::ClientMessage;
use crate::push::{Notification, NotificationOutbox};

// ==================== Traits ====================

/// Network access.
#[async_trait]
pub trait Network: Send + Sync {
    /// Fetch a request. `Err` means no response was produced at all;
    /// HTTP error statuses come back as `Ok`.
    async fn fetch(&self, request: &FetchRequest) -> Result<Response>;
}

/// Platform notification API.
#[async_trait]
pub trait NotificationCenter: Send + Sync {
    /// Render a notification. A visible notification with the same tag is
    /// replaced.
    async fn show(&self, notification: &Notification) -> Result<()>;

    /// Close the visible notification with this tag, if any.
    async fn close(&self, tag: &str) -> Result<()>;
}

/// Connected page instances.
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    /// Enumerate window clients.
    async fn match_all(&self, include_uncontrolled: bool) -> Result<Vec<ClientInfo>>;

    /// Bring a window client to the foreground.
    async fn focus(&self, client_id: &str) -> Result<()>;

    /// Post a message to one client.
    async fn post_message(&self, client_id: &str, message: &ClientMessage) -> Result<()>;

    /// Open a new window. `None` when the host cannot open windows.
    async fn open_window(&self, url: &Url) -> Result<Option<ClientInfo>>;

    /// Take control of every in-scope client.
    async fn claim(&self) -> Result<()>;
}

/// Background sync registration.
#[async_trait]
pub trait SyncRegistry: Send + Sync {
    /// Register a sync under `tag`. Registering a pending tag again is a no-op.
    async fn register(&self, tag: &str) -> Result<()>;
}

/// Bundle of host facilities handed to the runtime.
#[derive(Clone)]
pub struct Platform {
    pub caches: Arc<dyn CacheStore>,
    pub network: Arc<dyn Network>,
    pub notifications: Arc<dyn NotificationCenter>,
    pub clients: Arc<dyn ClientRegistry>,
    pub sync: Arc<dyn SyncRegistry>,
    /// Undelivered notifications. Outlives a version switch.
    pub outbox: Arc<NotificationOutbox>,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}

// ==================== Client ====================

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
}

/// Snapshot of a connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Whether controlled by the active worker.
    pub controlled: bool,
}

impl ClientInfo {
    /// Create a window client.
    pub fn window(url: Url) -> Self {
        Self {
            id: format!("client-{}", uuid_simple()),
            url,
            client_type: ClientType::Window,
            focused: false,
            controlled: false,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ==================== Memory Network ====================

/// Routed in-memory network with an on/off switch.
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    routes: Mutex<HashMap<RequestKey, Response>>,
    failing: Mutex<BTreeSet<String>>,
    offline: AtomicBool,
    log: Mutex<Vec<Url>>,
}

impl MemoryNetwork {
    /// Create an online network with no routes (every URL answers 404).
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with status 200 at `url`.
    pub fn route(&self, url: &Url, body: &str) {
        self.route_response(Response::new(url.clone(), 200, body.to_string()));
    }

    /// Serve a prepared response at its URL.
    pub fn route_response(&self, response: Response) {
        lock(&self.routes).insert(RequestKey::get(&response.url), response);
    }

    /// Make fetches of one URL fail as if the connection dropped.
    pub fn fail(&self, url: &Url) {
        lock(&self.failing).insert(RequestKey::get(url).url);
    }

    /// Switch the whole network on or off.
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    /// Number of fetches attempted.
    pub fn fetch_count(&self) -> usize {
        lock(&self.log).len()
    }

    /// Number of fetches attempted for one URL.
    pub fn fetch_count_for(&self, url: &Url) -> usize {
        let key = RequestKey::get(url).url;
        lock(&self.log).iter().filter(|u| u.as_str() == key).count()
    }
}

#[async_trait]
impl Network for MemoryNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<Response> {
        let key = RequestKey::get(&request.url);
        lock(&self.log).push(Url::parse(&key.url).unwrap_or_else(|_| request.url.clone()));

        if self.offline.load(Ordering::SeqCst) || lock(&self.failing).contains(&key.url) {
            return Err(SaposError::network(format!("failed to fetch {}", request.url)));
        }

        Ok(lock(&self.routes)
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Response::new(request.url.clone(), 404, "")))
    }
}

// ==================== Memory Notifications ====================

/// In-memory notification tray.
#[derive(Debug, Default)]
pub struct MemoryNotificationCenter {
    visible: Mutex<Vec<Notification>>,
    shown: AtomicU64,
    closed: Mutex<Vec<String>>,
    failures_remaining: AtomicU32,
}

impl MemoryNotificationCenter {
    /// Create an empty tray.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls to `show`.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Currently visible notifications, oldest first.
    pub fn visible(&self) -> Vec<Notification> {
        lock(&self.visible).clone()
    }

    /// Total successful renders, replacements included.
    pub fn shown_count(&self) -> u64 {
        self.shown.load(Ordering::SeqCst)
    }

    /// Tags closed so far.
    pub fn closed(&self) -> Vec<String> {
        lock(&self.closed).clone()
    }
}

#[async_trait]
impl NotificationCenter for MemoryNotificationCenter {
    async fn show(&self, notification: &Notification) -> Result<()> {
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(SaposError::notification("notification service unavailable"));
        }

        let mut visible = lock(&self.visible);
        visible.retain(|n| n.tag != notification.tag);
        visible.push(notification.clone());
        self.shown.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self, tag: &str) -> Result<()> {
        lock(&self.visible).retain(|n| n.tag != tag);
        lock(&self.closed).push(tag.to_string());
        Ok(())
    }
}

// ==================== Memory Clients ====================

/// In-memory client registry with a mailbox per client.
#[derive(Debug)]
pub struct MemoryClients {
    clients: Mutex<Vec<ClientInfo>>,
    mailboxes: Mutex<HashMap<String, Vec<ClientMessage>>>,
    can_open_windows: bool,
    claimed: AtomicBool,
}

impl Default for MemoryClients {
    fn default() -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
            mailboxes: Mutex::new(HashMap::new()),
            can_open_windows: true,
            claimed: AtomicBool::new(false),
        }
    }
}

impl MemoryClients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry whose host cannot open windows.
    pub fn without_open_window() -> Self {
        Self {
            can_open_windows: false,
            ..Self::default()
        }
    }

    /// Add a client.
    pub fn add(&self, client: ClientInfo) -> String {
        let id = client.id.clone();
        lock(&self.clients).push(client);
        id
    }

    /// Remove a client.
    pub fn remove(&self, id: &str) -> Option<ClientInfo> {
        let mut clients = lock(&self.clients);
        let index = clients.iter().position(|c| c.id == id)?;
        Some(clients.remove(index))
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<ClientInfo> {
        lock(&self.clients).iter().find(|c| c.id == id).cloned()
    }

    /// All clients, in connection order.
    pub fn all(&self) -> Vec<ClientInfo> {
        lock(&self.clients).clone()
    }

    /// Messages delivered to a client.
    pub fn messages(&self, id: &str) -> Vec<ClientMessage> {
        lock(&self.mailboxes).get(id).cloned().unwrap_or_default()
    }

    /// Whether `claim` has been called.
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientRegistry for MemoryClients {
    async fn match_all(&self, include_uncontrolled: bool) -> Result<Vec<ClientInfo>> {
        Ok(lock(&self.clients)
            .iter()
            .filter(|c| c.client_type == ClientType::Window)
            .filter(|c| include_uncontrolled || c.controlled)
            .cloned()
            .collect())
    }

    async fn focus(&self, client_id: &str) -> Result<()> {
        let mut clients = lock(&self.clients);
        let target = clients
            .iter()
            .position(|c| c.id == client_id)
            .ok_or_not_found(client_id)?;
        if clients[target].client_type != ClientType::Window {
            return Err(SaposError::client("Can only focus window clients"));
        }
        for (index, client) in clients.iter_mut().enumerate() {
            client.focused = index == target;
        }
        Ok(())
    }

    async fn post_message(&self, client_id: &str, message: &ClientMessage) -> Result<()> {
        if !lock(&self.clients).iter().any(|c| c.id == client_id) {
            return Err(SaposError::NotFound(client_id.to_string()));
        }
        lock(&self.mailboxes)
            .entry(client_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn open_window(&self, url: &Url) -> Result<Option<ClientInfo>> {
        if !self.can_open_windows {
            return Ok(None);
        }
        let mut client = ClientInfo::window(url.clone());
        client.focused = true;
        client.controlled = self.is_claimed();
        let mut clients = lock(&self.clients);
        for other in clients.iter_mut() {
            other.focused = false;
        }
        clients.push(client.clone());
        Ok(Some(client))
    }

    async fn claim(&self) -> Result<()> {
        self.claimed.store(true, Ordering::SeqCst);
        for client in lock(&self.clients).iter_mut() {
            client.controlled = true;
        }
        Ok(())
    }
}

// ==================== Memory Sync ====================

/// In-memory sync scheduler: the set of pending tags.
#[derive(Debug, Default)]
pub struct MemorySyncRegistry {
    pending: Mutex<BTreeSet<String>>,
}

impl MemorySyncRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending tags, sorted.
    pub fn pending(&self) -> Vec<String> {
        lock(&self.pending).iter().cloned().collect()
    }

    /// Mark a tag as fired; returns whether it was pending.
    pub fn take(&self, tag: &str) -> bool {
        lock(&self.pending).remove(tag)
    }
}

#[async_trait]
impl SyncRegistry for MemorySyncRegistry {
    async fn register(&self, tag: &str) -> Result<()> {
        if tag.trim().is_empty() {
            return Err(SaposError::sync("sync tag must not be empty"));
        }
        lock(&self.pending).insert(tag.to_string());
        Ok(())
    }
}

// ==================== Helpers ====================

/// Generate a simple UUID-like string.
fn uuid_simple() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!(
        "{:016x}-{:04x}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64,
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_memory_network_routes_and_404() {
        let network = MemoryNetwork::new();
        let home = url("https://sapos-league.web.app/index.html");
        network.route(&home, "home");

        let ok = network.fetch(&FetchRequest::get(home.clone())).await.unwrap();
        assert_eq!(ok.text(), "home");

        let missing = network
            .fetch(&FetchRequest::get(url("https://sapos-league.web.app/x.css")))
            .await
            .unwrap();
        assert_eq!(missing.status, 404);
        assert_eq!(network.fetch_count(), 2);
        assert_eq!(network.fetch_count_for(&home), 1);
    }

    #[tokio::test]
    async fn test_memory_network_offline() {
        let network = MemoryNetwork::new();
        let home = url("https://sapos-league.web.app/");
        network.route(&home, "home");
        network.set_online(false);
        assert!(network.fetch(&FetchRequest::get(home.clone())).await.is_err());
        network.set_online(true);
        assert!(network.fetch(&FetchRequest::get(home)).await.is_ok());
    }

    #[tokio::test]
    async fn test_notifications_replace_by_tag() {
        let center = MemoryNotificationCenter::new();
        let mut first = Notification::default();
        first.tag = "jogo".into();
        first.title = "A".into();
        let mut second = first.clone();
        second.title = "B".into();

        center.show(&first).await.unwrap();
        center.show(&second).await.unwrap();

        let visible = center.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].title, "B");
        assert_eq!(center.shown_count(), 2);
    }

    #[tokio::test]
    async fn test_notifications_fail_next() {
        let center = MemoryNotificationCenter::new();
        center.fail_next(1);
        assert!(center.show(&Notification::default()).await.is_err());
        assert!(center.show(&Notification::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_clients_open_window_and_focus() {
        let clients = MemoryClients::new();
        let existing = clients.add(ClientInfo::window(url("https://sapos-league.web.app/")));

        let opened = clients
            .open_window(&url("https://sapos-league.web.app/painel.html"))
            .await
            .unwrap()
            .unwrap();
        assert!(opened.focused);
        assert!(!clients.get(&existing).unwrap().focused);

        clients.focus(&existing).await.unwrap();
        assert!(clients.get(&existing).unwrap().focused);
        assert!(!clients.get(&opened.id).unwrap().focused);
    }

    #[tokio::test]
    async fn test_clients_match_all_respects_control() {
        let clients = MemoryClients::new();
        clients.add(ClientInfo::window(url("https://sapos-league.web.app/")));
        assert!(clients.match_all(false).await.unwrap().is_empty());
        assert_eq!(clients.match_all(true).await.unwrap().len(), 1);

        clients.claim().await.unwrap();
        assert_eq!(clients.match_all(false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clients_post_to_unknown_fails() {
        let clients = MemoryClients::new();
        let message = ClientMessage::VersionUpdated {
            version: "1".into(),
        };
        assert!(clients.post_message("nope", &message).await.is_err());
    }

    #[tokio::test]
    async fn test_sync_registry_dedups() {
        let sync = MemorySyncRegistry::new();
        sync.register("cache-cleanup").await.unwrap();
        sync.register("cache-cleanup").await.unwrap();
        assert_eq!(sync.pending(), vec!["cache-cleanup"]);
        assert!(sync.take("cache-cleanup"));
        assert!(sync.register("").await.is_err());
    }
}
