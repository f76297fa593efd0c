//! # Sapos League Service Worker
//!
//! Offline caching and push notification runtime for the Sapos League web app.
//!
//! ## Features
//!
//! - **Cache Store**: versioned named caches (`static-<version>`, `dynamic-<version>`)
//! - **Resource Classifier**: maps a request URL to a caching strategy
//! - **Strategies**: cache-first, network-first, stale-while-revalidate
//! - **Lifecycle**: install, activate, skip-waiting, old generation cleanup
//! - **Push**: managed-push and Web Push payload normalization
//! - **Interaction**: notification click routing to client windows
//! - **Background Sync**: data resync, pending notification flush, cache eviction
//! - **Messaging**: page ⇄ worker postMessage protocol
//!
//! ## Architecture
//!
//! ```text
//! WorkerEvent ──► ServiceWorker::dispatch
//!     │
//!     ├── Fetch ──► Classifier ──► StrategyEngine ──► CacheStore / Network
//!     ├── Install / Activate ──► LifecycleManager ──► Registration
//!     ├── Push ──► PushNormalizer ──► NotificationCenter (retry, outbox)
//!     ├── NotificationClick ──► InteractionRouter ──► ClientRegistry
//!     ├── Sync ──► SyncCoordinator
//!     └── Message ──► messaging bridge ──► reply port / broadcast
//! ```
//!
//! Every host facility (cache storage, network, notifications, clients,
//! background sync) sits behind a trait so the runtime carries no global
//! state; the in-memory implementations double as a reference host.

use sapos_common::SaposError;
use thiserror::Error;

pub mod cache;
pub mod classify;
pub mod config;
pub mod event;
pub mod fetch;
pub mod interaction;
pub mod lifecycle;
pub mod messaging;
pub mod net;
pub mod offline;
pub mod platform;
pub mod push;
pub mod strategy;
pub mod sync;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheStorage, CacheStore, MemoryCacheStore, RequestKey};
pub use classify::{ClassificationRules, Classifier, ResourceClass};
pub use config::{NotificationDefaults, RetryPolicy, SwConfig};
pub use event::{EventKind, EventResult, Lifetime, WorkerEvent};
pub use fetch::{FetchRequest, Response, ResponseSource};
pub use interaction::{ClickOutcome, InteractionRouter, NotificationClick};
pub use lifecycle::{
    ActivationReport, InstallOutcome, LifecycleManager, Registration, SharedRegistration,
    WorkerState, WorkerVersion,
};
pub use messaging::{BridgeReply, ClientMessage, ClientRequest, MessageEvent, MessageOutcome};
pub use net::{HttpNetwork, NetworkConfig};
pub use platform::{
    ClientInfo, ClientRegistry, ClientType, MemoryClients, MemoryNetwork,
    MemoryNotificationCenter, MemorySyncRegistry, Network, NotificationCenter, Platform,
    SyncRegistry,
};
pub use push::{
    Notification, NotificationAction, NotificationOutbox, PushChannel, PushMessage,
    PushNormalizer, PushReport,
};
pub use strategy::{Served, StrategyEngine, StrategyError};
pub use sync::{SyncCoordinator, SyncReport, SyncTag};
pub use worker::{FetchReply, ServiceWorker};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Install failed while caching {url}: {source}")]
    InstallFailed {
        url: String,
        #[source]
        source: SaposError,
    },

    #[error("Install of version {0} was superseded by a newer install")]
    Superseded(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid pattern {pattern}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Platform(#[from] SaposError),
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;

// ==================== Helpers ====================

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
