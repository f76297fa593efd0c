//! Worker configuration.
//!
//! One [`SwConfig`] describes one deployed version of the worker. It is
//! injected into [`crate::ServiceWorker::new`]; nothing in the runtime reads
//! global state.

use std::time::Duration;

use sapos_common::RetryConfig;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::classify::ClassificationRules;
use crate::push::NotificationAction;
use crate::{Result, ServiceWorkerError};

const DEFAULT_ORIGIN: &str = "https://sapos-league.web.app/";
const DEFAULT_ICON: &str = "https://sapos-league.web.app/images/web-app-manifest-192x192.png";

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwConfig {
    /// Cache generation tag. Bump on every deploy.
    pub version: String,

    /// Application name, used by the offline page.
    pub app_name: String,

    /// Origin the worker is scoped to.
    pub origin: Url,

    /// Paths fetched and cached at install, relative to `origin`.
    pub static_manifest: Vec<String>,

    /// Path of the offline fallback page.
    pub offline_page: String,

    /// Resource classification rules.
    pub rules: ClassificationRules,

    /// Maximum entries kept in the dynamic cache by `cache-cleanup`.
    pub dynamic_cache_limit: usize,

    /// Endpoint refetched by `data-resync`.
    pub sync_endpoint: String,

    /// Notification defaults.
    pub notifications: NotificationDefaults,

    /// Delay before messaging a window opened from a notification click.
    pub new_window_message_delay_ms: u64,

    /// Retry policy for notification rendering.
    pub render_retry: RetryPolicy,
}

/// Defaults applied to every rendered notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub vibrate: Vec<u32>,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
    /// Value of `data.source` on rendered notifications.
    pub source: String,
}

/// Serializable capped exponential backoff policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for SwConfig {
    fn default() -> Self {
        Self {
            version: "2.1.3".to_string(),
            app_name: "Sapos League".to_string(),
            origin: Url::parse(DEFAULT_ORIGIN).expect("default origin is a valid URL"),
            static_manifest: [
                "/",
                "/index.html",
                "/painel.html",
                "/admin.html",
                "/css/index.css",
                "/css/painel.css",
                "/css/admin.css",
                "/css/components.css",
                "/css/dark-mode-colors.css",
                "/css/favicon-display.css",
                "/css/painel-dark-mode.css",
                "/js/index.js",
                "/js/painel.js",
                "/js/admin.js",
                "/js/firebase-config.js",
                "/js/dark-mode-logic.js",
                "/js/auth-manager.js",
                "/js/pwa-complete.js",
                "/js/pwa-install.js",
                "/js/dynamic-favicon.js",
                "/js/back-to-home.js",
                "/images/favicon.png",
                "/images/favicon-48x48.png",
                "/images/favicon-96x96.png",
                "/images/apple-touch-icon.png",
                "/images/web-app-manifest-192x192.png",
                "/images/web-app-manifest-512x512.png",
                "/site.webmanifest",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            offline_page: "/offline.html".to_string(),
            rules: ClassificationRules::default(),
            dynamic_cache_limit: 50,
            sync_endpoint: "/api/sync-data".to_string(),
            notifications: NotificationDefaults::default(),
            new_window_message_delay_ms: 1000,
            render_retry: RetryPolicy::default(),
        }
    }
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "⚽ Sapos League".to_string(),
            body: "Nova atualização disponível!".to_string(),
            icon: DEFAULT_ICON.to_string(),
            badge: DEFAULT_ICON.to_string(),
            tag: "sapos-league".to_string(),
            vibrate: vec![200, 100, 200],
            require_interaction: false,
            actions: vec![
                NotificationAction::new("view", "👀 Ver", Some("/images/favicon-48x48.png")),
                NotificationAction::new("close", "❌ Fechar", Some("/images/favicon-48x48.png")),
            ],
            source: "sapos-league-pwa".to_string(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Convert into the backoff config used by `retry_with_backoff`.
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl SwConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(ServiceWorkerError::Config("version must not be empty".into()));
        }
        if self.origin.cannot_be_a_base() {
            return Err(ServiceWorkerError::Config(format!(
                "origin {} cannot be used as a base URL",
                self.origin
            )));
        }
        if self.dynamic_cache_limit == 0 {
            return Err(ServiceWorkerError::Config(
                "dynamic_cache_limit must be at least 1".into(),
            ));
        }
        self.manifest_urls()?;
        self.offline_url()?;
        self.sync_url()?;
        Ok(())
    }

    /// Name of the current static cache.
    pub fn static_cache_name(&self) -> String {
        static_cache_for(&self.version)
    }

    /// Name of the current dynamic cache.
    pub fn dynamic_cache_name(&self) -> String {
        dynamic_cache_for(&self.version)
    }

    /// Resolve a path or URL against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.origin
            .join(path)
            .map_err(|source| ServiceWorkerError::InvalidUrl {
                url: path.to_string(),
                source,
            })
    }

    /// Absolute URLs of the static manifest, in order.
    pub fn manifest_urls(&self) -> Result<Vec<Url>> {
        self.static_manifest.iter().map(|p| self.resolve(p)).collect()
    }

    /// Absolute URL of the offline page.
    pub fn offline_url(&self) -> Result<Url> {
        self.resolve(&self.offline_page)
    }

    /// Absolute URL of the data-resync endpoint.
    pub fn sync_url(&self) -> Result<Url> {
        self.resolve(&self.sync_endpoint)
    }

    /// Delay before messaging a freshly opened window.
    pub fn new_window_message_delay(&self) -> Duration {
        Duration::from_millis(self.new_window_message_delay_ms)
    }
}

/// Static cache name for a version tag.
pub fn static_cache_for(version: &str) -> String {
    format!("static-{version}")
}

/// Dynamic cache name for a version tag.
pub fn dynamic_cache_for(version: &str) -> String {
    format!("dynamic-{version}")
}
