//! Lifecycle Manager.
//!
//! ```text
//! Registration
//!     ├── installing ── Installing ─┐
//!     ├── waiting    ── Installed  ◄┘ ─┐ skip-waiting / clients released
//!     └── active     ── Activating ◄───┘ ─► Activated
//! ```
//!
//! A newer install moves the previous installing version to `Redundant`;
//! its fetches are abandoned and anything it wrote is swept by the next
//! activate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use sapos_common::SaposError;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheStore, RequestKey};
use crate::config::{dynamic_cache_for, static_cache_for, SwConfig};
use crate::fetch::{FetchRequest, Response};
use crate::messaging::{broadcast, ClientMessage};
use crate::offline::offline_response;
use crate::platform::{ClientRegistry, Network, Platform};
use crate::{Result, ServiceWorkerError};

// ==================== Types ====================

/// Unique identifier for one installation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Worker version state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Populating the static cache.
    Installing,
    /// Installed, waiting for activation.
    Installed,
    /// Sweeping old caches and claiming clients.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Superseded or failed.
    Redundant,
}

/// One installed (or installing) version of the worker.
#[derive(Debug, Clone)]
pub struct WorkerVersion {
    /// Installation attempt ID.
    pub id: WorkerId,

    /// Cache generation tag.
    pub version: String,

    /// Current state.
    pub state: WorkerState,

    /// Whether a client asked this version to skip waiting.
    pub skip_waiting: bool,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl WorkerVersion {
    fn new(version: &str) -> Self {
        Self {
            id: WorkerId::new(),
            version: version.to_string(),
            state: WorkerState::Parsed,
            skip_waiting: false,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: WorkerState) {
        debug!(version = %self.version, from = ?self.state, to = ?state, "Worker state change");
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == WorkerState::Activated
    }
}

// ==================== Registration ====================

/// Versions of the worker known for one scope. At most one is active.
#[derive(Debug)]
pub struct Registration {
    /// Scope URL.
    pub scope: Url,

    /// Installing version.
    pub installing: Option<WorkerVersion>,

    /// Waiting version (installed but not active).
    pub waiting: Option<WorkerVersion>,

    /// Active version.
    pub active: Option<WorkerVersion>,
}

/// Registration shared between concurrently running handlers.
pub type SharedRegistration = Arc<RwLock<Registration>>;

impl Registration {
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Wrap in a shared handle.
    pub fn shared(scope: Url) -> SharedRegistration {
        Arc::new(RwLock::new(Self::new(scope)))
    }

    /// Start installing `version`, superseding any install in progress.
    pub fn begin_install(&mut self, version: &str) -> WorkerId {
        if let Some(mut old) = self.installing.take() {
            warn!(version = %old.version, "Install superseded by a newer install");
            old.set_state(WorkerState::Redundant);
        }
        let mut worker = WorkerVersion::new(version);
        worker.set_state(WorkerState::Installing);
        let id = worker.id;
        self.installing = Some(worker);
        id
    }

    /// Whether `id` is still the version being installed.
    pub fn is_installing(&self, id: WorkerId) -> bool {
        self.installing.as_ref().is_some_and(|w| w.id == id)
    }

    /// Move the installing version to waiting.
    pub fn install_complete(&mut self, id: WorkerId) -> Result<()> {
        let mut worker = match self.installing.take() {
            Some(worker) if worker.id == id => worker,
            other => {
                self.installing = other;
                return Err(ServiceWorkerError::Superseded(format!("{id:?}")));
            }
        };
        worker.set_state(WorkerState::Installed);
        if let Some(mut old) = self.waiting.replace(worker) {
            old.set_state(WorkerState::Redundant);
        }
        Ok(())
    }

    /// Drop a failed install. The active version is untouched.
    pub fn install_failed(&mut self, id: WorkerId) {
        if self.is_installing(id) {
            if let Some(mut worker) = self.installing.take() {
                worker.set_state(WorkerState::Redundant);
            }
        }
    }

    /// Record a skip-waiting request. Returns true when a waiting version
    /// can be activated right away.
    pub fn request_skip_waiting(&mut self) -> bool {
        if let Some(waiting) = self.waiting.as_mut() {
            waiting.skip_waiting = true;
            return true;
        }
        if let Some(installing) = self.installing.as_mut() {
            installing.skip_waiting = true;
        }
        false
    }

    /// Whether the waiting version may activate without waiting for old
    /// clients.
    pub fn should_activate_now(&self) -> bool {
        self.waiting.as_ref().is_some_and(|w| w.skip_waiting) || self.active.is_none()
    }

    /// Promote the waiting version to `Activating`, retiring the old one.
    /// An already active version may be re-activated (the sweep is
    /// idempotent). Returns the version tag being activated.
    pub fn begin_activate(&mut self) -> Result<String> {
        if let Some(mut worker) = self.waiting.take() {
            worker.set_state(WorkerState::Activating);
            if let Some(mut old) = self.active.replace(worker) {
                old.set_state(WorkerState::Redundant);
            }
        }
        match self.active.as_mut() {
            Some(worker) => {
                if worker.state != WorkerState::Activating {
                    worker.set_state(WorkerState::Activating);
                }
                Ok(worker.version.clone())
            }
            None => Err(ServiceWorkerError::StateError(
                "No installed version to activate".to_string(),
            )),
        }
    }

    /// Mark the activating version as active.
    pub fn activate_complete(&mut self) {
        if let Some(worker) = self.active.as_mut() {
            worker.set_state(WorkerState::Activated);
        }
    }

    /// Get the active version.
    pub fn active_version(&self) -> Option<&WorkerVersion> {
        self.active.as_ref()
    }

    /// Get the waiting version.
    pub fn waiting_version(&self) -> Option<&WorkerVersion> {
        self.waiting.as_ref()
    }
}

// ==================== Lifecycle Manager ====================

/// How an install ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Nothing was active (or skip-waiting was requested), so the new
    /// version activated straight away.
    Activated(ActivationReport),
    /// Installed; waiting for old clients to release control.
    Waiting,
}

/// What an activate did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    /// Version now active.
    pub version: String,
    /// Names of deleted caches from prior generations.
    pub deleted: Vec<String>,
    /// Clients told about the new version.
    pub notified: usize,
}

/// Drives install and activate for one configured version.
#[derive(Clone)]
pub struct LifecycleManager {
    config: Arc<SwConfig>,
    caches: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    clients: Arc<dyn ClientRegistry>,
    registration: SharedRegistration,
}

impl LifecycleManager {
    pub fn new(config: Arc<SwConfig>, platform: &Platform, registration: SharedRegistration) -> Self {
        Self {
            config,
            caches: platform.caches.clone(),
            network: platform.network.clone(),
            clients: platform.clients.clone(),
            registration,
        }
    }

    /// Shared registration handle.
    pub fn registration(&self) -> &SharedRegistration {
        &self.registration
    }

    /// Install this version: cache the whole static manifest and the
    /// offline page. Any failed asset aborts the install and leaves the
    /// previously active version in place.
    pub async fn install(&self) -> Result<InstallOutcome> {
        let version = self.config.version.clone();
        let id = self.registration.write().await.begin_install(&version);
        info!(%version, "Installing");

        if let Err(e) = self.populate(id).await {
            self.registration.write().await.install_failed(id);
            error!(%version, error = %e, "Install failed");
            return Err(e);
        }

        let activate_now = {
            let mut registration = self.registration.write().await;
            registration.install_complete(id).map_err(|_| {
                ServiceWorkerError::Superseded(version.clone())
            })?;
            registration.should_activate_now()
        };
        info!(%version, "Installed");

        if activate_now {
            Ok(InstallOutcome::Activated(self.activate().await?))
        } else {
            info!(%version, "Waiting for clients of the previous version to release control");
            Ok(InstallOutcome::Waiting)
        }
    }

    async fn populate(&self, id: WorkerId) -> Result<()> {
        let static_cache = self.config.static_cache_name();
        let urls = self.config.manifest_urls()?;

        // Fetch everything before writing anything.
        let fetched = try_join_all(urls.into_iter().map(|url| self.fetch_required(url))).await?;

        if !self.registration.read().await.is_installing(id) {
            return Err(ServiceWorkerError::Superseded(self.config.version.clone()));
        }

        self.caches.open(&static_cache).await?;
        for (url, response) in fetched {
            self.caches
                .put(&static_cache, RequestKey::get(&url), response)
                .await
                .map_err(|source| ServiceWorkerError::InstallFailed {
                    url: url.to_string(),
                    source,
                })?;
        }
        debug!(cache = %static_cache, "Static manifest cached");

        self.ensure_offline_page(&static_cache).await
    }

    async fn fetch_required(&self, url: Url) -> Result<(Url, Response)> {
        let response = self
            .network
            .fetch(&FetchRequest::get(url.clone()))
            .await
            .map_err(|source| ServiceWorkerError::InstallFailed {
                url: url.to_string(),
                source,
            })?;
        if !response.ok() {
            return Err(ServiceWorkerError::InstallFailed {
                url: url.to_string(),
                source: SaposError::network(format!(
                    "HTTP {} {}",
                    response.status, response.status_text
                )),
            });
        }
        Ok((url, response))
    }

    /// Cache the deployed offline page, or synthesize one.
    async fn ensure_offline_page(&self, cache_name: &str) -> Result<()> {
        let url = self.config.offline_url()?;
        let key = RequestKey::get(&url);
        if self.caches.match_in(cache_name, &key).await?.is_some() {
            return Ok(());
        }

        let response = match self.network.fetch(&FetchRequest::get(url.clone())).await {
            Ok(response) if response.ok() => {
                debug!(%url, "Using deployed offline page");
                response
            }
            _ => {
                debug!(%url, "Synthesizing offline page");
                offline_response(url.clone(), &self.config.app_name)
            }
        };

        self.caches
            .put(cache_name, key, response)
            .await
            .map_err(|source| ServiceWorkerError::InstallFailed {
                url: url.to_string(),
                source,
            })
    }

    /// Activate: delete every cache of a prior generation, then claim
    /// clients and tell them about the new version.
    pub async fn activate(&self) -> Result<ActivationReport> {
        let version = self.registration.write().await.begin_activate()?;
        info!(%version, "Activating");

        // The promoted version may not be the one this manager installs.
        let current = [static_cache_for(&version), dynamic_cache_for(&version)];
        let mut deleted = Vec::new();
        for name in self.caches.cache_names().await? {
            if current.contains(&name) {
                continue;
            }
            match self.caches.delete_cache(&name).await {
                Ok(_) => {
                    info!(cache = %name, "Deleted old cache");
                    deleted.push(name);
                }
                Err(e) => warn!(cache = %name, error = %e, "Failed to delete old cache"),
            }
        }
        for name in &current {
            self.caches.open(name).await?;
        }

        // Claiming only after the sweep keeps clients off stale caches.
        if let Err(e) = self.clients.claim().await {
            warn!(error = %e, "Failed to claim clients");
        }
        self.registration.write().await.activate_complete();

        let notified = broadcast(
            self.clients.as_ref(),
            &ClientMessage::VersionUpdated {
                version: version.clone(),
            },
        )
        .await;
        info!(%version, deleted = deleted.len(), notified, "Activated");

        Ok(ActivationReport {
            version,
            deleted,
            notified,
        })
    }

    /// Handle a skip-waiting request. Activates at once if a version is
    /// waiting; an install in progress will activate when it completes.
    pub async fn skip_waiting(&self) -> Result<Option<ActivationReport>> {
        let ready = self.registration.write().await.request_skip_waiting();
        if ready {
            Ok(Some(self.activate().await?))
        } else {
            debug!("Skip-waiting recorded, nothing waiting yet");
            Ok(None)
        }
    }

    /// Every client of the previous version has gone; activate the
    /// waiting version if there is one.
    pub async fn clients_released(&self) -> Result<Option<ActivationReport>> {
        if self.registration.read().await.waiting.is_none() {
            return Ok(None);
        }
        Ok(Some(self.activate().await?))
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("version", &self.config.version)
            .finish_non_exhaustive()
    }
}
