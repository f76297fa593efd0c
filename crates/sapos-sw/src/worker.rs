//! The worker runtime: one handler per event kind.
//!
//! [`ServiceWorker`] owns nothing global. Configuration, host platform and
//! registration are injected at construction; every handler is an async
//! method that can be driven on its own or through [`ServiceWorker::dispatch`].

use std::sync::Arc;

use http::Method;
use sapos_common::{RetryConfig, SaposError};
use tracing::{debug, info, warn};

use crate::cache::RequestKey;
use crate::classify::{Classifier, ResourceClass};
use crate::config::SwConfig;
use crate::event::{EventResult, Lifetime, WorkerEvent};
use crate::fetch::{FetchRequest, Response, ResponseSource};
use crate::interaction::{ClickOutcome, InteractionRouter, NotificationClick};
use crate::lifecycle::{
    ActivationReport, InstallOutcome, LifecycleManager, SharedRegistration,
};
use crate::messaging::{clear_all_caches, BridgeReply, ClientRequest, MessageEvent, MessageOutcome};
use crate::offline::offline_response;
use crate::platform::Platform;
use crate::push::{render_with_retry, NotificationOutbox, PushMessage, PushNormalizer, PushReport};
use crate::strategy::{Served, StrategyEngine, StrategyError};
use crate::sync::{SyncCoordinator, SyncReport, SyncTag};
use crate::Result;

/// Answer to a fetch event.
#[derive(Debug)]
pub struct FetchReply {
    /// Response handed back to the page, or the network error when no
    /// fallback applies.
    pub result: std::result::Result<Response, SaposError>,

    /// Where the response came from.
    pub source: ResponseSource,

    /// Work that continues after the response (background revalidation).
    /// Hosts must call [`Lifetime::settle`] on it; dropping it aborts the
    /// pending refresh.
    pub lifetime: Lifetime,
}

impl FetchReply {
    /// The response, if one was produced.
    pub fn response(&self) -> Option<&Response> {
        self.result.as_ref().ok()
    }
}

/// Offline caching and push notification worker for one app version.
#[derive(Debug)]
pub struct ServiceWorker {
    config: Arc<SwConfig>,
    platform: Platform,
    classifier: Classifier,
    strategies: StrategyEngine,
    lifecycle: LifecycleManager,
    normalizer: PushNormalizer,
    outbox: Arc<NotificationOutbox>,
    router: InteractionRouter,
    sync: SyncCoordinator,
    render_retry: RetryConfig,
}

impl ServiceWorker {
    /// Build a worker. Fails if the configuration is invalid.
    pub fn new(config: SwConfig, platform: Platform, registration: SharedRegistration) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let classifier = Classifier::new(&config.origin, &config.manifest_urls()?, &config.rules)?;
        let strategies = StrategyEngine::new(platform.caches.clone(), platform.network.clone());
        let lifecycle = LifecycleManager::new(config.clone(), &platform, registration);
        let normalizer = PushNormalizer::new(config.notifications.clone());
        let outbox = platform.outbox.clone();
        let render_retry = config.render_retry.to_retry_config();
        let router = InteractionRouter::new(
            config.origin.clone(),
            platform.notifications.clone(),
            platform.clients.clone(),
            config.new_window_message_delay(),
        );
        let sync = SyncCoordinator::new(
            platform.caches.clone(),
            platform.network.clone(),
            platform.notifications.clone(),
            platform.clients.clone(),
            platform.sync.clone(),
            outbox.clone(),
            config.dynamic_cache_name(),
            config.dynamic_cache_limit,
            config.sync_url()?,
            render_retry.clone(),
        );

        info!(version = %config.version, origin = %config.origin, "Service worker created");

        Ok(Self {
            config,
            platform,
            classifier,
            strategies,
            lifecycle,
            normalizer,
            outbox,
            router,
            sync,
            render_retry,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &SwConfig {
        &self.config
    }

    /// Get the shared registration.
    pub fn registration(&self) -> &SharedRegistration {
        self.lifecycle.registration()
    }

    /// Notifications waiting for a `notification-flush` sync.
    pub fn outbox(&self) -> &NotificationOutbox {
        &self.outbox
    }

    /// Route an event to its handler.
    pub async fn dispatch(&self, event: WorkerEvent) -> EventResult {
        debug!(event = event.kind().as_str(), "Dispatching event");
        match event {
            WorkerEvent::Install => EventResult::Install(self.install().await),
            WorkerEvent::Activate => EventResult::Activate(self.activate().await),
            WorkerEvent::Fetch(request) => EventResult::Fetch(self.handle_fetch(request).await),
            WorkerEvent::Push(message) => EventResult::Push(self.handle_push(message).await),
            WorkerEvent::NotificationClick(click) => {
                EventResult::NotificationClick(self.handle_notification_click(click).await)
            }
            WorkerEvent::NotificationClose(notification) => {
                self.router.handle_close(&notification);
                EventResult::NotificationClose
            }
            WorkerEvent::Message(message) => EventResult::Message(self.handle_message(message).await),
            WorkerEvent::Sync(tag) => EventResult::Sync(self.handle_sync(&tag).await),
        }
    }

    // ==================== Lifecycle ====================

    /// Install this version.
    pub async fn install(&self) -> Result<InstallOutcome> {
        self.lifecycle.install().await
    }

    /// Activate this version.
    pub async fn activate(&self) -> Result<ActivationReport> {
        self.lifecycle.activate().await
    }

    /// Every client of the previous version has closed.
    pub async fn clients_released(&self) -> Result<Option<ActivationReport>> {
        self.lifecycle.clients_released().await
    }

    // ==================== Fetch ====================

    /// Handle an intercepted request.
    pub async fn handle_fetch(&self, request: FetchRequest) -> FetchReply {
        let mut lifetime = Lifetime::new();

        if request.method != Method::GET {
            return self.passthrough(&request, lifetime).await;
        }

        let class = self.classifier.classify(&request.url);
        let page = request.is_navigation || Classifier::is_page(&request.url);
        debug!(url = %request.url, ?class, page, "Classified request");

        let outcome = match class {
            ResourceClass::Never => return self.passthrough(&request, lifetime).await,
            ResourceClass::Static => {
                self.strategies
                    .cache_first(&request, &self.config.static_cache_name())
                    .await
            }
            ResourceClass::Dynamic => {
                self.strategies
                    .stale_while_revalidate(
                        &request,
                        &self.config.dynamic_cache_name(),
                        page,
                        &mut lifetime,
                    )
                    .await
            }
            ResourceClass::Html => {
                self.strategies
                    .network_first(&request, &self.config.dynamic_cache_name(), page)
                    .await
            }
        };

        match outcome {
            Ok(Served::Cache(response)) => FetchReply {
                result: Ok(response),
                source: ResponseSource::Cache,
                lifetime,
            },
            Ok(Served::Network(response)) => FetchReply {
                result: Ok(response),
                source: ResponseSource::Network,
                lifetime,
            },
            Err(StrategyError::Exhausted(e)) => {
                info!(url = %request.url, error = %e, "Serving offline page");
                FetchReply {
                    result: Ok(self.offline_page().await),
                    source: ResponseSource::OfflinePage,
                    lifetime,
                }
            }
            Err(StrategyError::Network(e)) => FetchReply {
                result: Err(e),
                source: ResponseSource::Network,
                lifetime,
            },
            Err(StrategyError::CacheUnavailable(e)) => {
                warn!(url = %request.url, error = %e, "Cache unavailable, fetching directly");
                self.passthrough(&request, lifetime).await
            }
        }
    }

    async fn passthrough(&self, request: &FetchRequest, lifetime: Lifetime) -> FetchReply {
        FetchReply {
            result: self.platform.network.fetch(request).await,
            source: ResponseSource::Passthrough,
            lifetime,
        }
    }

    /// The cached offline page, synthesized again if the cache lost it.
    async fn offline_page(&self) -> Response {
        let Ok(url) = self.config.offline_url() else {
            return offline_response(self.config.origin.clone(), &self.config.app_name);
        };
        match self.platform.caches.match_any(&RequestKey::get(&url)).await {
            Ok(Some(cached)) => cached,
            Ok(None) => offline_response(url, &self.config.app_name),
            Err(e) => {
                warn!(error = %e, "Offline page lookup failed");
                offline_response(url, &self.config.app_name)
            }
        }
    }

    // ==================== Push ====================

    /// Handle a push: normalize, render with backoff, and park the
    /// notification in the outbox if rendering keeps failing.
    pub async fn handle_push(&self, message: PushMessage) -> PushReport {
        let notification = self.normalizer.normalize(&message);
        let render = render_with_retry(
            self.platform.notifications.as_ref(),
            &notification,
            &self.render_retry,
        )
        .await;

        match render {
            Ok(()) => {
                info!(tag = %notification.tag, title = %notification.title, "Notification shown");
                PushReport {
                    notification,
                    delivered: true,
                }
            }
            Err(e) => {
                warn!(tag = %notification.tag, error = %e, "Notification render failed, queueing");
                self.outbox.enqueue(notification.clone()).await;
                if let Err(e) = self
                    .platform
                    .sync
                    .register(SyncTag::NotificationFlush.as_str())
                    .await
                {
                    warn!(error = %e, "Failed to register notification flush");
                }
                PushReport {
                    notification,
                    delivered: false,
                }
            }
        }
    }

    // ==================== Interaction ====================

    /// Handle a notification click.
    pub async fn handle_notification_click(&self, click: NotificationClick) -> Result<ClickOutcome> {
        self.router.handle_click(&click).await
    }

    // ==================== Messaging ====================

    /// Handle a message from a page.
    pub async fn handle_message(&self, mut event: MessageEvent) -> MessageOutcome {
        let Some(request) = ClientRequest::parse(&event.data) else {
            warn!(data = %event.data, "Ignoring unknown message");
            return MessageOutcome::Ignored;
        };
        debug!(kind = request.as_str(), source = ?event.source, "Message received");

        match request {
            ClientRequest::SkipWaiting => {
                let activated = match self.lifecycle.skip_waiting().await {
                    Ok(report) => report.is_some(),
                    Err(e) => {
                        warn!(error = %e, "Skip-waiting failed");
                        false
                    }
                };
                MessageOutcome::SkipWaiting { activated }
            }
            ClientRequest::GetVersion => {
                let version = self.config.version.clone();
                event.respond(BridgeReply::Version {
                    version: version.clone(),
                });
                MessageOutcome::Version(version)
            }
            ClientRequest::ClearCache => {
                let success = clear_all_caches(self.platform.caches.as_ref()).await;
                info!(success, "Caches cleared on request");
                event.respond(BridgeReply::Cleared { success });
                MessageOutcome::Cleared { success }
            }
            ClientRequest::SyncRequest { tag } => {
                let registered = match self.platform.sync.register(&tag).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(%tag, error = %e, "Failed to register sync");
                        false
                    }
                };
                MessageOutcome::SyncRequested { tag, registered }
            }
        }
    }

    // ==================== Sync ====================

    /// Handle a background sync.
    pub async fn handle_sync(&self, tag: &str) -> Result<SyncReport> {
        self.sync.dispatch(tag).await
    }
}
