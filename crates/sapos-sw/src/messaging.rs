//! Client Messaging Bridge.
//!
//! Pages talk to the worker with `{type, payload?}` objects. Requests that
//! expect an answer carry a one-shot reply port; worker-initiated messages
//! are broadcast to every connected window.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::platform::ClientRegistry;

// ==================== Page → Worker ====================

/// Request sent by a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    /// Activate the waiting version now.
    SkipWaiting,
    /// Reply with the current version tag.
    GetVersion,
    /// Delete every named cache.
    ClearCache,
    /// Register a background sync.
    SyncRequest { tag: String },
}

impl ClientRequest {
    /// Parse a message body. `None` for unknown types or a sync request
    /// without a tag.
    ///
    /// Both the kebab-case names and the legacy upper-case ones
    /// (`SKIP_WAITING`, ...) are accepted.
    pub fn parse(data: &JsonValue) -> Option<Self> {
        let kind = data.get("type")?.as_str()?;
        match kind {
            "skip-waiting" | "SKIP_WAITING" => Some(Self::SkipWaiting),
            "get-version" | "GET_VERSION" => Some(Self::GetVersion),
            "clear-cache" | "CLEAR_CACHE" => Some(Self::ClearCache),
            "sync-request" | "SYNC_REQUEST" => sync_tag(data).map(|tag| Self::SyncRequest { tag }),
            _ => None,
        }
    }

    /// Message type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SkipWaiting => "skip-waiting",
            Self::GetVersion => "get-version",
            Self::ClearCache => "clear-cache",
            Self::SyncRequest { .. } => "sync-request",
        }
    }
}

/// Tag from `payload.tag`, a string `payload`, or a top-level `tag`.
fn sync_tag(data: &JsonValue) -> Option<String> {
    let payload = data.get("payload");
    payload
        .and_then(|p| p.get("tag"))
        .or(payload.filter(|p| p.is_string()))
        .or_else(|| data.get("tag"))
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(String::from)
}

/// Answer sent over a reply port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BridgeReply {
    Version { version: String },
    Cleared { success: bool },
}

/// An incoming message event.
#[derive(Debug)]
pub struct MessageEvent {
    /// Message body.
    pub data: JsonValue,

    /// Sending client, if known.
    pub source: Option<String>,

    /// Reply port.
    pub reply: Option<oneshot::Sender<BridgeReply>>,
}

impl MessageEvent {
    /// Message without a reply port.
    pub fn new(data: JsonValue) -> Self {
        Self {
            data,
            source: None,
            reply: None,
        }
    }

    /// Message with a reply port; returns the receiving end.
    pub fn with_reply(data: JsonValue) -> (Self, oneshot::Receiver<BridgeReply>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                data,
                source: None,
                reply: Some(tx),
            },
            rx,
        )
    }

    /// Set the sending client.
    pub fn from_client(mut self, client_id: impl Into<String>) -> Self {
        self.source = Some(client_id.into());
        self
    }

    /// Send a reply if the sender asked for one. Returns whether it was
    /// delivered.
    pub fn respond(&mut self, reply: BridgeReply) -> bool {
        let Some(port) = self.reply.take() else {
            debug!("Message carried no reply port");
            return false;
        };
        if port.send(reply).is_err() {
            warn!("Reply port closed before the reply was sent");
            return false;
        }
        true
    }
}

/// What handling a message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Skip-waiting handled; `activated` if a waiting version went live.
    SkipWaiting { activated: bool },
    /// Version sent back.
    Version(String),
    /// Caches cleared.
    Cleared { success: bool },
    /// Background sync requested.
    SyncRequested { tag: String, registered: bool },
    /// Unknown or malformed message.
    Ignored,
}

// ==================== Worker → Page ====================

/// Message posted to pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// A new version took control.
    VersionUpdated { version: String },
    /// Fresh data from `data-resync`.
    DataSynced { data: JsonValue },
    /// The user clicked a notification.
    NotificationClicked { url: String, data: JsonValue },
}

/// Post `message` to every window client, controlled or not. Returns how
/// many received it; delivery failures are logged.
pub async fn broadcast(clients: &dyn ClientRegistry, message: &ClientMessage) -> usize {
    let targets = match clients.match_all(true).await {
        Ok(targets) => targets,
        Err(e) => {
            warn!(error = %e, "Failed to enumerate clients for broadcast");
            return 0;
        }
    };

    let mut delivered = 0;
    for client in &targets {
        match clients.post_message(&client.id, message).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!(client = %client.id, error = %e, "Failed to post message"),
        }
    }
    debug!(delivered, total = targets.len(), "Broadcast sent");
    delivered
}

/// Delete every named cache regardless of generation. `false` if any
/// deletion failed.
pub async fn clear_all_caches(caches: &dyn CacheStore) -> bool {
    let names = match caches.cache_names().await {
        Ok(names) => names,
        Err(e) => {
            warn!(error = %e, "Failed to list caches");
            return false;
        }
    };

    let mut success = true;
    for name in names {
        if let Err(e) = caches.delete_cache(&name).await {
            warn!(cache = %name, error = %e, "Failed to delete cache");
            success = false;
        }
    }
    success
}
