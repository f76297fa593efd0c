//! Notification Interaction Router.
//!
//! A click always closes the notification. Unless the user picked a
//! dismiss action, the app is brought forward: an open window of this
//! origin is focused and messaged, otherwise a new window is opened at the
//! notification's target and messaged once it has had time to load.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use url::Url;

use crate::messaging::ClientMessage;
use crate::platform::{ClientRegistry, NotificationCenter};
use crate::push::Notification;
use crate::{Result, ServiceWorkerError};

/// Actions that close the notification and do nothing else.
const DISMISS_ACTIONS: &[&str] = &["close", "dismiss"];

/// A click on a rendered notification.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationClick {
    pub notification: Notification,
    /// Action button chosen, `None` for a click on the body.
    pub action: Option<String>,
}

impl NotificationClick {
    pub fn new(notification: Notification) -> Self {
        Self {
            notification,
            action: None,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    fn is_dismiss(&self) -> bool {
        self.action
            .as_deref()
            .is_some_and(|a| DISMISS_ACTIONS.contains(&a))
    }
}

/// Where a click led.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Dismiss action; nothing opened.
    Dismissed,
    /// An existing window was focused and messaged.
    Focused { client_id: String, url: Url },
    /// A new window was opened and messaged.
    Opened { client_id: String, url: Url },
    /// The host could not open a window.
    NoWindow { url: Url },
}

/// Routes notification clicks to client windows.
#[derive(Clone)]
pub struct InteractionRouter {
    origin: Url,
    notifications: Arc<dyn NotificationCenter>,
    clients: Arc<dyn ClientRegistry>,
    new_window_delay: Duration,
}

impl InteractionRouter {
    pub fn new(
        origin: Url,
        notifications: Arc<dyn NotificationCenter>,
        clients: Arc<dyn ClientRegistry>,
        new_window_delay: Duration,
    ) -> Self {
        Self {
            origin,
            notifications,
            clients,
            new_window_delay,
        }
    }

    /// Handle a notification click.
    pub async fn handle_click(&self, click: &NotificationClick) -> Result<ClickOutcome> {
        let notification = &click.notification;
        if let Err(e) = self.notifications.close(&notification.tag).await {
            warn!(tag = %notification.tag, error = %e, "Failed to close notification");
        }

        if click.is_dismiss() {
            debug!(tag = %notification.tag, "Notification dismissed");
            return Ok(ClickOutcome::Dismissed);
        }

        let raw = notification.url().unwrap_or("/");
        let target = self
            .origin
            .join(raw)
            .map_err(|source| ServiceWorkerError::InvalidUrl {
                url: raw.to_string(),
                source,
            })?;
        let message = ClientMessage::NotificationClicked {
            url: raw.to_string(),
            data: JsonValue::Object(notification.data.clone()),
        };

        let windows = self.clients.match_all(true).await?;
        if let Some(client) = windows.iter().find(|c| c.url.origin() == self.origin.origin()) {
            if let Err(e) = self.clients.focus(&client.id).await {
                warn!(client = %client.id, error = %e, "Failed to focus client");
            }
            self.clients.post_message(&client.id, &message).await?;
            info!(client = %client.id, url = %target, "Focused existing window");
            return Ok(ClickOutcome::Focused {
                client_id: client.id.clone(),
                url: target,
            });
        }

        let Some(client) = self.clients.open_window(&target).await? else {
            warn!(url = %target, "Host could not open a window");
            return Ok(ClickOutcome::NoWindow { url: target });
        };

        // The new page needs time to register its message listener.
        tokio::time::sleep(self.new_window_delay).await;
        if let Err(e) = self.clients.post_message(&client.id, &message).await {
            warn!(client = %client.id, error = %e, "Failed to message new window");
        }
        info!(client = %client.id, url = %target, "Opened new window");
        Ok(ClickOutcome::Opened {
            client_id: client.id,
            url: target,
        })
    }

    /// Handle a notification closed without a click.
    pub fn handle_close(&self, notification: &Notification) {
        let tracked = notification
            .data
            .get("trackClose")
            .is_some_and(|v| v.as_bool().unwrap_or(false));
        if tracked {
            info!(tag = %notification.tag, title = %notification.title, "Notification closed");
        } else {
            debug!(tag = %notification.tag, "Notification closed");
        }
    }
}

impl std::fmt::Debug for InteractionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionRouter")
            .field("origin", &self.origin.as_str())
            .field("new_window_delay", &self.new_window_delay)
            .finish_non_exhaustive()
    }
}
