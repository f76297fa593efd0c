//! Push Notification Normalizer.
//!
//! Two producers reach the worker: the managed push service (envelope with
//! a nested `notification` object plus a string-valued `data` map) and the
//! standards Web Push channel (whatever bytes the sender encrypted: JSON,
//! plain text, or nothing). Both are folded into one [`Notification`].

use std::collections::VecDeque;

use bytes::Bytes;
use sapos_common::{retry_with_backoff, RetryConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::NotificationDefaults;
use crate::platform::NotificationCenter;
use crate::now_millis;

/// Delivery channel a push arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PushChannel {
    /// Managed push service (FCM-style envelopes).
    ManagedPush,
    /// Standards-based Web Push.
    #[default]
    WebPush,
}

/// An incoming push event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PushMessage {
    pub channel: PushChannel,
    pub payload: Option<Bytes>,
}

impl PushMessage {
    /// Push with no payload.
    pub fn empty(channel: PushChannel) -> Self {
        Self {
            channel,
            payload: None,
        }
    }

    /// Push carrying raw bytes.
    pub fn with_payload(channel: PushChannel, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: Some(payload.into()),
        }
    }
}

/// A button rendered on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl NotificationAction {
    pub fn new(action: &str, title: &str, icon: Option<&str>) -> Self {
        Self {
            action: action.to_string(),
            title: title.to_string(),
            icon: icon.map(String::from),
        }
    }
}

/// Normalized notification, ready for the platform notification API.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Grouping key; a new notification with the same tag replaces the old.
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Arbitrary payload; always carries `url`.
    pub data: Map<String, JsonValue>,
    pub vibrate: Vec<u32>,
    pub require_interaction: bool,
    pub renotify: bool,
    pub silent: bool,
    pub timestamp: u64,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    /// Navigation target carried in `data.url`.
    pub fn url(&self) -> Option<&str> {
        self.data
            .get("url")
            .and_then(JsonValue::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Builds notifications from push payloads.
#[derive(Debug, Clone)]
pub struct PushNormalizer {
    defaults: NotificationDefaults,
}

impl PushNormalizer {
    pub fn new(defaults: NotificationDefaults) -> Self {
        Self { defaults }
    }

    /// Notification built from defaults only.
    pub fn default_notification(&self) -> Notification {
        let d = &self.defaults;
        Notification {
            title: d.title.clone(),
            body: d.body.clone(),
            icon: d.icon.clone(),
            badge: d.badge.clone(),
            tag: d.tag.clone(),
            image: None,
            data: Map::new(),
            vibrate: d.vibrate.clone(),
            require_interaction: d.require_interaction,
            renotify: true,
            silent: false,
            timestamp: 0,
            actions: d.actions.clone(),
        }
    }

    /// Normalize a push event. Never fails: anything unparseable degrades
    /// to defaults or to a plain-text body.
    pub fn normalize(&self, message: &PushMessage) -> Notification {
        let mut notification = self.default_notification();

        match message.payload.as_deref() {
            None => debug!(channel = ?message.channel, "Push without payload"),
            Some(raw) => match serde_json::from_slice::<JsonValue>(raw) {
                Ok(JsonValue::Object(object)) => {
                    self.merge_envelope(&mut notification, &object, message.channel)
                }
                Ok(JsonValue::String(text)) => {
                    set_if_present(&mut notification.body, Some(text.as_str()))
                }
                Ok(other) => {
                    debug!(channel = ?message.channel, kind = json_kind(&other), "Push JSON is not an object, using as text");
                    set_if_present(&mut notification.body, Some(String::from_utf8_lossy(raw).as_ref()));
                }
                Err(e) => {
                    debug!(channel = ?message.channel, error = %e, "Push payload is not JSON, using as text");
                    set_if_present(&mut notification.body, Some(String::from_utf8_lossy(raw).as_ref()));
                }
            },
        }

        self.finish(&mut notification);
        notification
    }

    fn merge_envelope(
        &self,
        notification: &mut Notification,
        envelope: &Map<String, JsonValue>,
        channel: PushChannel,
    ) {
        set_if_present(&mut notification.title, str_field(envelope, "title"));
        set_if_present(
            &mut notification.body,
            str_field(envelope, "body").or_else(|| str_field(envelope, "message")),
        );
        set_if_present(&mut notification.icon, str_field(envelope, "icon"));
        set_if_present(&mut notification.badge, str_field(envelope, "badge"));
        set_if_present(&mut notification.tag, str_field(envelope, "tag"));

        match envelope.get("data") {
            Some(JsonValue::Object(data)) => notification.data.extend(data.clone()),
            Some(JsonValue::Null) | None => {}
            Some(other) => warn!(kind = json_kind(other), "Ignoring non-object push data"),
        }
        if let Some(url) = str_field(envelope, "url") {
            notification
                .data
                .entry("url")
                .or_insert_with(|| JsonValue::String(url.to_string()));
        }

        // The nested shape wins, but only for the fields it actually sets.
        if let Some(JsonValue::Object(nested)) = envelope.get("notification") {
            set_if_present(&mut notification.title, str_field(nested, "title"));
            set_if_present(&mut notification.body, str_field(nested, "body"));
            set_if_present(&mut notification.icon, str_field(nested, "icon"));
            set_if_present(&mut notification.badge, str_field(nested, "badge"));
            set_if_present(&mut notification.tag, str_field(nested, "tag"));
            if let Some(JsonValue::Bool(flag)) = nested.get("requireInteraction") {
                notification.require_interaction = *flag;
            }
            if let Some(image) = str_field(nested, "image") {
                notification.image = Some(image.to_string());
            }
        }

        if channel == PushChannel::ManagedPush && notification.image.is_none() {
            notification.image = notification
                .data
                .get("icon")
                .and_then(JsonValue::as_str)
                .filter(|s| !s.is_empty())
                .map(String::from);
        }
    }

    fn finish(&self, notification: &mut Notification) {
        let now = now_millis();
        notification.timestamp = now;

        let data = &mut notification.data;
        let has_url = data
            .get("url")
            .and_then(JsonValue::as_str)
            .is_some_and(|s| !s.is_empty());
        if !has_url {
            data.insert("url".into(), JsonValue::String("/".into()));
        }
        data.insert("dateOfArrival".into(), JsonValue::from(now));
        data.insert(
            "source".into(),
            JsonValue::String(self.defaults.source.clone()),
        );
    }
}

fn str_field<'a>(object: &'a Map<String, JsonValue>, name: &str) -> Option<&'a str> {
    object.get(name).and_then(JsonValue::as_str)
}

/// Overwrite `slot` unless the candidate is missing or blank.
fn set_if_present(slot: &mut String, candidate: Option<&str>) {
    if let Some(value) = candidate.filter(|v| !v.trim().is_empty()) {
        *slot = value.to_string();
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

// ==================== Outbox ====================

/// Notifications that could not be rendered, waiting for a
/// `notification-flush` sync.
#[derive(Debug, Default)]
pub struct NotificationOutbox {
    queue: Mutex<VecDeque<Notification>>,
}

impl NotificationOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a notification for a later flush.
    pub async fn enqueue(&self, notification: Notification) {
        self.queue.lock().await.push_back(notification);
    }

    /// Take every queued notification, leaving the outbox empty.
    pub async fn drain(&self) -> Vec<Notification> {
        self.queue.lock().await.drain(..).collect()
    }

    /// Number of queued notifications.
    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }
}

/// Render a notification, retrying with capped exponential backoff.
pub async fn render_with_retry(
    center: &dyn NotificationCenter,
    notification: &Notification,
    retry: &RetryConfig,
) -> sapos_common::Result<()> {
    retry_with_backoff(retry, || center.show(notification)).await
}

/// Result of handling a push event.
#[derive(Debug, Clone, PartialEq)]
pub struct PushReport {
    /// What was (or will be) rendered.
    pub notification: Notification,
    /// Whether it reached the notification tray now.
    pub delivered: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> PushNormalizer {
        PushNormalizer::new(NotificationDefaults::default())
    }

    fn json_push(json: &str) -> PushMessage {
        PushMessage::with_payload(PushChannel::WebPush, json.to_string())
    }

    #[test]
    fn test_no_payload_uses_defaults() {
        let n = normalizer().normalize(&PushMessage::empty(PushChannel::WebPush));
        assert_eq!(n.title, "⚽ Sapos League");
        assert_eq!(n.body, "Nova atualização disponível!");
        assert_eq!(n.tag, "sapos-league");
        assert_eq!(n.url(), Some("/"));
        assert_eq!(n.vibrate, vec![200, 100, 200]);
        assert!(n.renotify);
    }

    #[test]
    fn test_nested_notification_overrides_top_level() {
        let n = normalizer().normalize(&json_push(
            r#"{"title":"Topo","body":"Corpo","notification":{"title":"Jogo Hoje","body":"A x B às 19:00"}}"#,
        ));
        assert_eq!(n.title, "Jogo Hoje");
        assert_eq!(n.body, "A x B às 19:00");
    }

    #[test]
    fn test_nested_wins_only_for_fields_it_sets() {
        let n = normalizer().normalize(&json_push(
            r#"{"icon":"/top.png","tag":"topo","notification":{"tag":"rodada"}}"#,
        ));
        assert_eq!(n.icon, "/top.png");
        assert_eq!(n.tag, "rodada");
    }

    #[test]
    fn test_top_level_fields_and_message_alias() {
        let n = normalizer().normalize(&json_push(r#"{"title":"Escalação","message":"Confira o time"}"#));
        assert_eq!(n.title, "Escalação");
        assert_eq!(n.body, "Confira o time");
    }

    #[test]
    fn test_data_is_merged_and_url_kept() {
        let n = normalizer().normalize(&json_push(
            r#"{"data":{"url":"/painel.html","type":"daily-game","gamesCount":"2"}}"#,
        ));
        assert_eq!(n.url(), Some("/painel.html"));
        assert_eq!(n.data["type"], "daily-game");
        assert_eq!(n.data["source"], "sapos-league-pwa");
        assert!(n.data.contains_key("dateOfArrival"));
    }

    #[test]
    fn test_top_level_url_fills_missing_data_url() {
        let n = normalizer().normalize(&json_push(r#"{"url":"/admin.html"}"#));
        assert_eq!(n.url(), Some("/admin.html"));

        let n = normalizer().normalize(&json_push(r#"{"url":"/admin.html","data":{"url":"/painel.html"}}"#));
        assert_eq!(n.url(), Some("/painel.html"));
    }

    #[test]
    fn test_plain_text_becomes_body() {
        let n = normalizer().normalize(&json_push("Treino cancelado"));
        assert_eq!(n.title, "⚽ Sapos League");
        assert_eq!(n.body, "Treino cancelado");
    }

    #[test]
    fn test_blank_fields_fall_back_to_defaults() {
        let n = normalizer().normalize(&json_push(r#"{"title":"","notification":{"body":"  "}}"#));
        assert_eq!(n.title, "⚽ Sapos League");
        assert_eq!(n.body, "Nova atualização disponível!");
    }

    #[test]
    fn test_wrongly_typed_fields_are_ignored() {
        let n = normalizer().normalize(&json_push(r#"{"title":7,"data":"x","notification":[]}"#));
        assert_eq!(n.title, "⚽ Sapos League");
        assert_eq!(n.url(), Some("/"));
    }

    #[test]
    fn test_managed_push_image_from_data_icon() {
        let message = PushMessage::with_payload(
            PushChannel::ManagedPush,
            r#"{"notification":{"title":"Rodada"},"data":{"icon":"/images/escudo.png"}}"#,
        );
        let n = normalizer().normalize(&message);
        assert_eq!(n.image.as_deref(), Some("/images/escudo.png"));

        let web = PushMessage {
            channel: PushChannel::WebPush,
            ..message
        };
        assert_eq!(normalizer().normalize(&web).image, None);
    }

    #[test]
    fn test_json_scalar_is_text() {
        let n = normalizer().normalize(&json_push("42"));
        assert_eq!(n.body, "42");
        let n = normalizer().normalize(&json_push(r#""Bom jogo""#));
        assert_eq!(n.body, "Bom jogo");
    }

    #[test]
    fn test_serializes_in_notification_api_shape() {
        let n = normalizer().normalize(&PushMessage::empty(PushChannel::WebPush));
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["requireInteraction"], false);
        assert_eq!(value["actions"][0]["action"], "view");
    }

    #[tokio::test]
    async fn test_outbox_drain_empties() {
        let outbox = NotificationOutbox::new();
        outbox.enqueue(Notification::default()).await;
        outbox.enqueue(Notification::default()).await;
        assert_eq!(outbox.drain().await.len(), 2);
        assert!(outbox.is_empty().await);
    }

    #[tokio::test]
    async fn test_render_retries_transient_failures() {
        use crate::platform::MemoryNotificationCenter;
        use std::time::Duration;

        let center = MemoryNotificationCenter::new();
        center.fail_next(2);
        let retry = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2.0,
            jitter: false,
        };
        render_with_retry(&center, &normalizer().default_notification(), &retry)
            .await
            .unwrap();
        assert_eq!(center.visible().len(), 1);

        center.fail_next(5);
        assert!(render_with_retry(&center, &Notification::default(), &retry)
            .await
            .is_err());
    }
}
