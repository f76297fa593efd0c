//! Request and response types that flow through the fetch path.

use bytes::Bytes;
use hashbrown::HashMap;
use http::Method;
use serde::de::DeserializeOwned;
use url::Url;

/// An intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Request URL.
    pub url: Url,

    /// Request method.
    pub method: Method,

    /// Request headers.
    pub headers: HashMap<String, String>,

    /// Client ID of the page that issued the request.
    pub client_id: Option<String>,

    /// Is navigation request (top-level page load).
    pub is_navigation: bool,
}

impl FetchRequest {
    /// Create a subresource GET request.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HashMap::new(),
            client_id: None,
            is_navigation: false,
        }
    }

    /// Create a navigation GET request.
    pub fn navigate(url: Url) -> Self {
        Self {
            is_navigation: true,
            ..Self::get(url)
        }
    }

    /// Override the method.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Set the issuing client.
    pub fn from_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

/// A captured HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Final response URL.
    pub url: Url,

    /// Status code.
    pub status: u16,

    /// Status text.
    pub status_text: String,

    /// Response headers (lowercase names).
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Bytes,

    /// Whether served from a named cache.
    pub from_cache: bool,
}

impl Response {
    /// Create a response with an empty header set.
    pub fn new(url: Url, status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            status_text: reason_phrase(status).to_string(),
            headers: HashMap::new(),
            body: body.into(),
            from_cache: false,
        }
    }

    /// Create a `text/html` response.
    pub fn html(url: Url, body: impl Into<Bytes>) -> Self {
        Self::new(url, 200, body).with_header("content-type", "text/html; charset=utf-8")
    }

    /// Add a header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Check if the status is 2xx.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Get a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    /// Get the body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Get the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Mark the response as served from cache.
    pub(crate) fn into_cached(mut self) -> Self {
        self.from_cache = true;
        self
    }
}

/// Where the runtime got the response it handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// A named cache.
    Cache,
    /// The network, through a caching strategy.
    Network,
    /// The offline fallback page.
    OfflinePage,
    /// The network, without any caching strategy.
    Passthrough,
}

fn reason_phrase(status: u16) -> &'static str {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}
