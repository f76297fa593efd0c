//! [`Network`] over `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;
use reqwest::Client;
use sapos_common::{with_timeout, Result, SaposError};
use tracing::{debug, info, trace};

use crate::fetch::{FetchRequest, Response};
use crate::platform::Network;

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Deadline for a whole fetch, body included.
    pub timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("sapos-sw/", env!("CARGO_PKG_VERSION")).to_string(),
            accept_language: "pt-BR,pt;q=0.9,en;q=0.8".to_string(),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// Network backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: Client,
    config: NetworkConfig,
}

impl HttpNetwork {
    pub fn new(config: NetworkConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| SaposError::network_with_source("failed to build HTTP client", e))?;

        info!("HttpNetwork initialized");
        Ok(Self { client, config })
    }

    async fn send(&self, request: &FetchRequest) -> Result<Response> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .header("Accept-Language", &self.config.accept_language);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            SaposError::network_with_source(format!("failed to fetch {}", request.url), e)
        })?;

        let status = response.status();
        let url = response.url().clone();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response.bytes().await.map_err(|e| {
            SaposError::network_with_source(format!("failed to read body of {url}"), e)
        })?;
        trace!(%url, %status, body_len = body.len(), "Response received");

        let mut out = Response::new(url, status.as_u16(), body);
        out.headers = headers;
        Ok(out)
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<Response> {
        debug!(url = %request.url, method = %request.method, "Fetching");
        with_timeout(self.config.timeout, || self.send(request)).await?
    }
}
