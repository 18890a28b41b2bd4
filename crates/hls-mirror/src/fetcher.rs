// Origin fetcher: raw GETs against the source media server.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::trace;
use url::Url;

use crate::config::OriginConfig;
use crate::error::{MirrorError, Result};

#[async_trait]
pub trait OriginFetcher: Send + Sync {
    /// Single GET; any non-success status is an error carrying the response body.
    async fn fetch(&self, url: &Url) -> Result<Bytes>;
}

pub struct HttpOrigin {
    client: Client,
}

impl HttpOrigin {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OriginFetcher for HttpOrigin {
    async fn fetch(&self, url: &Url) -> Result<Bytes> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MirrorError::http_status(
                status,
                redact(url),
                "fetch",
                &body,
            ));
        }
        let bytes = response.bytes().await?;
        trace!(url = %redact(url), len = bytes.len(), "Fetched origin resource");
        Ok(bytes)
    }
}

/// Builds fully-qualified origin URLs of the form
/// `{scheme}://{user}:{pass}@{host}/hls/{path}/{resource}`.
#[derive(Debug, Clone)]
pub struct OriginEndpoint {
    root: Url,
}

impl OriginEndpoint {
    pub fn new(scheme: &str, host: &str, username: &str, password: &str) -> Result<Self> {
        let input = format!("{scheme}://{host}/hls/");
        let mut root =
            Url::parse(&input).map_err(|e| MirrorError::invalid_url(&input, e.to_string()))?;
        if !username.is_empty() {
            root.set_username(username)
                .map_err(|_| MirrorError::invalid_url(&input, "cannot carry credentials"))?;
            root.set_password(Some(password))
                .map_err(|_| MirrorError::invalid_url(&input, "cannot carry credentials"))?;
        }
        Ok(Self { root })
    }

    pub fn from_config(config: &OriginConfig) -> Result<Self> {
        Self::new(
            config.scheme(),
            &config.hostname,
            &config.username,
            &config.password,
        )
    }

    /// Directory URL holding every resource of `stream_path`.
    pub fn stream_base(&self, stream_path: &str) -> Result<Url> {
        let relative = format!("{}/", stream_path.trim_matches('/'));
        self.root
            .join(&relative)
            .map_err(|e| MirrorError::invalid_url(relative, e.to_string()))
    }

    /// Resolves a playlist, init or segment reference against the stream directory.
    /// Absolute references are returned unchanged.
    pub fn resource_url(&self, stream_path: &str, resource: &str) -> Result<Url> {
        self.stream_base(stream_path)?
            .join(resource)
            .map_err(|e| MirrorError::invalid_url(resource, e.to_string()))
    }
}

/// Strips credentials from a URL before it reaches logs or error values.
pub fn redact(url: &Url) -> String {
    if url.username().is_empty() && url.password().is_none() {
        return url.to_string();
    }
    let mut clean = url.clone();
    let _ = clean.set_username("");
    let _ = clean.set_password(None);
    clean.to_string()
}
