// Sink forwarder: raw POSTs into the downstream cache service.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tracing::trace;
use url::Url;

use crate::error::{MirrorError, Result};

#[async_trait]
pub trait SinkForwarder: Send + Sync {
    /// Stores `body` under `resource_path` (`{mirroredPath}/{resource}`).
    async fn push(&self, resource_path: &str, body: Bytes) -> Result<()>;
}

/// Posts to `http://{host}/{resource_path}` with a bearer credential.
pub struct HttpSink {
    client: Client,
    base: Url,
    token: String,
}

impl HttpSink {
    pub fn new(client: Client, host: &str, token: impl Into<String>) -> Result<Self> {
        let input = format!("http://{host}/");
        let base = Url::parse(&input).map_err(|e| MirrorError::invalid_url(input, e.to_string()))?;
        Ok(Self {
            client,
            base,
            token: token.into(),
        })
    }

    pub fn url_for(&self, resource_path: &str) -> Result<Url> {
        let relative = resource_path.trim_start_matches('/');
        self.base
            .join(relative)
            .map_err(|e| MirrorError::invalid_url(relative, e.to_string()))
    }
}

#[async_trait]
impl SinkForwarder for HttpSink {
    async fn push(&self, resource_path: &str, body: Bytes) -> Result<()> {
        let url = self.url_for(resource_path)?;
        let len = body.len();
        let response = self
            .client
            .post(url.clone())
            .bearer_auth(&self.token)
            .body(body)
            .send()
            .await?;

        // The cache service acknowledges stores with a plain 200.
        let status = response.status();
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return Err(MirrorError::http_status(status, url.as_str(), "push", &text));
        }
        trace!(url = %url, len, "Pushed resource to sink");
        Ok(())
    }
}
