// Discovery client: lists the live HLS muxers on the source media server.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::OriginConfig;
use crate::error::{MirrorError, Result};
use crate::model::StreamDescriptor;

pub const LIST_ENDPOINT: &str = "mediamtx/v3/hlsmuxers/list";

#[async_trait]
pub trait StreamDiscovery: Send + Sync {
    /// Current set of live streams. An error means "unknown", never "none".
    async fn discover(&self) -> Result<Vec<StreamDescriptor>>;
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    items: Vec<StreamDescriptor>,
}

pub struct HttpDiscovery {
    client: Client,
    url: Url,
    username: String,
    password: String,
}

impl HttpDiscovery {
    pub fn new(
        client: Client,
        scheme: &str,
        host: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let input = format!("{scheme}://{host}/{LIST_ENDPOINT}");
        let url = Url::parse(&input).map_err(|e| MirrorError::invalid_url(&input, e.to_string()))?;
        Ok(Self {
            client,
            url,
            username: username.into(),
            password: password.into(),
        })
    }

    pub fn from_config(client: Client, config: &OriginConfig) -> Result<Self> {
        Self::new(
            client,
            config.scheme(),
            &config.hostname,
            config.username.clone(),
            config.password.clone(),
        )
    }
}

#[async_trait]
impl StreamDiscovery for HttpDiscovery {
    async fn discover(&self) -> Result<Vec<StreamDescriptor>> {
        let response = self
            .client
            .get(self.url.clone())
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MirrorError::http_status(
                status,
                self.url.as_str(),
                "discovery",
                &body,
            ));
        }

        let body = response.bytes().await?;
        let list: ListResponse = serde_json::from_slice(&body)
            .map_err(|e| MirrorError::discovery(format!("malformed list response: {e}")))?;
        debug!(count = list.items.len(), "Discovered live streams");
        Ok(list.items)
    }
}
