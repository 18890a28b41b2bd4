use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{MirrorError, Result};
use crate::model::SubFeed;
use crate::retry::RetryPolicy;

pub const DEFAULT_DISCOVERY_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 300;
pub const DEFAULT_USER_AGENT: &str = concat!("hls-mirror/", env!("CARGO_PKG_VERSION"));

/// Top-level daemon configuration, read once at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorConfig {
    /// Downstream cache service receiving mirrored artifacts.
    pub redis: SinkConfig,
    /// Source media server.
    pub ingest: OriginConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkConfig {
    pub hostname: String,
    #[serde(default)]
    pub auth_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginConfig {
    #[serde(default)]
    pub use_https: bool,
    pub hostname: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Legacy location of the sink bearer token.
    #[serde(default)]
    pub auth_key: String,
}

impl OriginConfig {
    pub fn scheme(&self) -> &'static str {
        if self.use_https { "https" } else { "http" }
    }
}

/// How a stream is split into independently polled sub-feeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    /// One muxed playlist per stream.
    #[default]
    Combined,
    /// Separate video and audio playlists.
    Split,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedConfig {
    pub name: String,
    pub playlist: String,
    #[serde(default)]
    pub mirror_playlist: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub discovery_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub feed_mode: FeedMode,
    /// Explicit sub-feed list; overrides `feed_mode` when present.
    pub feeds: Option<Vec<FeedConfig>>,
    pub retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            discovery_interval_ms: DEFAULT_DISCOVERY_INTERVAL_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            feed_mode: FeedMode::Combined,
            feeds: None,
            retry: RetryConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Resolves the sub-feeds every synchronizer iterates over.
    pub fn sub_feeds(&self) -> Vec<SubFeed> {
        if let Some(feeds) = &self.feeds {
            return feeds
                .iter()
                .map(|f| {
                    SubFeed::new(
                        f.name.clone(),
                        f.playlist.clone(),
                        f.mirror_playlist.clone().unwrap_or_else(|| f.playlist.clone()),
                    )
                })
                .collect();
        }
        match self.feed_mode {
            FeedMode::Combined => vec![SubFeed::new("main", "stream.m3u8", "index.m3u8")],
            FeedMode::Split => vec![
                SubFeed::new("video", "video.m3u8", "video.m3u8"),
                SubFeed::new("audio", "audio.m3u8", "audio.m3u8"),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// In-cycle retries on transient failures. Zero leaves retrying to the next poll.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 200,
            max_delay_ms: 2000,
            jitter: true,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpConfig {
    /// Overall request timeout; zero disables it.
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl MirrorConfig {
    /// Reads, parses and validates the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        validate_config_path(path)?;
        let raw = std::fs::read(path)?;
        let config: MirrorConfig = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ingest.hostname.trim().is_empty() {
            return Err(MirrorError::configuration("ingest.hostname must not be empty"));
        }
        if self.redis.hostname.trim().is_empty() {
            return Err(MirrorError::configuration("redis.hostname must not be empty"));
        }
        if self.sink_token().is_empty() {
            return Err(MirrorError::configuration(
                "a sink token is required in redis.authKey or ingest.authKey",
            ));
        }
        if self.sync.discovery_interval_ms == 0 || self.sync.poll_interval_ms == 0 {
            return Err(MirrorError::configuration(
                "discovery and poll intervals must be greater than zero",
            ));
        }

        let feeds = self.sync.sub_feeds();
        if feeds.is_empty() {
            return Err(MirrorError::configuration("at least one feed is required"));
        }
        let mut names = HashSet::new();
        for feed in &feeds {
            if feed.name.is_empty() || feed.playlist.is_empty() {
                return Err(MirrorError::configuration(
                    "feed name and playlist must not be empty",
                ));
            }
            if !names.insert(feed.name.as_str()) {
                return Err(MirrorError::configuration(format!(
                    "duplicate feed name `{}`",
                    feed.name
                )));
            }
        }
        Ok(())
    }

    /// Bearer token for the sink, preferring `redis.authKey`.
    pub fn sink_token(&self) -> &str {
        if self.redis.auth_key.is_empty() {
            &self.ingest.auth_key
        } else {
            &self.redis.auth_key
        }
    }
}

/// Rejects paths that do not exist or point at a directory.
pub fn validate_config_path(path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path)?;
    if meta.is_dir() {
        return Err(MirrorError::configuration(format!(
            "'{}' is a directory, not a normal file",
            path.display()
        )));
    }
    Ok(())
}
