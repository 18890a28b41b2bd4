//! Wires the HTTP adapters, registry, synchronizers and reconciliation loop together.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{HttpConfig, MirrorConfig};
use crate::discovery::{HttpDiscovery, StreamDiscovery};
use crate::error::Result;
use crate::fetcher::{HttpOrigin, OriginEndpoint, OriginFetcher};
use crate::reconciler::Reconciler;
use crate::registry::StreamRegistry;
use crate::retry::RetryPolicy;
use crate::sink::{HttpSink, SinkForwarder};
use crate::synchronizer::SyncContext;

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Builds the HTTP client shared by discovery, origin and sink.
pub fn build_http_client(config: &HttpConfig) -> Result<Client> {
    install_rustls_provider();
    let mut builder = Client::builder()
        .user_agent(config.user_agent.clone())
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs));
    if config.timeout_secs > 0 {
        builder = builder.timeout(Duration::from_secs(config.timeout_secs));
    }
    Ok(builder.build()?)
}

pub struct MirrorService {
    reconciler: Reconciler,
}

impl MirrorService {
    pub fn from_config(config: &MirrorConfig, token: CancellationToken) -> Result<Self> {
        let client = build_http_client(&config.http)?;
        let discovery = Arc::new(HttpDiscovery::from_config(client.clone(), &config.ingest)?);
        let origin = Arc::new(HttpOrigin::new(client.clone()));
        let sink = Arc::new(HttpSink::new(
            client,
            &config.redis.hostname,
            config.sink_token(),
        )?);
        let endpoint = OriginEndpoint::from_config(&config.ingest)?;
        let ctx = sync_context(origin, sink, endpoint, config);

        info!(
            origin = %config.ingest.hostname,
            sink = %config.redis.hostname,
            feeds = ctx.feeds.len(),
            discovery_interval_ms = config.sync.discovery_interval_ms,
            poll_interval_ms = config.sync.poll_interval_ms,
            "Mirror service configured"
        );
        Ok(Self::with_components(
            discovery,
            ctx,
            config.sync.discovery_interval(),
            token,
        ))
    }

    /// Assembles a service from arbitrary adapters.
    pub fn with_components(
        discovery: Arc<dyn StreamDiscovery>,
        ctx: SyncContext,
        discovery_interval: Duration,
        token: CancellationToken,
    ) -> Self {
        let reconciler = Reconciler::new(
            discovery,
            Arc::new(StreamRegistry::new()),
            Arc::new(ctx),
            discovery_interval,
            token,
        );
        Self { reconciler }
    }

    pub fn registry(&self) -> Arc<StreamRegistry> {
        self.reconciler.registry().clone()
    }

    /// Runs until the service token is cancelled and every synchronizer has stopped.
    pub async fn run(self) {
        info!("Mirror service started");
        self.reconciler.run().await;
        info!("Mirror service stopped");
    }
}

/// Synchronizer settings from `config` around the given adapters.
pub fn sync_context(
    origin: Arc<dyn OriginFetcher>,
    sink: Arc<dyn SinkForwarder>,
    endpoint: OriginEndpoint,
    config: &MirrorConfig,
) -> SyncContext {
    SyncContext {
        origin,
        sink,
        endpoint,
        feeds: config.sync.sub_feeds().into(),
        poll_interval: config.sync.poll_interval(),
        retry: RetryPolicy::from(&config.sync.retry),
    }
}
