//! Mirrors live HLS outputs of a media server into a downstream cache service.
//!
//! A [`Reconciler`] polls the server's muxer list and keeps exactly one
//! [`StreamSynchronizer`] per live stream. Each synchronizer polls its playlists
//! and forwards only what changed: the whole window plus the init segment on
//! first sight, then the newest segment whenever the playlist changes.

pub mod config;
pub mod discovery;
pub mod error;
pub mod fetcher;
pub mod model;
pub mod playlist;
pub mod reconciler;
pub mod registry;
pub mod retry;
pub mod service;
pub mod sink;
pub mod synchronizer;

pub use config::{FeedMode, HttpConfig, MirrorConfig};
pub use discovery::{HttpDiscovery, StreamDiscovery};
pub use error::{MirrorError, Result};
pub use fetcher::{HttpOrigin, OriginEndpoint, OriginFetcher};
pub use model::{StreamDescriptor, SubFeed, mirror_path};
pub use playlist::{MediaPlaylist, MediaSegment, Playlist};
pub use reconciler::{ReconcileReport, Reconciler};
pub use registry::StreamRegistry;
pub use retry::RetryPolicy;
pub use service::{MirrorService, build_http_client, install_rustls_provider};
pub use sink::{HttpSink, SinkForwarder};
pub use synchronizer::{FeedOutcome, StreamSynchronizer, SyncContext};
