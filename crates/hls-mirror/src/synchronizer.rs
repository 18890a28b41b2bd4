//! Per-stream synchronizer.
//!
//! Each tracked stream gets one task. Inside it every sub-feed runs its own
//! polling loop on a fixed interval and, only when the playlist bytes change,
//! dispatches the new artifacts to the sink:
//!
//! - first successful parse of a sub-feed: init segment, every listed segment
//!   oldest first, playlist
//! - later changes: the newest segment and the playlist
//!
//! Forwards run as detached tasks on a per-stream [`TaskTracker`], so a slow
//! origin or sink never holds back the next poll. A failed forward marks its
//! sub-feed for reseeding and the next poll handles it as a first sync.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, trace, warn};
use url::Url;

use crate::error::{MirrorError, Result};
use crate::fetcher::{OriginEndpoint, OriginFetcher, redact};
use crate::model::{StreamDescriptor, SubFeed, mirror_resource};
use crate::playlist::Playlist;
use crate::registry::{Assignment, StreamRegistry};
use crate::retry::{RetryPolicy, with_retries};
use crate::sink::SinkForwarder;

/// Collaborators and settings shared by every synchronizer.
pub struct SyncContext {
    pub origin: Arc<dyn OriginFetcher>,
    pub sink: Arc<dyn SinkForwarder>,
    pub endpoint: OriginEndpoint,
    pub feeds: Arc<[SubFeed]>,
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

/// What one poll did for one sub-feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Playlist bytes identical to the last accepted ones.
    Unchanged,
    FetchFailed,
    ParseFailed,
    /// Parsed to a multivariant playlist, which is not mirrored.
    Ignored,
    /// Forwards dispatched for a changed media playlist.
    Forwarded { init: bool, segments: usize },
}

#[derive(Debug)]
struct FeedState {
    feed: SubFeed,
    last_playlist: Option<Bytes>,
    /// Raised by a failed forward.
    reseed: Arc<AtomicBool>,
}

/// Stream-wide handles a sub-feed poll and its forward tasks work with.
#[derive(Clone)]
struct StreamLink {
    ctx: Arc<SyncContext>,
    stream_path: Arc<str>,
    mirror_path: Arc<str>,
    token: CancellationToken,
    forwards: TaskTracker,
}

pub struct StreamSynchronizer {
    descriptor: StreamDescriptor,
    generation: u64,
    registry: Arc<StreamRegistry>,
    link: StreamLink,
    feeds: Vec<FeedState>,
}

impl StreamSynchronizer {
    pub fn new(
        assignment: Assignment,
        ctx: Arc<SyncContext>,
        registry: Arc<StreamRegistry>,
    ) -> Self {
        let feeds = ctx
            .feeds
            .iter()
            .cloned()
            .map(|feed| FeedState {
                feed,
                last_playlist: None,
                reseed: Arc::new(AtomicBool::new(false)),
            })
            .collect();
        let link = StreamLink {
            stream_path: assignment.descriptor.path.as_str().into(),
            mirror_path: assignment.descriptor.mirror_path().into(),
            token: assignment.token,
            forwards: TaskTracker::new(),
            ctx,
        };
        Self {
            descriptor: assignment.descriptor,
            generation: assignment.generation,
            registry,
            link,
            feeds,
        }
    }

    /// Starts the synchronizer on the runtime.
    pub fn spawn(
        assignment: Assignment,
        ctx: Arc<SyncContext>,
        registry: Arc<StreamRegistry>,
    ) -> JoinHandle<()> {
        let span = info_span!("stream", path = %assignment.descriptor.path);
        let synchronizer = Self::new(assignment, ctx, registry);
        tokio::spawn(synchronizer.run().instrument(span))
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    /// Playlist bytes last accepted for `feed`.
    pub fn last_playlist(&self, feed: &str) -> Option<&Bytes> {
        self.feeds
            .iter()
            .find(|s| s.feed.name == feed)
            .and_then(|s| s.last_playlist.as_ref())
    }

    /// Polls every sub-feed on its own interval until the stream is cancelled or
    /// untracked, then waits for the forwards already dispatched.
    pub async fn run(self) {
        let Self {
            descriptor,
            generation,
            registry,
            link,
            mut feeds,
        } = self;
        info!(mirror = %link.mirror_path, feeds = feeds.len(), "Synchronizer started");

        let is_live =
            || !link.token.is_cancelled() && registry.is_live(&descriptor.path, generation);
        join_all(feeds.iter_mut().map(|state| link.poll_loop(state, &is_live))).await;

        link.forwards.close();
        if !link.forwards.is_empty() {
            debug!(pending = link.forwards.len(), "Waiting for in-flight forwards");
        }
        link.forwards.wait().await;
        info!("Synchronizer stopped");
    }

    /// Runs one poll of every sub-feed concurrently. Forwards are dispatched,
    /// not awaited; see [`settle`](Self::settle).
    pub async fn sync_once(&mut self) -> Vec<FeedOutcome> {
        let link = &self.link;
        join_all(self.feeds.iter_mut().map(|state| link.sync_feed(state))).await
    }

    /// Waits until every forward dispatched so far has finished.
    pub async fn settle(&self) {
        let forwards = &self.link.forwards;
        forwards.close();
        forwards.wait().await;
        forwards.reopen();
    }
}

impl StreamLink {
    async fn poll_loop(&self, state: &mut FeedState, is_live: &impl Fn() -> bool) {
        let mut ticker = tokio::time::interval(self.ctx.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !is_live() {
                break;
            }
            self.sync_feed(state).await;
        }
    }

    async fn sync_feed(&self, state: &mut FeedState) -> FeedOutcome {
        if state.reseed.swap(false, Ordering::AcqRel) && state.last_playlist.take().is_some() {
            info!(feed = %state.feed.name, "Reseeding after a failed forward");
        }

        let feed = state.feed.name.as_str();
        let playlist_url = match self
            .ctx
            .endpoint
            .resource_url(&self.stream_path, &state.feed.playlist)
        {
            Ok(url) => url,
            Err(e) => {
                warn!(feed = %feed, error = %e, "Cannot build playlist URL");
                return FeedOutcome::FetchFailed;
            }
        };

        let bytes = match self.fetch(&playlist_url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    feed = %feed,
                    url = %redact(&playlist_url),
                    error = %e,
                    "Playlist fetch failed"
                );
                return FeedOutcome::FetchFailed;
            }
        };

        if state.last_playlist.as_deref() == Some(bytes.as_ref()) {
            trace!(feed = %feed, "Playlist unchanged");
            return FeedOutcome::Unchanged;
        }

        let media = match Playlist::parse(&bytes) {
            Ok(Playlist::Media(media)) => media,
            Ok(Playlist::Multivariant(_)) => {
                debug!(feed = %feed, "Multivariant playlist, nothing to mirror");
                return FeedOutcome::Ignored;
            }
            Err(e) => {
                warn!(feed = %feed, error = %e, "Discarding malformed playlist");
                return FeedOutcome::ParseFailed;
            }
        };

        let first_sync = state.last_playlist.is_none();
        let init = media.init_segment.as_deref().filter(|_| first_sync);
        let segments: Vec<&str> = if first_sync {
            media.segments.iter().map(|s| s.uri.as_str()).collect()
        } else {
            media
                .newest_segment()
                .map(|s| s.uri.as_str())
                .into_iter()
                .collect()
        };

        for uri in init.into_iter().chain(segments.iter().copied()) {
            self.dispatch_artifact(feed, uri, &state.reseed);
        }
        let playlist_path = format!("{}/{}", self.mirror_path, state.feed.mirror_playlist);
        self.dispatch_playlist(feed, playlist_path, bytes.clone(), &state.reseed);

        if first_sync {
            info!(feed = %feed, segments = segments.len(), init = init.is_some(), "Seeding mirror");
        }
        let outcome = FeedOutcome::Forwarded {
            init: init.is_some(),
            segments: segments.len(),
        };
        state.last_playlist = Some(bytes);
        outcome
    }

    fn dispatch_artifact(&self, feed: &str, uri: &str, reseed: &Arc<AtomicBool>) {
        let link = self.clone();
        let feed = feed.to_string();
        let uri = uri.to_string();
        let reseed = reseed.clone();
        self.forwards.spawn(
            async move {
                info!(feed = %feed, segment = %uri, "Saving segment");
                if let Err(e) = link.forward_artifact(&uri).await {
                    warn!(feed = %feed, segment = %uri, error = %e, "Segment forward failed");
                    reseed.store(true, Ordering::Release);
                }
            }
            .in_current_span(),
        );
    }

    fn dispatch_playlist(&self, feed: &str, path: String, body: Bytes, reseed: &Arc<AtomicBool>) {
        let link = self.clone();
        let feed = feed.to_string();
        let reseed = reseed.clone();
        self.forwards.spawn(
            async move {
                if let Err(e) = link.push(&path, body).await {
                    warn!(feed = %feed, path = %path, error = %e, "Playlist push failed");
                    reseed.store(true, Ordering::Release);
                }
            }
            .in_current_span(),
        );
    }

    /// Copies one init or media segment from the origin to the sink.
    async fn forward_artifact(&self, uri: &str) -> Result<()> {
        let name = mirror_resource(uri)
            .ok_or_else(|| MirrorError::invalid_url(uri, "no resource name to mirror under"))?;
        let url = self.ctx.endpoint.resource_url(&self.stream_path, uri)?;
        let body = self.fetch(&url).await?;
        self.push(&format!("{}/{name}", self.mirror_path), body).await
    }

    async fn fetch(&self, url: &Url) -> Result<Bytes> {
        let origin = &self.ctx.origin;
        with_retries(&self.ctx.retry, &self.token, "fetch", || origin.fetch(url)).await
    }

    async fn push(&self, path: &str, body: Bytes) -> Result<()> {
        let sink = &self.ctx.sink;
        with_retries(&self.ctx.retry, &self.token, "push", || {
            sink.push(path, body.clone())
        })
        .await
    }
}
