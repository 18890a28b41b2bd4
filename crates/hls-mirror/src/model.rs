//! Plain data shared by discovery, the registry and the synchronizers.

use serde::Deserialize;

/// Namespace marker used by the live-ingest side.
pub const LIVE_NAMESPACE: &str = "live/";
/// Namespace marker the mirrored copy is stored under.
pub const MIRROR_NAMESPACE: &str = "hls/";

/// A live stream as reported by discovery. Identity is the path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct StreamDescriptor {
    pub path: String,
}

impl StreamDescriptor {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Path under which this stream's artifacts are stored on the sink.
    pub fn mirror_path(&self) -> String {
        mirror_path(&self.path)
    }
}

/// One independently polled playlist of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubFeed {
    pub name: String,
    /// Playlist resource fetched from the origin.
    pub playlist: String,
    /// Resource name the playlist is stored under on the sink.
    pub mirror_playlist: String,
}

impl SubFeed {
    pub fn new(
        name: impl Into<String>,
        playlist: impl Into<String>,
        mirror_playlist: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            playlist: playlist.into(),
            mirror_playlist: mirror_playlist.into(),
        }
    }
}

/// Translates a live-ingest path into its mirrored-storage path.
pub fn mirror_path(path: &str) -> String {
    path.replace(LIVE_NAMESPACE, MIRROR_NAMESPACE)
}

/// Resource name a segment URI is stored under on the sink, relative to the
/// stream's mirror directory.
///
/// Plain relative URIs keep their path. Absolute URIs and paths that could climb
/// out of the mirror directory (`..`, `.`, empty or leading `/` segments) keep
/// only their last path component. `None` when no usable name remains.
pub fn mirror_resource(uri: &str) -> Option<&str> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    if let Some((_, rest)) = path.split_once("://") {
        return last_component(rest.find('/').map_or("", |i| &rest[i..]));
    }
    if path.split('/').all(is_plain_segment) {
        return Some(path);
    }
    last_component(path)
}

fn is_plain_segment(part: &str) -> bool {
    !matches!(part, "" | "." | "..")
}

fn last_component(path: &str) -> Option<&str> {
    path.rsplit('/').find(|part| is_plain_segment(part))
}
