//! Adapter over `m3u8-rs` exposing only what the synchronizer inspects.

use m3u8_rs::parse_playlist_res;

use crate::error::{MirrorError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Playlist {
    Media(MediaPlaylist),
    /// Index of sub-playlists; never mirrored segment by segment.
    Multivariant(MultivariantPlaylist),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaPlaylist {
    /// URI of the `EXT-X-MAP` initialization segment, if any.
    pub init_segment: Option<String>,
    /// Segments in playlist order, oldest first.
    pub segments: Vec<MediaSegment>,
    pub media_sequence: u64,
    pub end_list: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSegment {
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultivariantPlaylist {
    pub variants: Vec<String>,
}

impl MediaPlaylist {
    /// Most recently appended segment.
    pub fn newest_segment(&self) -> Option<&MediaSegment> {
        self.segments.last()
    }
}

impl Playlist {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        match parse_playlist_res(bytes) {
            Ok(m3u8_rs::Playlist::MediaPlaylist(pl)) => Ok(Playlist::Media(pl.into())),
            Ok(m3u8_rs::Playlist::MasterPlaylist(pl)) => {
                Ok(Playlist::Multivariant(MultivariantPlaylist {
                    variants: pl.variants.into_iter().map(|v| v.uri).collect(),
                }))
            }
            Err(e) => Err(MirrorError::parse(format!("failed to decode m3u8: {e}"))),
        }
    }
}

impl From<m3u8_rs::MediaPlaylist> for MediaPlaylist {
    fn from(pl: m3u8_rs::MediaPlaylist) -> Self {
        let init_segment = pl
            .segments
            .iter()
            .find_map(|s| s.map.as_ref().map(|m| m.uri.clone()))
            .or_else(|| playlist_level_map_uri(&pl));
        let segments = pl
            .segments
            .into_iter()
            .filter(|s| !s.uri.is_empty())
            .map(|s| MediaSegment { uri: s.uri })
            .collect();
        Self {
            init_segment,
            segments,
            media_sequence: pl.media_sequence,
            end_list: pl.end_list,
        }
    }
}

/// `EXT-X-MAP` with no following segment ends up among the unknown tags.
fn playlist_level_map_uri(pl: &m3u8_rs::MediaPlaylist) -> Option<String> {
    let ext = pl.unknown_tags.iter().rev().find(|t| t.tag == "X-MAP")?;
    let rest = ext.rest.as_deref()?;

    // Split on commas outside quotes.
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0usize;
    for (idx, ch) in rest.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(rest[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(rest[start..].trim());

    parts.into_iter().find_map(|part| {
        let (key, value) = part.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("URI") {
            return None;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(value);
        Some(value.to_string())
    })
}
