//! Track metadata resolution
//!
//! The engine never talks to a metadata provider directly. It receives
//! resolved tracks through a `TrackResolver`, which may return fewer tracks
//! than requested when some are unavailable.

use tracing::{debug, warn};

use crate::playlist::PlaylistTrack;
use crate::track::Track;

/// Clip length used when a playlist entry has no custom end
pub const DEFAULT_CLIP_SECONDS: u32 = 30;

/// Resolves playlist entries into playable tracks
#[async_trait::async_trait]
pub trait TrackResolver: Send + Sync {
    /// Resolve entries in order, silently dropping unavailable ones
    async fn resolve(&self, entries: &[PlaylistTrack]) -> Result<Vec<Track>, String>;
}

/// Resolver that builds tracks straight from playlist entries
///
/// Uses the first answer as the display name and derives embed and
/// thumbnail URLs from the video id. Needs no network access.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaylistTrackResolver;

impl PlaylistTrackResolver {
    fn track_from_entry(entry: &PlaylistTrack) -> Option<Track> {
        let video_id = entry.video_id.trim();
        if video_id.is_empty() {
            return None;
        }

        let start_seconds = entry.start_seconds.unwrap_or(0);
        let end_seconds = entry
            .end_seconds
            .filter(|end| *end > start_seconds)
            .unwrap_or(start_seconds.saturating_add(DEFAULT_CLIP_SECONDS));

        let name = entry
            .answers
            .first()
            .cloned()
            .unwrap_or_else(|| video_id.to_string());

        Some(Track {
            id: video_id.to_string(),
            name,
            artist: String::new(),
            answers: entry.answers.clone(),
            start_seconds,
            end_seconds,
            duration: end_seconds,
            embed_url: format!("https://www.youtube.com/embed/{}", video_id),
            thumbnail_url: Some(format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", video_id)),
            hints: entry.hints.clone(),
        })
    }
}

#[async_trait::async_trait]
impl TrackResolver for PlaylistTrackResolver {
    async fn resolve(&self, entries: &[PlaylistTrack]) -> Result<Vec<Track>, String> {
        let tracks: Vec<Track> = entries.iter().filter_map(Self::track_from_entry).collect();

        let dropped = entries.len() - tracks.len();
        if dropped > 0 {
            warn!("{} playlist entries could not be resolved", dropped);
        }
        debug!("Resolved {} tracks", tracks.len());

        Ok(tracks)
    }
}
