//! Playlist definitions and the read-only playlist store
//!
//! Playlists are documents keyed by id. The game only reads them at game
//! start; editing them is out of scope for the server.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::track::Hint;

/// One entry of a playlist, before metadata resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistTrack {
    /// Opaque video identifier
    pub video_id: String,
    #[serde(default)]
    pub answers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<Hint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_seconds: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tracks: Vec<PlaylistTrack>,
    /// Rounds per game; defaults to the track count
    #[serde(default)]
    pub round_count: Option<u32>,
}

impl Playlist {
    pub fn round_count(&self) -> u32 {
        self.round_count.unwrap_or(self.tracks.len() as u32)
    }

    pub fn summary(&self) -> PlaylistSummary {
        PlaylistSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            round_count: self.round_count(),
        }
    }
}

/// Listing entry sent to clients choosing a playlist
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub round_count: u32,
}

/// Errors from loading a playlist file
#[derive(Debug, Error)]
pub enum PlaylistStoreError {
    #[error("failed to read playlist file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid playlist file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read access to playlist documents
pub trait PlaylistStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Playlist>;

    fn list(&self) -> Vec<PlaylistSummary>;
}

/// Playlists held in memory, ordered by id
#[derive(Debug, Default, Clone)]
pub struct MemoryPlaylistStore {
    playlists: BTreeMap<String, Playlist>,
}

impl MemoryPlaylistStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, playlist: Playlist) {
        self.playlists.insert(playlist.id.clone(), playlist);
    }

    pub fn with(mut self, playlist: Playlist) -> Self {
        self.insert(playlist);
        self
    }

    pub fn len(&self) -> usize {
        self.playlists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.playlists.is_empty()
    }
}

impl PlaylistStore for MemoryPlaylistStore {
    fn get(&self, id: &str) -> Option<Playlist> {
        self.playlists.get(id).cloned()
    }

    fn list(&self) -> Vec<PlaylistSummary> {
        self.playlists.values().map(Playlist::summary).collect()
    }
}

/// Playlist store backed by a JSON document keyed by playlist id
///
/// Entries without a `tracks` array are skipped with a warning.
#[derive(Debug, Default, Clone)]
pub struct JsonPlaylistStore {
    inner: MemoryPlaylistStore,
}

impl JsonPlaylistStore {
    /// Load playlists from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PlaylistStoreError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let store = Self::from_json(&content)?;
        info!(
            "Loaded {} playlists from {}",
            store.inner.len(),
            path.display()
        );
        Ok(store)
    }

    /// Load playlists, starting empty if the file is missing or unreadable
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(store) => store,
            Err(e) => {
                warn!("Starting with no playlists ({}): {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parse a playlist document
    pub fn from_json(content: &str) -> Result<Self, PlaylistStoreError> {
        let document: BTreeMap<String, Value> = serde_json::from_str(content)?;
        let mut inner = MemoryPlaylistStore::new();

        for (key, value) in document {
            if !value.get("tracks").is_some_and(Value::is_array) {
                warn!("Skipping playlist '{}': tracks is not an array", key);
                continue;
            }

            match serde_json::from_value::<Playlist>(value) {
                Ok(mut playlist) => {
                    if playlist.id.is_empty() {
                        playlist.id = key;
                    }
                    inner.insert(playlist);
                }
                Err(e) => warn!("Skipping playlist '{}': {}", key, e),
            }
        }

        Ok(Self { inner })
    }
}

impl PlaylistStore for JsonPlaylistStore {
    fn get(&self, id: &str) -> Option<Playlist> {
        self.inner.get(id)
    }

    fn list(&self) -> Vec<PlaylistSummary> {
        self.inner.list()
    }
}

#[cfg(test)]
pub(crate) fn sample_playlist(id: &str, video_ids: &[&str], round_count: Option<u32>) -> Playlist {
    Playlist {
        id: id.to_string(),
        name: format!("Playlist {}", id),
        description: String::new(),
        tracks: video_ids
            .iter()
            .map(|v| PlaylistTrack {
                video_id: v.to_string(),
                answers: vec![format!("Song {}", v)],
                hints: Vec::new(),
                start_seconds: None,
                end_seconds: None,
            })
            .collect(),
        round_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const DOCUMENT: &str = r#"{
        "kpop": {
            "name": "K-Pop",
            "description": "Hits",
            "tracks": [
                {"videoId": "gdZLi9oWNZg", "answers": ["Dynamite", "다이너마이트"]},
                {"videoId": "WMweEpGlu_U", "answers": ["Butter"],
                 "hints": [{"showAtSeconds": 10, "text": "BTS"}],
                 "startSeconds": 40, "endSeconds": 70}
            ],
            "roundCount": 5
        },
        "broken": {"name": "Broken", "tracks": "nope"},
        "short": {"id": "short", "name": "Short", "tracks": []}
    }"#;

    #[test]
    fn test_parse_document() {
        let store = JsonPlaylistStore::from_json(DOCUMENT).unwrap();

        let kpop = store.get("kpop").unwrap();
        assert_eq!(kpop.id, "kpop");
        assert_eq!(kpop.tracks.len(), 2);
        assert_eq!(kpop.round_count(), 5);
        assert_eq!(kpop.tracks[1].start_seconds, Some(40));
        assert_eq!(kpop.tracks[1].hints[0].text, "BTS");

        assert!(store.get("broken").is_none());
        assert_eq!(store.get("short").unwrap().round_count(), 0);
    }

    #[test]
    fn test_list_summaries() {
        let store = JsonPlaylistStore::from_json(DOCUMENT).unwrap();
        let ids: Vec<String> = store.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["kpop".to_string(), "short".to_string()]);
    }

    #[test]
    fn test_round_count_defaults_to_track_count() {
        let playlist = sample_playlist("p", &["a", "b", "c"], None);
        assert_eq!(playlist.round_count(), 3);
    }

    #[test]
    fn test_load_from_file() {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(err) => panic!("tempdir failed: {err}"),
        };
        let path = dir.path().join("playlists.json");
        assert!(fs::write(&path, DOCUMENT).is_ok());

        let store = JsonPlaylistStore::load(&path).unwrap();
        assert!(store.get("kpop").is_some());
    }

    #[test]
    fn test_load_invalid_json_fails() {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(err) => panic!("tempdir failed: {err}"),
        };
        let path = dir.path().join("playlists.json");
        assert!(fs::write(&path, "not json").is_ok());

        assert!(matches!(
            JsonPlaylistStore::load(&path),
            Err(PlaylistStoreError::Json(_))
        ));
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let store = JsonPlaylistStore::load_or_empty("/definitely/not/here.json");
        assert!(store.list().is_empty());
    }
}
