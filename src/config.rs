//! Server configuration
//!
//! Read once at startup from environment variables, with the first command
//! line argument taking precedence for the bind address.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Default playlist document
pub const DEFAULT_PLAYLIST_FILE: &str = "data/playlists.json";

/// Delay between the last submission of a round and its automatic end
pub const AUTO_END_DELAY: Duration = Duration::from_secs(2);

/// Upper bound on track resolution before a game start is rolled back
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub addr: String,
    pub playlist_file: PathBuf,
    /// Playlist for rooms created without one
    pub default_playlist: String,
    pub auto_end_delay: Duration,
    pub resolve_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            playlist_file: PathBuf::from(DEFAULT_PLAYLIST_FILE),
            default_playlist: "default".to_string(),
            auto_end_delay: AUTO_END_DELAY,
            resolve_timeout: RESOLVE_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Build from `MUSIC_QUIZ_*` variables and the command line
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok(), env::args().nth(1))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>, addr_arg: Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            addr: addr_arg
                .or_else(|| lookup("MUSIC_QUIZ_ADDR"))
                .unwrap_or(defaults.addr),
            playlist_file: lookup("MUSIC_QUIZ_PLAYLISTS")
                .map(PathBuf::from)
                .unwrap_or(defaults.playlist_file),
            default_playlist: lookup("MUSIC_QUIZ_DEFAULT_PLAYLIST")
                .unwrap_or(defaults.default_playlist),
            auto_end_delay: defaults.auto_end_delay,
            resolve_timeout: defaults.resolve_timeout,
        }
    }
}
