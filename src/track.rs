//! Track value objects
//!
//! `Track` carries the answers and is only ever seen by the engine.
//! `TrackView` is the answer-stripped form broadcast while a round is open.

use serde::{Deserialize, Serialize};

/// Timed hint shown during a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub show_at_seconds: u32,
    pub text: String,
}

/// A playable track resolved from a playlist entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    /// Display name, the primary judged answer
    pub name: String,
    pub artist: String,
    /// Acceptable answers; empty means only `name` is accepted
    #[serde(default)]
    pub answers: Vec<String>,
    pub start_seconds: u32,
    pub end_seconds: u32,
    /// Total length of the source in seconds
    pub duration: u32,
    pub embed_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<Hint>,
}

impl Track {
    /// Answers to judge against, falling back to the display name
    pub fn acceptable_answers(&self) -> Vec<&str> {
        if self.answers.is_empty() {
            vec![self.name.as_str()]
        } else {
            self.answers.iter().map(String::as_str).collect()
        }
    }

    /// Strip everything that would give the answer away
    pub fn view(&self) -> TrackView {
        TrackView {
            id: self.id.clone(),
            embed_url: self.embed_url.clone(),
            start_seconds: self.start_seconds,
            end_seconds: self.end_seconds,
            duration: self.duration,
            thumbnail_url: self.thumbnail_url.clone(),
            hints: self.hints.clone(),
        }
    }
}

/// Track as shown to players before the answer is revealed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackView {
    pub id: String,
    pub embed_url: String,
    pub start_seconds: u32,
    pub end_seconds: u32,
    pub duration: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<Hint>,
}

#[cfg(test)]
pub(crate) fn sample_track(id: &str, name: &str, answers: &[&str]) -> Track {
    Track {
        id: id.to_string(),
        name: name.to_string(),
        artist: "BTS".to_string(),
        answers: answers.iter().map(|a| a.to_string()).collect(),
        start_seconds: 0,
        end_seconds: 30,
        duration: 199,
        embed_url: format!("https://www.youtube.com/embed/{}", id),
        thumbnail_url: None,
        hints: Vec::new(),
    }
}
