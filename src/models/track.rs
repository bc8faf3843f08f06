//! Track model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::hashing::create_track_hash;

/// An artist credited on a track
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Artist {
    pub name: String,
    /// Identifier local to the originating service
    #[serde(default)]
    pub id: String,
    /// MusicBrainz artist id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbid: Option<String>,
}

impl Artist {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_mbid(name: impl Into<String>, mbid: Option<String>) -> Self {
        Self {
            name: name.into(),
            id: String::new(),
            mbid,
        }
    }
}

/// An observed or submitted play
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub album: String,
    /// Stable link on the originating service, empty when there is none
    #[serde(default)]
    pub url: String,
    /// Duration in milliseconds, 0 when unknown
    #[serde(default)]
    pub duration_ms: i64,
    /// Playback position when observed
    #[serde(default)]
    pub progress_ms: i64,
    /// Base domain of the originating service, e.g. `spotify.com`
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub isrc: Option<String>,
    #[serde(default)]
    pub recording_mbid: Option<String>,
    #[serde(default)]
    pub release_mbid: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub has_stamped: bool,
}

impl Track {
    pub fn new(name: impl Into<String>, artists: Vec<Artist>) -> Self {
        Self {
            name: name.into(),
            artists,
            album: String::new(),
            url: String::new(),
            duration_ms: 0,
            progress_ms: 0,
            service: String::new(),
            isrc: None,
            recording_mbid: None,
            release_mbid: None,
            timestamp: Utc::now(),
            has_stamped: false,
        }
    }

    /// Get artist as a comma-separated string
    pub fn artist(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Identity used to tell one track apart from the next.
    ///
    /// Prefers the service URL; falls back to a content hash for tracks
    /// without one (local files, services that expose no stable link).
    pub fn identity(&self) -> String {
        if !self.url.is_empty() {
            return self.url.clone();
        }
        create_track_hash(&self.name, &self.album, &self.artist())
    }

    pub fn is_same_track(&self, other: &Track) -> bool {
        self.identity() == other.identity()
    }

    /// Non-empty name and at least one named artist
    pub fn is_submittable(&self) -> bool {
        !self.name.trim().is_empty() && self.artists.iter().any(|a| !a.name.trim().is_empty())
    }
}

/// One provider poll result
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub track: Track,
    pub is_playing: bool,
}

impl Snapshot {
    pub fn playing(track: Track) -> Self {
        Self {
            track,
            is_playing: true,
        }
    }

    pub fn paused(track: Track) -> Self {
        Self {
            track,
            is_playing: false,
        }
    }
}
