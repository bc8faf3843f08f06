//! ListenBrainz submission shapes
//!
//! Used both by the ingestion API and by the playing-now provider, which
//! returns the same `track_metadata` objects.

use chrono::{DateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{PiperError, Result};
use crate::models::{Artist, Track};

const SPOTIFY_DOMAIN: &str = "spotify.com";

/// Longest accepted track duration, 24 days
const MAX_DURATION_MS: i64 = 24 * 24 * 60 * 60 * 1000;

lazy_static! {
    static ref ARTIST_SEPARATOR: Regex =
        Regex::new(r"(?i)\s*(?:,|&|\bfeat\.?|\bft\.?|\bx\b)\s*").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenType {
    Single,
    Import,
    PlayingNow,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubmitListens {
    pub listen_type: ListenType,
    #[serde(default)]
    pub payload: Vec<ListenPayload>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenPayload {
    /// Unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listened_at: Option<i64>,
    pub track_metadata: TrackMetadata,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TrackMetadata {
    #[serde(default)]
    pub artist_name: String,
    #[serde(default)]
    pub track_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,
    #[serde(default)]
    pub additional_info: AdditionalInfo,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AdditionalInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// Seconds, used when `duration_ms` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_mbid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_mbid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isrc: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artist_mbids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artist_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spotify_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music_service: Option<String>,
}

/// What is known about which recording a listen refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingIdentity {
    Unidentified,
    Mbid {
        recording_mbid: String,
        isrc: Option<String>,
    },
    Isrc(String),
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl RecordingIdentity {
    pub fn from_info(info: &AdditionalInfo) -> Self {
        let isrc = non_empty(info.isrc.as_deref());
        match (non_empty(info.recording_mbid.as_deref()), isrc) {
            (Some(recording_mbid), isrc) => RecordingIdentity::Mbid {
                recording_mbid,
                isrc,
            },
            (None, Some(isrc)) => RecordingIdentity::Isrc(isrc),
            (None, None) => RecordingIdentity::Unidentified,
        }
    }

    pub fn recording_mbid(&self) -> Option<&str> {
        match self {
            RecordingIdentity::Mbid { recording_mbid, .. } => Some(recording_mbid),
            _ => None,
        }
    }

    pub fn isrc(&self) -> Option<&str> {
        match self {
            RecordingIdentity::Mbid { isrc, .. } => isrc.as_deref(),
            RecordingIdentity::Isrc(isrc) => Some(isrc),
            RecordingIdentity::Unidentified => None,
        }
    }
}

/// One artist per mbid; names come from `artist_names` or a split of `artist_name`
fn expand_artists(artist_name: &str, info: &AdditionalInfo) -> Vec<Artist> {
    let mbids: Vec<&str> = info
        .artist_mbids
        .iter()
        .map(|m| m.trim())
        .filter(|m| !m.is_empty())
        .collect();

    if mbids.is_empty() {
        return vec![Artist::new(artist_name)];
    }
    if mbids.len() == 1 {
        return vec![Artist::with_mbid(artist_name, Some(mbids[0].to_string()))];
    }

    let names: Vec<String> = if info.artist_names.len() == mbids.len() {
        info.artist_names.iter().map(|n| n.trim().to_string()).collect()
    } else {
        ARTIST_SEPARATOR
            .split(artist_name)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect()
    };

    if names.len() != mbids.len() {
        return vec![Artist::with_mbid(artist_name, Some(mbids[0].to_string()))];
    }

    names
        .into_iter()
        .zip(mbids)
        .map(|(name, mbid)| Artist::with_mbid(name, Some(mbid.to_string())))
        .collect()
}

/// Accepts either a bare Spotify track id or a full track URL
fn spotify_url(spotify_id: &str) -> String {
    if spotify_id.starts_with("http") {
        spotify_id.to_string()
    } else {
        let id = spotify_id.trim_start_matches("spotify:track:");
        format!("https://open.spotify.com/track/{}", id)
    }
}

/// `duration_ms` wins over `duration` (seconds); absent means unknown
fn duration_ms(info: &AdditionalInfo) -> Result<i64> {
    let (field, value) = match (info.duration_ms, info.duration) {
        (Some(ms), _) => ("additional_info.duration_ms", Some(ms)),
        (None, Some(secs)) => ("additional_info.duration", secs.checked_mul(1000)),
        (None, None) => return Ok(0),
    };
    match value {
        Some(ms) if (0..=MAX_DURATION_MS).contains(&ms) => Ok(ms),
        Some(ms) if ms < 0 => Err(PiperError::validation(field, "must not be negative")),
        _ => Err(PiperError::validation(field, "longer than 24 days")),
    }
}

impl TrackMetadata {
    /// Validate and convert into a track observed at `timestamp`
    pub fn to_track(&self, timestamp: DateTime<Utc>) -> Result<(Track, RecordingIdentity)> {
        let artist_name = self.artist_name.trim();
        let track_name = self.track_name.trim();
        if artist_name.is_empty() {
            return Err(PiperError::validation("artist_name", "must not be empty"));
        }
        if track_name.is_empty() {
            return Err(PiperError::validation("track_name", "must not be empty"));
        }

        let info = &self.additional_info;
        let identity = RecordingIdentity::from_info(info);

        let mut track = Track::new(track_name, expand_artists(artist_name, info));
        track.album = self.release_name.as_deref().unwrap_or_default().trim().to_string();
        track.duration_ms = duration_ms(info)?;
        track.recording_mbid = identity.recording_mbid().map(str::to_string);
        track.isrc = identity.isrc().map(str::to_string);
        track.release_mbid = non_empty(info.release_mbid.as_deref());
        track.timestamp = timestamp;

        match non_empty(info.spotify_id.as_deref()) {
            Some(spotify_id) => {
                track.url = spotify_url(&spotify_id);
                track.service = SPOTIFY_DOMAIN.to_string();
            }
            None => {
                track.url = non_empty(info.origin_url.as_deref()).unwrap_or_default();
                track.service = non_empty(info.music_service.as_deref()).unwrap_or_default();
            }
        }

        Ok((track, identity))
    }
}

impl ListenPayload {
    /// `listened_at` as a timestamp, defaulting to `now`
    pub fn timestamp(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match self.listened_at {
            None => Ok(now),
            Some(secs) => Utc
                .timestamp_opt(secs, 0)
                .single()
                .ok_or_else(|| PiperError::validation("listened_at", "not a valid unix timestamp")),
        }
    }
}

impl From<&Track> for ListenPayload {
    fn from(track: &Track) -> Self {
        let mbids: Vec<String> = track.artists.iter().filter_map(|a| a.mbid.clone()).collect();
        let artist_mbids = if mbids.len() == track.artists.len() {
            mbids
        } else {
            Vec::new()
        };

        Self {
            listened_at: Some(track.timestamp.timestamp()),
            track_metadata: TrackMetadata {
                artist_name: track.artist(),
                track_name: track.name.clone(),
                release_name: Some(track.album.clone()).filter(|a| !a.is_empty()),
                additional_info: AdditionalInfo {
                    duration_ms: Some(track.duration_ms).filter(|d| *d > 0),
                    recording_mbid: track.recording_mbid.clone(),
                    release_mbid: track.release_mbid.clone(),
                    isrc: track.isrc.clone(),
                    artist_mbids,
                    artist_names: track.artists.iter().map(|a| a.name.clone()).collect(),
                    origin_url: Some(track.url.clone()).filter(|u| !u.is_empty()),
                    music_service: Some(track.service.clone()).filter(|s| !s.is_empty()),
                    ..Default::default()
                },
            },
        }
    }
}

/// Response of `/1/user/{name}/playing-now`
#[derive(Debug, Deserialize)]
pub struct PlayingNowResponse {
    pub payload: PlayingNowPayload,
}

#[derive(Debug, Deserialize)]
pub struct PlayingNowPayload {
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub listens: Vec<ListenPayload>,
}
