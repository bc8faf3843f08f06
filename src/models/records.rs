//! Repository record shapes for the `fm.teal.alpha` lexicons

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PiperError, Result};
use crate::models::Track;

pub const PLAY_COLLECTION: &str = "fm.teal.alpha.feed.play";
pub const STATUS_COLLECTION: &str = "fm.teal.alpha.actor.status";
pub const STATUS_RKEY: &str = "self";

/// Status without a known duration stays visible for this long
const DEFAULT_STATUS_TTL_MINUTES: i64 = 10;

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistRecord {
    pub artist_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist_mb_id: Option<String>,
}

/// Fields shared by durable plays and the status item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayView {
    pub track_name: String,
    #[serde(default)]
    pub artists: Vec<ArtistRecord>,
    /// Whole seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_mb_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_mb_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isrc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music_service_base_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_client_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub played_time: Option<String>,
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl PlayView {
    /// Convert a track, rejecting ones without a name or artist
    pub fn from_track(track: &Track, client_agent: &str) -> Result<Self> {
        if track.name.trim().is_empty() {
            return Err(PiperError::validation("trackName", "must not be empty"));
        }
        if !track.is_submittable() {
            return Err(PiperError::validation("artists", "at least one artist is required"));
        }

        let artists = track
            .artists
            .iter()
            .filter(|a| !a.name.trim().is_empty())
            .map(|a| ArtistRecord {
                artist_name: a.name.clone(),
                artist_mb_id: a.mbid.as_deref().and_then(non_empty),
            })
            .collect();

        let duration = if track.duration_ms > 0 {
            Some(track.duration_ms / 1000)
        } else {
            None
        };

        Ok(Self {
            track_name: track.name.clone(),
            artists,
            duration,
            recording_mb_id: track.recording_mbid.as_deref().and_then(non_empty),
            release_name: non_empty(&track.album),
            release_mb_id: track.release_mbid.as_deref().and_then(non_empty),
            isrc: track.isrc.as_deref().and_then(non_empty),
            origin_url: non_empty(&track.url),
            music_service_base_domain: non_empty(&track.service),
            submission_client_agent: non_empty(client_agent),
            played_time: Some(format_time(&track.timestamp)),
        })
    }
}

/// Append-only `fm.teal.alpha.feed.play` record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayRecord {
    #[serde(rename = "$type")]
    pub record_type: String,
    #[serde(flatten)]
    pub play: PlayView,
}

impl PlayRecord {
    pub fn from_track(track: &Track, client_agent: &str) -> Result<Self> {
        Ok(Self {
            record_type: PLAY_COLLECTION.to_string(),
            play: PlayView::from_track(track, client_agent)?,
        })
    }
}

/// Single-slot `fm.teal.alpha.actor.status` record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    #[serde(rename = "$type")]
    pub record_type: String,
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
    pub item: PlayView,
}

impl StatusRecord {
    /// Status advertising `track` as playing at `now`
    pub fn playing(track: &Track, client_agent: &str, now: DateTime<Utc>) -> Result<Self> {
        let fallback = now + Duration::minutes(DEFAULT_STATUS_TTL_MINUTES);
        let expiry = if track.duration_ms > 0 {
            let remaining_ms = track.duration_ms.saturating_sub(track.progress_ms).max(0);
            Duration::try_milliseconds(remaining_ms)
                .and_then(|remaining| now.checked_add_signed(remaining))
                .unwrap_or(fallback)
        } else {
            fallback
        };

        Ok(Self {
            record_type: STATUS_COLLECTION.to_string(),
            time: format_time(&now),
            expiry: Some(format_time(&expiry)),
            item: PlayView::from_track(track, client_agent)?,
        })
    }

    /// An already-expired status with a blank item
    pub fn cleared(now: DateTime<Utc>) -> Self {
        let expiry = now - Duration::minutes(1);
        Self {
            record_type: STATUS_COLLECTION.to_string(),
            time: format_time(&now),
            expiry: Some(format_time(&expiry)),
            item: PlayView::default(),
        }
    }

    #[cfg(test)]
    pub fn is_cleared(&self) -> bool {
        self.item.track_name.is_empty() && self.item.artists.is_empty()
    }
}
