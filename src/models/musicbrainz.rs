//! MusicBrainz search response shapes

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingSearchResponse {
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub recordings: Vec<Recording>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Length in milliseconds
    #[serde(default)]
    pub length: Option<i64>,
    #[serde(default)]
    pub isrcs: Vec<String>,
    #[serde(default, rename = "artist-credit")]
    pub artist_credit: Vec<ArtistCredit>,
    #[serde(default)]
    pub releases: Vec<Release>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtistCredit {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub joinphrase: String,
    pub artist: CreditedArtist,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreditedArtist {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default, rename = "release-group")]
    pub release_group: Option<ReleaseGroup>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseGroup {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "primary-type")]
    pub primary_type: Option<String>,
    #[serde(default, rename = "secondary-types")]
    pub secondary_types: Vec<String>,
}

impl Release {
    pub fn is_official(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("official"))
    }

    /// Official status, primary type Album and no secondary types
    pub fn is_official_album(&self) -> bool {
        self.is_official()
            && self.release_group.as_ref().is_some_and(|rg| {
                rg.primary_type
                    .as_deref()
                    .is_some_and(|t| t.eq_ignore_ascii_case("album"))
                    && rg.secondary_types.is_empty()
            })
    }

    /// Parse `YYYY`, `YYYY-MM` or `YYYY-MM-DD`, filling missing parts with 1
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        let raw = self.date.as_deref()?.trim();
        let mut parts = raw.split('-');
        let year: i32 = parts.next()?.parse().ok()?;
        let month: u32 = match parts.next() {
            Some(m) => m.parse().ok()?,
            None => 1,
        };
        let day: u32 = match parts.next() {
            Some(d) => d.parse().ok()?,
            None => 1,
        };
        NaiveDate::from_ymd_opt(year, month, day)
    }
}
