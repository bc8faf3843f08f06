//! Play history table operations

use chrono::{TimeZone, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::error::Result;
use crate::models::{Artist, Track};

/// Database row for play table
#[derive(Debug, FromRow)]
struct PlayRow {
    name: String,
    artists: String,
    album: String,
    url: String,
    duration: i64,
    service: String,
    isrc: Option<String>,
    recording_mbid: Option<String>,
    release_mbid: Option<String>,
    timestamp: i64,
}

impl PlayRow {
    fn into_track(self) -> Track {
        let artists: Vec<Artist> = serde_json::from_str(&self.artists).unwrap_or_default();
        let timestamp = Utc
            .timestamp_millis_opt(self.timestamp)
            .single()
            .unwrap_or_else(Utc::now);

        Track {
            name: self.name,
            artists,
            album: self.album,
            url: self.url,
            duration_ms: self.duration,
            progress_ms: 0,
            service: self.service,
            isrc: self.isrc,
            recording_mbid: self.recording_mbid,
            release_mbid: self.release_mbid,
            timestamp,
            has_stamped: true,
        }
    }
}

/// Play table operations
pub struct PlayTable;

impl PlayTable {
    /// Add a completed play
    pub async fn insert(pool: &SqlitePool, user_id: i64, track: &Track) -> Result<i64> {
        let artists = serde_json::to_string(&track.artists)?;

        let result = sqlx::query(
            r#"
            INSERT INTO play (
                userid, trackhash, name, artists, album, url, duration, service,
                isrc, recording_mbid, release_mbid, timestamp
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(track.identity())
        .bind(&track.name)
        .bind(artists)
        .bind(&track.album)
        .bind(&track.url)
        .bind(track.duration_ms)
        .bind(&track.service)
        .bind(&track.isrc)
        .bind(&track.recording_mbid)
        .bind(&track.release_mbid)
        .bind(track.timestamp.timestamp_millis())
        .execute(pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent plays first
    pub async fn recent(pool: &SqlitePool, user_id: i64, limit: u32) -> Result<Vec<Track>> {
        let rows: Vec<PlayRow> = sqlx::query_as(
            r#"
            SELECT name, artists, album, url, duration, service,
                   isrc, recording_mbid, release_mbid, timestamp
            FROM play
            WHERE userid = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_track()).collect())
    }
}
