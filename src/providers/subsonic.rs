//! Subsonic / Navidrome adapter using `getNowPlaying`

use async_trait::async_trait;
use rand::RngCore;
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{wrong_credentials, ProviderAdapter};
use crate::config::SubsonicConfig;
use crate::error::{PiperError, Result};
use crate::models::{Artist, Provider, ProviderCredentials, Snapshot, Track};
use crate::utils::cancellable;

const API_VERSION: &str = "1.16.1";
const CLIENT_ID: &str = "piper";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "subsonic-response")]
    response: SubsonicResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubsonicResponse {
    status: String,
    #[serde(default)]
    error: Option<SubsonicError>,
    #[serde(default)]
    now_playing: Option<NowPlaying>,
}

#[derive(Debug, Deserialize)]
struct SubsonicError {
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct NowPlaying {
    #[serde(default)]
    entry: Vec<NowPlayingEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NowPlayingEntry {
    #[serde(default)]
    title: String,
    #[serde(default)]
    artist: String,
    #[serde(default)]
    artist_id: Option<String>,
    #[serde(default)]
    album: String,
    /// Seconds
    #[serde(default)]
    duration: i64,
    #[serde(default)]
    username: String,
    #[serde(default)]
    minutes_ago: i64,
    #[serde(default)]
    music_brainz_id: Option<String>,
    /// OpenSubsonic extension
    #[serde(default)]
    isrc: Vec<String>,
    /// OpenSubsonic extension
    #[serde(default)]
    artists: Vec<SubsonicArtist>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubsonicArtist {
    #[serde(default)]
    id: String,
    name: String,
    #[serde(default)]
    music_brainz_id: Option<String>,
}

fn make_salt() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Salted-md5 token auth parameters
fn auth_params(username: &str, password: &str) -> Vec<(&'static str, String)> {
    let salt = make_salt();
    let token = format!("{:x}", md5::compute(format!("{}{}", password, salt)));
    vec![
        ("u", username.to_string()),
        ("t", token),
        ("s", salt),
        ("f", "json".to_string()),
        ("v", API_VERSION.to_string()),
        ("c", CLIENT_ID.to_string()),
    ]
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// The most recent entry belonging to `username`
fn parse_now_playing(envelope: Envelope, username: &str) -> Result<Option<Snapshot>> {
    let response = envelope.response;
    if response.status != "ok" {
        let error = response.error.unwrap_or(SubsonicError {
            code: 0,
            message: "subsonic returned an error".to_string(),
        });
        let message = format!("subsonic error {}: {}", error.code, error.message);
        // 40 wrong credentials, 41 token auth unsupported, 44 user not found
        return Err(match error.code {
            40 | 41 | 44 => PiperError::AuthExpired(message),
            _ => PiperError::TransientNetwork(message),
        });
    }

    let entry = response
        .now_playing
        .unwrap_or_default()
        .entry
        .into_iter()
        .filter(|e| e.username.eq_ignore_ascii_case(username))
        .min_by_key(|e| e.minutes_ago);

    let Some(entry) = entry else {
        return Ok(None);
    };

    let artists = if entry.artists.is_empty() {
        vec![Artist {
            name: entry.artist,
            id: entry.artist_id.unwrap_or_default(),
            mbid: None,
        }]
    } else {
        entry
            .artists
            .into_iter()
            .map(|a| Artist {
                name: a.name,
                id: a.id,
                mbid: non_empty(a.music_brainz_id),
            })
            .collect()
    };

    // no stable public link: identity falls back to the content hash
    let mut track = Track::new(entry.title, artists);
    track.album = entry.album;
    track.duration_ms = entry.duration.saturating_mul(1000).max(0);
    track.progress_ms = entry.minutes_ago.saturating_mul(60_000);
    track.service = Provider::Subsonic.base_domain().to_string();
    track.recording_mbid = non_empty(entry.music_brainz_id);
    track.isrc = entry.isrc.into_iter().find(|i| !i.trim().is_empty());

    Ok(Some(Snapshot::playing(track)))
}

pub struct SubsonicAdapter {
    client: Client,
}

impl SubsonicAdapter {
    pub fn new(client: Client, _config: &SubsonicConfig) -> Self {
        Self { client }
    }

    async fn now_playing(
        &self,
        server_url: &str,
        username: &str,
        password: &str,
    ) -> Result<Option<Snapshot>> {
        let url = format!(
            "{}/rest/getNowPlaying.view",
            server_url.trim().trim_end_matches('/')
        );

        let resp = self
            .client
            .get(&url)
            .query(&auth_params(username, password))
            .send()
            .await?;

        let envelope: Envelope = resp.error_for_status()?.json().await?;
        parse_now_playing(envelope, username)
    }
}

#[async_trait]
impl ProviderAdapter for SubsonicAdapter {
    fn provider(&self) -> Provider {
        Provider::Subsonic
    }

    async fn fetch_snapshot(
        &self,
        cancel: &CancellationToken,
        credentials: &ProviderCredentials,
    ) -> Result<Option<Snapshot>> {
        let ProviderCredentials::Subsonic {
            server_url,
            username,
            password,
        } = credentials
        else {
            return Err(wrong_credentials(Provider::Subsonic, credentials));
        };

        // each user talks to their own server, so there is no shared limiter
        cancellable(cancel, self.now_playing(server_url, username, password)).await
    }
}
