//! Last.fm adapter, reading the now-playing entry of `user.getrecenttracks`

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{wrong_credentials, ProviderAdapter};
use crate::config::LastFmConfig;
use crate::error::{PiperError, Result};
use crate::models::{Artist, Provider, ProviderCredentials, Snapshot, Track};
use crate::utils::cancellable;
use crate::utils::ratelimit::ApiRateLimiter;

const LASTFM_API_URL: &str = "https://ws.audioscrobbler.com/2.0/";
const REQUESTS_PER_SECOND: u32 = 5;

#[derive(Debug, Deserialize)]
struct RecentTracksResponse {
    #[serde(default)]
    error: Option<i32>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    recenttracks: Option<RecentTracks>,
}

#[derive(Debug, Deserialize)]
struct RecentTracks {
    #[serde(default)]
    track: OneOrMany<LastFmTrack>,
}

/// Last.fm collapses single-element arrays into an object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Debug, Deserialize)]
struct TextWithMbid {
    #[serde(rename = "#text", default)]
    text: String,
    #[serde(default)]
    mbid: String,
}

#[derive(Debug, Deserialize)]
struct NowPlayingAttr {
    #[serde(default)]
    nowplaying: String,
}

#[derive(Debug, Deserialize)]
struct LastFmTrack {
    name: String,
    artist: TextWithMbid,
    #[serde(default)]
    album: Option<TextWithMbid>,
    #[serde(default)]
    mbid: String,
    #[serde(default)]
    url: String,
    #[serde(rename = "@attr", default)]
    attr: Option<NowPlayingAttr>,
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn api_error(code: i32, message: Option<String>) -> PiperError {
    let message = format!("last.fm error {}: {}", code, message.unwrap_or_default());
    match code {
        // user not found, or profile private
        6 | 17 => PiperError::AuthExpired(message),
        8 | 11 | 16 | 29 => PiperError::TransientNetwork(message),
        _ => PiperError::Parse(message),
    }
}

/// The track flagged `nowplaying`, if any
fn parse_recent_tracks(body: RecentTracksResponse) -> Result<Option<Snapshot>> {
    if let Some(code) = body.error {
        return Err(api_error(code, body.message));
    }

    let Some(recent) = body.recenttracks else {
        return Ok(None);
    };

    let now_playing = recent
        .track
        .into_vec()
        .into_iter()
        .find(|t| t.attr.as_ref().is_some_and(|a| a.nowplaying == "true"));

    let Some(item) = now_playing else {
        return Ok(None);
    };

    let artist = Artist::with_mbid(item.artist.text, non_empty(item.artist.mbid));
    let mut track = Track::new(item.name, vec![artist]);
    if let Some(album) = item.album {
        track.album = album.text;
        track.release_mbid = non_empty(album.mbid);
    }
    track.recording_mbid = non_empty(item.mbid);
    track.url = item.url;
    track.service = Provider::LastFm.base_domain().to_string();

    Ok(Some(Snapshot::playing(track)))
}

pub struct LastFmAdapter {
    client: Client,
    api_key: String,
    limiter: Arc<ApiRateLimiter>,
}

impl LastFmAdapter {
    pub fn new(client: Client, config: &LastFmConfig) -> Self {
        Self {
            client,
            api_key: config.api_key.clone(),
            limiter: Arc::new(ApiRateLimiter::per_second("lastfm", REQUESTS_PER_SECOND)),
        }
    }

    async fn recent_tracks(&self, username: &str) -> Result<Option<Snapshot>> {
        let resp = self
            .client
            .get(LASTFM_API_URL)
            .query(&[
                ("method", "user.getrecenttracks"),
                ("user", username),
                ("api_key", self.api_key.as_str()),
                ("format", "json"),
                ("limit", "1"),
            ])
            .send()
            .await?;

        // errors come back as json bodies with 4xx statuses
        let body: RecentTracksResponse = resp.json().await?;
        parse_recent_tracks(body)
    }
}

#[async_trait]
impl ProviderAdapter for LastFmAdapter {
    fn provider(&self) -> Provider {
        Provider::LastFm
    }

    async fn fetch_snapshot(
        &self,
        cancel: &CancellationToken,
        credentials: &ProviderCredentials,
    ) -> Result<Option<Snapshot>> {
        let ProviderCredentials::LastFm { username } = credentials else {
            return Err(wrong_credentials(Provider::LastFm, credentials));
        };

        self.limiter.acquire(cancel).await?;
        cancellable(cancel, self.recent_tracks(username)).await
    }
}
