//! Spotify Web API adapter

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{wrong_credentials, ProviderAdapter};
use crate::config::SpotifyConfig;
use crate::error::{PiperError, Result};
use crate::models::{Artist, Provider, ProviderCredentials, Snapshot, Track};
use crate::utils::cancellable;
use crate::utils::ratelimit::ApiRateLimiter;

const CURRENTLY_PLAYING_URL: &str = "https://api.spotify.com/v1/me/player/currently-playing";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const REQUESTS_PER_SECOND: u32 = 10;

/// Refresh this long before the token actually expires
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct CurrentlyPlaying {
    #[serde(default)]
    is_playing: bool,
    #[serde(default)]
    progress_ms: Option<i64>,
    #[serde(default)]
    item: Option<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    duration_ms: i64,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    #[serde(default)]
    album: Option<SpotifyAlbum>,
    #[serde(default)]
    external_urls: ExternalUrls,
    #[serde(default)]
    external_ids: ExternalIds,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpotifyAlbum {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExternalIds {
    isrc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Turn a `currently-playing` body into a snapshot; episodes and ads have no track item
fn parse_currently_playing(body: CurrentlyPlaying) -> Option<Snapshot> {
    let item = body.item?;

    let url = item
        .external_urls
        .spotify
        .or_else(|| item.id.map(|id| format!("https://open.spotify.com/track/{}", id)))
        .unwrap_or_default();

    let mut track = Track::new(
        item.name,
        item.artists
            .into_iter()
            .map(|a| Artist {
                name: a.name,
                id: a.id.unwrap_or_default(),
                mbid: None,
            })
            .collect(),
    );
    track.album = item.album.map(|a| a.name).unwrap_or_default();
    track.url = url;
    track.duration_ms = item.duration_ms;
    track.progress_ms = body.progress_ms.unwrap_or(0);
    track.service = Provider::Spotify.base_domain().to_string();
    track.isrc = item.external_ids.isrc;

    Some(Snapshot {
        track,
        is_playing: body.is_playing,
    })
}

pub struct SpotifyAdapter {
    client: Client,
    client_id: String,
    client_secret: String,
    limiter: Arc<ApiRateLimiter>,
}

impl SpotifyAdapter {
    pub fn new(client: Client, config: &SpotifyConfig) -> Self {
        Self {
            client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            limiter: Arc::new(ApiRateLimiter::per_second("spotify", REQUESTS_PER_SECOND)),
        }
    }

    async fn currently_playing(&self, access_token: &str) -> Result<Option<Snapshot>> {
        let resp = self
            .client
            .get(CURRENTLY_PLAYING_URL)
            .bearer_auth(access_token)
            .send()
            .await?;

        match resp.status() {
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::UNAUTHORIZED => Err(PiperError::AuthExpired("spotify token rejected".into())),
            StatusCode::TOO_MANY_REQUESTS => {
                Err(PiperError::TransientNetwork("spotify rate limited".into()))
            }
            _ => {
                let body: CurrentlyPlaying = resp.error_for_status()?.json().await?;
                Ok(parse_currently_playing(body))
            }
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<ProviderCredentials> {
        let resp = self
            .client
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .await?;

        // invalid_grant means the user revoked access
        if resp.status() == StatusCode::BAD_REQUEST || resp.status() == StatusCode::UNAUTHORIZED {
            return Err(PiperError::AuthExpired(format!(
                "spotify refresh rejected ({})",
                resp.status()
            )));
        }

        let token: TokenResponse = resp.error_for_status()?.json().await?;
        Ok(ProviderCredentials::Spotify {
            access_token: token.access_token,
            refresh_token: token
                .refresh_token
                .unwrap_or_else(|| refresh_token.to_string()),
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        })
    }
}

#[async_trait]
impl ProviderAdapter for SpotifyAdapter {
    fn provider(&self) -> Provider {
        Provider::Spotify
    }

    async fn fetch_snapshot(
        &self,
        cancel: &CancellationToken,
        credentials: &ProviderCredentials,
    ) -> Result<Option<Snapshot>> {
        let ProviderCredentials::Spotify { access_token, .. } = credentials else {
            return Err(wrong_credentials(Provider::Spotify, credentials));
        };

        self.limiter.acquire(cancel).await?;
        cancellable(cancel, self.currently_playing(access_token)).await
    }

    fn needs_refresh(&self, credentials: &ProviderCredentials) -> bool {
        match credentials {
            ProviderCredentials::Spotify { expires_at, .. } => {
                *expires_at <= Utc::now() + Duration::seconds(REFRESH_MARGIN_SECS)
            }
            _ => false,
        }
    }

    async fn refresh_credentials(
        &self,
        cancel: &CancellationToken,
        credentials: &ProviderCredentials,
    ) -> Result<ProviderCredentials> {
        let ProviderCredentials::Spotify { refresh_token, .. } = credentials else {
            return Err(wrong_credentials(Provider::Spotify, credentials));
        };

        self.limiter.acquire(cancel).await?;
        cancellable(cancel, self.refresh(refresh_token)).await
    }
}
