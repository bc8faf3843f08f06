//! ListenBrainz-compatible playing-now adapter

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{wrong_credentials, ProviderAdapter};
use crate::config::ListenBrainzConfig;
use crate::error::{PiperError, Result};
use crate::models::listenbrainz::PlayingNowResponse;
use crate::models::{Provider, ProviderCredentials, Snapshot};
use crate::utils::cancellable;
use crate::utils::ratelimit::ApiRateLimiter;

const REQUESTS_PER_SECOND: u32 = 5;

fn parse_playing_now(body: PlayingNowResponse) -> Option<Snapshot> {
    let listen = body.payload.listens.into_iter().next()?;

    match listen.track_metadata.to_track(Utc::now()) {
        Ok((mut track, _)) => {
            if track.service.is_empty() {
                track.service = Provider::ListenBrainz.base_domain().to_string();
            }
            Some(Snapshot::playing(track))
        }
        Err(e) => {
            debug!("Ignoring unusable playing-now listen: {}", e);
            None
        }
    }
}

pub struct ListenBrainzAdapter {
    client: Client,
    base_url: String,
    limiter: Arc<ApiRateLimiter>,
}

impl ListenBrainzAdapter {
    pub fn new(client: Client, config: &ListenBrainzConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            limiter: Arc::new(ApiRateLimiter::per_second("listenbrainz", REQUESTS_PER_SECOND)),
        }
    }

    async fn playing_now(&self, username: &str) -> Result<Option<Snapshot>> {
        let url = format!("{}/1/user/{}/playing-now", self.base_url, username);
        let resp = self.client.get(&url).send().await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(PiperError::AuthExpired(format!(
                "listenbrainz user {} not found",
                username
            )));
        }

        let body: PlayingNowResponse = resp.error_for_status()?.json().await?;
        Ok(parse_playing_now(body))
    }
}

#[async_trait]
impl ProviderAdapter for ListenBrainzAdapter {
    fn provider(&self) -> Provider {
        Provider::ListenBrainz
    }

    async fn fetch_snapshot(
        &self,
        cancel: &CancellationToken,
        credentials: &ProviderCredentials,
    ) -> Result<Option<Snapshot>> {
        let ProviderCredentials::ListenBrainz { username } = credentials else {
            return Err(wrong_credentials(Provider::ListenBrainz, credentials));
        };

        self.limiter.acquire(cancel).await?;
        cancellable(cancel, self.playing_now(username)).await
    }
}
