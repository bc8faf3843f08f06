//! Provider adapters
//!
//! One adapter per polled service. Each turns a user's credentials into at
//! most one normalized [`Snapshot`] of what is playing right now.

pub mod lastfm;
pub mod listenbrainz;
pub mod spotify;
pub mod subsonic;

pub use lastfm::LastFmAdapter;
pub use listenbrainz::ListenBrainzAdapter;
pub use spotify::SpotifyAdapter;
pub use subsonic::SubsonicAdapter;

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::error::{PiperError, Result};
use crate::models::{Provider, ProviderCredentials, Snapshot};

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// `Ok(None)` when nothing is playing
    async fn fetch_snapshot(
        &self,
        cancel: &CancellationToken,
        credentials: &ProviderCredentials,
    ) -> Result<Option<Snapshot>>;

    /// Whether credentials should be renewed before the next fetch
    fn needs_refresh(&self, _credentials: &ProviderCredentials) -> bool {
        false
    }

    /// Renew credentials after an auth failure
    async fn refresh_credentials(
        &self,
        _cancel: &CancellationToken,
        credentials: &ProviderCredentials,
    ) -> Result<ProviderCredentials> {
        Err(PiperError::AuthExpired(format!(
            "{} credentials cannot be refreshed",
            credentials.provider()
        )))
    }
}

/// Credentials of the wrong kind for an adapter
pub(crate) fn wrong_credentials(expected: Provider, got: &ProviderCredentials) -> PiperError {
    PiperError::AuthExpired(format!(
        "expected {} credentials, got {}",
        expected,
        got.provider()
    ))
}

/// Adapters for every provider enabled in `config`
pub fn build_adapters(
    config: &AppConfig,
    client: reqwest::Client,
) -> Vec<Arc<dyn ProviderAdapter>> {
    config
        .enabled_providers()
        .into_iter()
        .map(|provider| -> Arc<dyn ProviderAdapter> {
            match provider {
                Provider::Spotify => Arc::new(SpotifyAdapter::new(client.clone(), &config.spotify)),
                Provider::LastFm => Arc::new(LastFmAdapter::new(client.clone(), &config.lastfm)),
                Provider::Subsonic => Arc::new(SubsonicAdapter::new(client.clone(), &config.subsonic)),
                Provider::ListenBrainz => {
                    Arc::new(ListenBrainzAdapter::new(client.clone(), &config.listenbrainz))
                }
            }
        })
        .collect()
}
