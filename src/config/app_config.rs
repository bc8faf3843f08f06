//! Application configuration
//!
//! Built once at startup from defaults, an optional TOML file and `PIPER__*`
//! environment variables, then handed to every component by value.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::models::Provider;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// SQLite URL, defaults to a file in the data directory
    pub database_url: Option<String>,
    pub http: HttpConfig,
    pub tracker: TrackerConfig,
    pub scheduler: SchedulerConfig,
    pub musicbrainz: MusicBrainzConfig,
    pub spotify: SpotifyConfig,
    pub lastfm: LastFmConfig,
    pub subsonic: SubsonicConfig,
    pub listenbrainz: ListenBrainzConfig,
    pub atproto: AtprotoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            user_agent: format!(
                "piper/{} (+https://github.com/teal-fm/piper)",
                env!("CARGO_PKG_VERSION")
            ),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Shared outbound client with the configured timeout
    pub fn build_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(self.timeout())
            .user_agent(self.user_agent.clone())
            .build()?)
    }
}

/// Bounds used by the playback tracker
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Cap on progress credited when a track is first seen
    pub max_skip_delta_ms: i64,
    /// Cap on wall-clock time credited between two polls
    pub max_delta_ms: i64,
    /// Lower bound of the stamp threshold
    pub min_stamp_ms: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_skip_delta_ms: 30_000,
            max_delta_ms: 30_000,
            min_stamp_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub spotify_interval_secs: u64,
    pub lastfm_interval_secs: u64,
    pub subsonic_interval_secs: u64,
    pub listenbrainz_interval_secs: u64,
    /// Upper bound on concurrent per-user work items within one tick
    pub max_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            spotify_interval_secs: 15,
            lastfm_interval_secs: 30,
            subsonic_interval_secs: 30,
            listenbrainz_interval_secs: 30,
            max_concurrency: 64,
        }
    }
}

impl SchedulerConfig {
    pub fn interval_for(&self, provider: Provider) -> Duration {
        let secs = match provider {
            Provider::Spotify => self.spotify_interval_secs,
            Provider::LastFm => self.lastfm_interval_secs,
            Provider::Subsonic => self.subsonic_interval_secs,
            Provider::ListenBrainz => self.listenbrainz_interval_secs,
        };
        Duration::from_secs(secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MusicBrainzConfig {
    pub base_url: String,
    pub requests_per_second: u32,
    pub cache_ttl_secs: u64,
    /// Unicode script name kept by the cleaner, e.g. `Latin`; empty disables script filtering
    pub preferred_script: String,
    /// Release countries preferred when picking a canonical release
    pub preferred_countries: Vec<String>,
    /// Hydrate stamped plays before persisting them
    pub hydrate: bool,
}

impl Default for MusicBrainzConfig {
    fn default() -> Self {
        Self {
            base_url: "https://musicbrainz.org/ws/2".to_string(),
            requests_per_second: 1,
            cache_ttl_secs: 3600,
            preferred_script: "Latin".to_string(),
            preferred_countries: vec!["XW".to_string(), "US".to_string(), "GB".to_string()],
            hydrate: true,
        }
    }
}

impl MusicBrainzConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
}

impl SpotifyConfig {
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LastFmConfig {
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsonicConfig {
    pub enabled: bool,
}

impl Default for SubsonicConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenBrainzConfig {
    pub enabled: bool,
    pub base_url: String,
}

impl Default for ListenBrainzConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.listenbrainz.org".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AtprotoConfig {
    /// Name used in the `submissionClientAgent` field
    pub client_name: String,
}

impl Default for AtprotoConfig {
    fn default() -> Self {
        Self {
            client_name: "piper".to_string(),
        }
    }
}

impl AtprotoConfig {
    pub fn client_agent(&self) -> String {
        format!("{}/v{}", self.client_name, env!("CARGO_PKG_VERSION"))
    }
}

impl AppConfig {
    /// Layer defaults, an optional file and environment variables
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?);

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("PIPER")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("musicbrainz.preferred_countries")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Providers that have enough configuration to be polled
    pub fn enabled_providers(&self) -> Vec<Provider> {
        let mut providers = Vec::new();
        if self.spotify.is_configured() {
            providers.push(Provider::Spotify);
        }
        if !self.lastfm.api_key.is_empty() {
            providers.push(Provider::LastFm);
        }
        if self.subsonic.enabled {
            providers.push(Provider::Subsonic);
        }
        if self.listenbrainz.enabled {
            providers.push(Provider::ListenBrainz);
        }
        providers
    }
}
