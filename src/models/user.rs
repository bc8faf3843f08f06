//! User and provider link models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A polled music service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Spotify,
    LastFm,
    Subsonic,
    ListenBrainz,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Spotify => "spotify",
            Provider::LastFm => "lastfm",
            Provider::Subsonic => "subsonic",
            Provider::ListenBrainz => "listenbrainz",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "spotify" => Some(Provider::Spotify),
            "lastfm" => Some(Provider::LastFm),
            "subsonic" => Some(Provider::Subsonic),
            "listenbrainz" => Some(Provider::ListenBrainz),
            _ => None,
        }
    }

    /// Value written to `musicServiceBaseDomain`
    pub fn base_domain(&self) -> &'static str {
        match self {
            Provider::Spotify => "spotify.com",
            Provider::LastFm => "last.fm",
            Provider::Subsonic => "subsonic",
            Provider::ListenBrainz => "listenbrainz.org",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An account on this service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    /// External handle, e.g. an AT Protocol handle
    pub handle: String,
    /// Repository owner DID, when the user has linked one
    #[serde(default)]
    pub did: Option<String>,
}

/// Per-provider credentials, stored as tagged JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderCredentials {
    Spotify {
        access_token: String,
        refresh_token: String,
        expires_at: DateTime<Utc>,
    },
    LastFm {
        username: String,
    },
    Subsonic {
        server_url: String,
        username: String,
        password: String,
    },
    ListenBrainz {
        username: String,
    },
}

impl ProviderCredentials {
    pub fn provider(&self) -> Provider {
        match self {
            ProviderCredentials::Spotify { .. } => Provider::Spotify,
            ProviderCredentials::LastFm { .. } => Provider::LastFm,
            ProviderCredentials::Subsonic { .. } => Provider::Subsonic,
            ProviderCredentials::ListenBrainz { .. } => Provider::ListenBrainz,
        }
    }
}

/// A user with a usable link to one provider
#[derive(Debug, Clone)]
pub struct LinkedUser {
    pub user_id: i64,
    pub handle: String,
    pub credentials: ProviderCredentials,
}

/// Authenticated session against the user's repository host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtprotoSession {
    pub did: String,
    /// PDS base URL, e.g. `https://bsky.social`
    pub pds_url: String,
    pub access_token: String,
}
