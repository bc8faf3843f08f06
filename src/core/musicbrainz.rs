//! MusicBrainz metadata resolver
//!
//! Cleans provider strings, searches recordings through the shared rate
//! limiter, caches result lists per query, and merges the best match onto a
//! track.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::MusicBrainzConfig;
use crate::core::cleaning::Cleaner;
use crate::core::release::select_best_release;
use crate::error::{PiperError, Result};
use crate::models::musicbrainz::RecordingSearchResponse;
use crate::models::{Artist, Recording, Track};
use crate::utils::cache::TtlCache;
use crate::utils::cancellable;
use crate::utils::ratelimit::ApiRateLimiter;

const SEARCH_LIMIT: u32 = 25;

/// Recording search parameters; at least one must be set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
    pub track: Option<String>,
    pub artist: Option<String>,
    pub release: Option<String>,
    pub isrc: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Escape a value for use inside a quoted Lucene phrase
fn escape_phrase(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

impl SearchParams {
    pub fn is_empty(&self) -> bool {
        present(&self.track).is_none()
            && present(&self.artist).is_none()
            && present(&self.release).is_none()
            && present(&self.isrc).is_none()
    }

    /// Ordered concatenation of the four parameters
    pub fn cache_key(&self) -> String {
        [&self.track, &self.artist, &self.release, &self.isrc]
            .iter()
            .map(|v| present(v).unwrap_or(""))
            .collect::<Vec<_>>()
            .join("\u{1f}")
    }

    /// Lucene query for the recording search endpoint
    pub fn to_query(&self) -> String {
        let mut clauses = Vec::new();
        if let Some(track) = present(&self.track) {
            clauses.push(format!("recording:\"{}\"", escape_phrase(track)));
        }
        if let Some(artist) = present(&self.artist) {
            clauses.push(format!("artist:\"{}\"", escape_phrase(artist)));
        }
        if let Some(release) = present(&self.release) {
            clauses.push(format!("release:\"{}\"", escape_phrase(release)));
        }
        if let Some(isrc) = present(&self.isrc) {
            clauses.push(format!("isrc:\"{}\"", escape_phrase(isrc)));
        }
        clauses.join(" AND ")
    }
}

/// The external recording search call
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search_recordings(&self, query: &str) -> Result<Vec<Recording>>;
}

/// MusicBrainz web service client
pub struct MusicBrainzClient {
    client: Client,
    base_url: String,
}

impl MusicBrainzClient {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SearchBackend for MusicBrainzClient {
    async fn search_recordings(&self, query: &str) -> Result<Vec<Recording>> {
        let url = format!("{}/recording", self.base_url);
        let limit = SEARCH_LIMIT.to_string();

        let resp = self
            .client
            .get(&url)
            .query(&[("query", query), ("fmt", "json"), ("limit", limit.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 503 || status.as_u16() == 429 {
            return Err(PiperError::TransientNetwork(format!(
                "musicbrainz throttled the request ({})",
                status
            )));
        }

        let body: RecordingSearchResponse = resp.error_for_status()?.json().await?;
        Ok(body.recordings)
    }
}

/// Search, cache and hydrate against a recording database
pub struct MetadataResolver {
    backend: Arc<dyn SearchBackend>,
    limiter: Arc<ApiRateLimiter>,
    cache: TtlCache<String, Vec<Recording>>,
    /// One lock per query being fetched, so identical misses wait for a single search
    in_flight: DashMap<String, Arc<AsyncMutex<()>>>,
    cleaner: Cleaner,
    preferred_countries: Vec<String>,
}

impl MetadataResolver {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        limiter: Arc<ApiRateLimiter>,
        config: &MusicBrainzConfig,
    ) -> Self {
        Self {
            backend,
            limiter,
            cache: TtlCache::new(config.cache_ttl()),
            in_flight: DashMap::new(),
            cleaner: Cleaner::new(&config.preferred_script),
            preferred_countries: config.preferred_countries.clone(),
        }
    }

    /// Search recordings, serving repeated queries from the cache
    pub async fn search(
        &self,
        cancel: &CancellationToken,
        params: &SearchParams,
    ) -> Result<Vec<Recording>> {
        if params.is_empty() {
            return Err(PiperError::NotFound(
                "at least one search parameter is required".to_string(),
            ));
        }

        let key = params.cache_key();
        if let Some(cached) = self.cache.get(&key) {
            debug!("MusicBrainz cache hit for {}", params.to_query());
            return Ok(cached);
        }

        let gate = self.in_flight.entry(key.clone()).or_default().clone();
        let _fetching = cancellable(cancel, async { Ok::<_, PiperError>(gate.lock().await) }).await?;

        // a concurrent caller may have filled the entry while we waited
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let result = self.fetch(cancel, params).await;
        if let Ok(recordings) = &result {
            self.cache.insert(key.clone(), recordings.clone());
        }
        self.in_flight.remove(&key);
        result
    }

    async fn fetch(
        &self,
        cancel: &CancellationToken,
        params: &SearchParams,
    ) -> Result<Vec<Recording>> {
        self.limiter.acquire(cancel).await?;

        let query = params.to_query();
        let recordings = cancellable(cancel, self.backend.search_recordings(&query)).await?;

        debug!(
            "MusicBrainz search '{}' returned {} recordings",
            query,
            recordings.len()
        );
        Ok(recordings)
    }

    /// Search parameters for a provider track, after cleaning
    pub fn params_for(&self, track: &Track) -> SearchParams {
        let artist = track
            .artists
            .first()
            .map(|a| self.cleaner.clean_artist(&a.name))
            .filter(|a| !a.is_empty());

        SearchParams {
            track: Some(self.cleaner.clean_recording(&track.name)).filter(|t| !t.is_empty()),
            artist,
            release: None,
            isrc: track.isrc.clone(),
        }
    }

    /// Return a copy of `track` enriched with canonical identifiers
    pub async fn hydrate(&self, cancel: &CancellationToken, track: &Track) -> Result<Track> {
        let params = self.params_for(track);
        let recordings = self.search(cancel, &params).await?;

        let recording = pick_recording(&recordings, track).ok_or(PiperError::NoResults)?;

        Ok(self.merge(track, recording))
    }

    fn merge(&self, track: &Track, recording: &Recording) -> Track {
        let mut hydrated = track.clone();

        hydrated.recording_mbid = Some(recording.id.clone());
        hydrated.isrc = track
            .isrc
            .clone()
            .or_else(|| recording.isrcs.first().cloned());

        if let Some(length) = recording.length.filter(|l| *l > 0) {
            hydrated.duration_ms = length;
        }

        if !recording.artist_credit.is_empty() {
            hydrated.artists = recording
                .artist_credit
                .iter()
                .map(|credit| {
                    let name = if credit.name.is_empty() {
                        credit.artist.name.clone()
                    } else {
                        credit.name.clone()
                    };
                    let provider_id = track
                        .artists
                        .iter()
                        .find(|a| a.name.eq_ignore_ascii_case(&name))
                        .map(|a| a.id.clone())
                        .unwrap_or_default();
                    Artist {
                        name,
                        id: provider_id,
                        mbid: Some(credit.artist.id.clone()),
                    }
                })
                .collect();
        }

        if let Some(release) = select_best_release(
            &recording.releases,
            &track.album,
            &track.name,
            &self.preferred_countries,
        ) {
            hydrated.release_mbid = Some(release.id.clone());
            if hydrated.album.is_empty() {
                hydrated.album = release.title.clone();
            }
        }

        hydrated
    }
}

/// Prefer a recording carrying the known ISRC, otherwise the top-ranked one
fn pick_recording<'a>(recordings: &'a [Recording], track: &Track) -> Option<&'a Recording> {
    if let Some(isrc) = track.isrc.as_deref() {
        if let Some(found) = recordings
            .iter()
            .find(|r| r.isrcs.iter().any(|i| i.eq_ignore_ascii_case(isrc)))
        {
            return Some(found);
        }
    }
    recordings.first()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArtistCredit, Release, ReleaseGroup};
    use crate::models::musicbrainz::CreditedArtist;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeBackend {
        calls: AtomicUsize,
        queries: Mutex<Vec<String>>,
        results: Vec<Recording>,
    }

    impl FakeBackend {
        fn new(results: Vec<Recording>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                queries: Mutex::new(Vec::new()),
                results,
            })
        }
    }

    #[async_trait]
    impl SearchBackend for FakeBackend {
        async fn search_recordings(&self, query: &str) -> Result<Vec<Recording>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.queries.lock().push(query.to_string());
            Ok(self.results.clone())
        }
    }

    fn recording() -> Recording {
        Recording {
            id: "rec-1".into(),
            title: "Song Title".into(),
            length: Some(241_000),
            isrcs: vec!["GBAYE0601498".into()],
            artist_credit: vec![ArtistCredit {
                name: "The Band".into(),
                joinphrase: String::new(),
                artist: CreditedArtist {
                    id: "art-1".into(),
                    name: "The Band".into(),
                },
            }],
            releases: vec![Release {
                id: "rel-1".into(),
                title: "The Album".into(),
                status: Some("Official".into()),
                country: Some("GB".into()),
                date: Some("2015-06-01".into()),
                release_group: Some(ReleaseGroup {
                    id: "rg-1".into(),
                    primary_type: Some("Album".into()),
                    secondary_types: vec![],
                }),
            }],
        }
    }

    fn resolver(backend: Arc<FakeBackend>) -> MetadataResolver {
        MetadataResolver::new(
            backend,
            Arc::new(ApiRateLimiter::per_second("musicbrainz-test", 100)),
            &MusicBrainzConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_search_requires_a_parameter() {
        let backend = FakeBackend::new(vec![]);
        let resolver = resolver(backend.clone());
        let err = resolver
            .search(&CancellationToken::new(), &SearchParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PiperError::NotFound(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_identical_searches_hit_backend_once() {
        let backend = FakeBackend::new(vec![recording()]);
        let resolver = resolver(backend.clone());
        let cancel = CancellationToken::new();
        let params = SearchParams {
            track: Some("Song Title".into()),
            artist: Some("The Band".into()),
            ..Default::default()
        };

        let first = resolver.search(&cancel, &params).await.unwrap();
        let second = resolver.search(&cancel, &params).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    struct SlowBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SearchBackend for SlowBackend {
        async fn search_recordings(&self, _query: &str) -> Result<Vec<Recording>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(vec![recording()])
        }
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_search() {
        let backend = Arc::new(SlowBackend {
            calls: AtomicUsize::new(0),
        });
        let resolver = MetadataResolver::new(
            backend.clone(),
            Arc::new(ApiRateLimiter::per_second("musicbrainz-test", 100)),
            &MusicBrainzConfig::default(),
        );
        let cancel = CancellationToken::new();
        let params = SearchParams {
            track: Some("Song Title".into()),
            ..Default::default()
        };

        let (first, second, third) = tokio::join!(
            resolver.search(&cancel, &params),
            resolver.search(&cancel, &params),
            resolver.search(&cancel, &params),
        );

        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(third.unwrap().len(), 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert!(resolver.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_hydrate_merges_canonical_ids() {
        let backend = FakeBackend::new(vec![recording()]);
        let resolver = resolver(backend.clone());

        let mut track = Track::new("Song Title (2015 Remaster)", vec![Artist::new("The Band")]);
        track.album = "The Album".into();
        track.progress_ms = 12_345;
        track.has_stamped = true;
        let timestamp = track.timestamp;

        let hydrated = resolver
            .hydrate(&CancellationToken::new(), &track)
            .await
            .unwrap();

        assert_eq!(hydrated.recording_mbid.as_deref(), Some("rec-1"));
        assert_eq!(hydrated.release_mbid.as_deref(), Some("rel-1"));
        assert_eq!(hydrated.isrc.as_deref(), Some("GBAYE0601498"));
        assert_eq!(hydrated.duration_ms, 241_000);
        assert_eq!(hydrated.artists[0].mbid.as_deref(), Some("art-1"));
        assert_eq!(hydrated.timestamp, timestamp);
        assert_eq!(hydrated.progress_ms, 12_345);
        assert!(hydrated.has_stamped);

        let queries = backend.queries.lock();
        assert_eq!(
            queries[0],
            "recording:\"Song Title\" AND artist:\"The Band\""
        );
    }

    #[tokio::test]
    async fn test_hydrate_keeps_caller_isrc() {
        let backend = FakeBackend::new(vec![recording()]);
        let resolver = resolver(backend);

        let mut track = Track::new("Song Title", vec![Artist::new("The Band")]);
        track.isrc = Some("USXYZ9999999".into());

        let hydrated = resolver
            .hydrate(&CancellationToken::new(), &track)
            .await
            .unwrap();
        assert_eq!(hydrated.isrc.as_deref(), Some("USXYZ9999999"));
    }

    #[tokio::test]
    async fn test_hydrate_without_results() {
        let backend = FakeBackend::new(vec![]);
        let resolver = resolver(backend);
        let track = Track::new("Unknown", vec![Artist::new("Nobody")]);

        let err = resolver
            .hydrate(&CancellationToken::new(), &track)
            .await
            .unwrap_err();
        assert!(matches!(err, PiperError::NoResults));
    }

    #[test]
    fn test_query_escaping() {
        let params = SearchParams {
            track: Some("Say \"Hi\"".into()),
            isrc: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(params.to_query(), r#"recording:"Say \"Hi\"""#);
        assert_eq!(params.cache_key(), "Say \"Hi\"\u{1f}\u{1f}\u{1f}");
    }
}
