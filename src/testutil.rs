//! In-memory collaborators for unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

use crate::core::musicbrainz::SearchBackend;
use crate::core::publisher::PlayPublisher;
use crate::core::xrpc::{RecordRepository, StoredRecord};
use crate::db::{PlayStore, UserStore};
use crate::error::{PiperError, Result};
use crate::models::{
    AtprotoSession, LinkedUser, Provider, ProviderCredentials, Recording, Track, User,
};

struct Link {
    user_id: i64,
    provider: Provider,
    /// Dropped once the link needs reauth
    credentials: Option<ProviderCredentials>,
    needs_reauth: bool,
}

#[derive(Default)]
struct StoreInner {
    users: Vec<User>,
    tokens: HashMap<String, i64>,
    links: Vec<Link>,
    sessions: HashMap<i64, AtprotoSession>,
    plays: Vec<(i64, Track)>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    pub fn add_user(&self, handle: &str) -> User {
        let mut inner = self.inner.lock();
        let user = User {
            id: inner.users.len() as i64 + 1,
            handle: handle.to_string(),
            did: None,
        };
        inner.users.push(user.clone());
        user
    }

    pub fn add_token(&self, user_id: i64, token: &str) {
        self.inner.lock().tokens.insert(token.to_string(), user_id);
    }

    pub fn link(&self, user_id: i64, credentials: ProviderCredentials) {
        self.inner.lock().links.push(Link {
            user_id,
            provider: credentials.provider(),
            credentials: Some(credentials),
            needs_reauth: false,
        });
    }

    pub fn set_session(&self, user_id: i64) {
        self.inner.lock().sessions.insert(
            user_id,
            AtprotoSession {
                did: format!("did:plc:user{}", user_id),
                pds_url: "https://pds.test".into(),
                access_token: "token".into(),
            },
        );
    }

    pub fn saved(&self, user_id: i64) -> Vec<Track> {
        self.inner
            .lock()
            .plays
            .iter()
            .filter(|(id, _)| *id == user_id)
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub fn needs_reauth(&self, user_id: i64, provider: Provider) -> bool {
        self.inner
            .lock()
            .links
            .iter()
            .any(|l| l.user_id == user_id && l.provider == provider && l.needs_reauth)
    }

    pub fn credentials(&self, user_id: i64, provider: Provider) -> Option<ProviderCredentials> {
        self.inner
            .lock()
            .links
            .iter()
            .find(|l| l.user_id == user_id && l.provider == provider)
            .and_then(|l| l.credentials.clone())
    }
}

#[async_trait]
impl PlayStore for MemoryStore {
    async fn save_track(&self, user_id: i64, track: &Track) -> Result<i64> {
        let mut inner = self.inner.lock();
        inner.plays.push((user_id, track.clone()));
        Ok(inner.plays.len() as i64)
    }

    async fn recent_tracks(&self, user_id: i64, limit: u32) -> Result<Vec<Track>> {
        let mut tracks = self.saved(user_id);
        tracks.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        tracks.truncate(limit as usize);
        Ok(tracks)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn user_by_handle(&self, handle: &str) -> Result<Option<User>> {
        Ok(self
            .inner
            .lock()
            .users
            .iter()
            .find(|u| u.handle.eq_ignore_ascii_case(handle))
            .cloned())
    }

    async fn user_by_api_token(&self, token: &str) -> Result<Option<User>> {
        let inner = self.inner.lock();
        Ok(inner
            .tokens
            .get(token)
            .and_then(|id| inner.users.iter().find(|u| u.id == *id))
            .cloned())
    }

    async fn linked_users(&self, provider: Provider) -> Result<Vec<LinkedUser>> {
        let inner = self.inner.lock();
        Ok(inner
            .links
            .iter()
            .filter(|l| l.provider == provider && !l.needs_reauth)
            .filter_map(|l| {
                let user = inner.users.iter().find(|u| u.id == l.user_id)?;
                Some(LinkedUser {
                    user_id: user.id,
                    handle: user.handle.clone(),
                    credentials: l.credentials.clone()?,
                })
            })
            .collect())
    }

    async fn update_credentials(
        &self,
        user_id: i64,
        credentials: &ProviderCredentials,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let provider = credentials.provider();
        match inner
            .links
            .iter_mut()
            .find(|l| l.user_id == user_id && l.provider == provider)
        {
            Some(link) => {
                link.credentials = Some(credentials.clone());
                link.needs_reauth = false;
            }
            None => inner.links.push(Link {
                user_id,
                provider,
                credentials: Some(credentials.clone()),
                needs_reauth: false,
            }),
        }
        Ok(())
    }

    async fn flag_reauth(&self, user_id: i64, provider: Provider) -> Result<()> {
        for link in self.inner.lock().links.iter_mut() {
            if link.user_id == user_id && link.provider == provider {
                link.needs_reauth = true;
                link.credentials = None;
            }
        }
        Ok(())
    }

    async fn atproto_session(&self, user_id: i64) -> Result<Option<AtprotoSession>> {
        Ok(self.inner.lock().sessions.get(&user_id).cloned())
    }
}

/// Repository honouring `swapRecord`, with injectable conflicts
#[derive(Default)]
pub struct MemoryRepository {
    status: Mutex<Option<StoredRecord>>,
    plays: Mutex<Vec<Value>>,
    swaps: Mutex<Vec<Option<String>>>,
    conflicts: AtomicUsize,
    puts: AtomicUsize,
    versions: AtomicUsize,
}

impl MemoryRepository {
    pub fn status(&self) -> Option<StoredRecord> {
        self.status.lock().clone()
    }

    pub fn plays(&self) -> Vec<Value> {
        self.plays.lock().clone()
    }

    pub fn put_calls(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Swap token sent with the most recent write
    pub fn last_swap(&self) -> Option<Option<String>> {
        self.swaps.lock().last().cloned()
    }

    /// Fail the next `n` writes as if another writer got there first
    pub fn inject_conflicts(&self, n: usize) {
        self.conflicts.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordRepository for MemoryRepository {
    async fn get_record(
        &self,
        _session: &AtprotoSession,
        _collection: &str,
        _rkey: &str,
    ) -> Result<Option<StoredRecord>> {
        Ok(self.status())
    }

    async fn put_record(
        &self,
        session: &AtprotoSession,
        collection: &str,
        rkey: &str,
        record: &Value,
        swap: Option<&str>,
    ) -> Result<String> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.swaps.lock().push(swap.map(str::to_string));

        let target = format!("{}/{}", collection, rkey);
        if self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PiperError::SwapConflict(target));
        }

        let mut status = self.status.lock();
        if let (Some(expected), Some(current)) = (swap, status.as_ref()) {
            if current.cid != expected {
                return Err(PiperError::SwapConflict(target));
            }
        }

        let cid = format!("bafy{}", self.versions.fetch_add(1, Ordering::SeqCst));
        *status = Some(StoredRecord {
            uri: format!("at://{}/{}", session.did, target),
            cid: cid.clone(),
            value: record.clone(),
        });
        Ok(cid)
    }

    async fn create_record(
        &self,
        session: &AtprotoSession,
        collection: &str,
        record: &Value,
    ) -> Result<String> {
        let mut plays = self.plays.lock();
        plays.push(record.clone());
        Ok(format!("at://{}/{}/{}", session.did, collection, plays.len()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Published {
    NowPlaying(i64, String),
    Cleared(i64),
    Play(i64, Track),
}

/// Publisher that only records what it was asked to do
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<Published>>,
    reject_plays: AtomicBool,
}

impl RecordingPublisher {
    /// Make every later `submit_play` fail as if the repository were down
    pub fn reject_plays(&self) {
        self.reject_plays.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Published> {
        self.events.lock().clone()
    }

    pub fn plays(&self) -> Vec<Track> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Published::Play(_, track) => Some(track),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl PlayPublisher for RecordingPublisher {
    async fn publish_now_playing(
        &self,
        _cancel: &CancellationToken,
        user_id: i64,
        track: &Track,
    ) -> Result<()> {
        self.events
            .lock()
            .push(Published::NowPlaying(user_id, track.name.clone()));
        Ok(())
    }

    async fn clear_now_playing(&self, _cancel: &CancellationToken, user_id: i64) -> Result<()> {
        self.events.lock().push(Published::Cleared(user_id));
        Ok(())
    }

    async fn submit_play(
        &self,
        _cancel: &CancellationToken,
        user_id: i64,
        track: &Track,
    ) -> Result<()> {
        if self.reject_plays.load(Ordering::SeqCst) {
            return Err(PiperError::TransientNetwork("repository unavailable".into()));
        }
        self.events.lock().push(Published::Play(user_id, track.clone()));
        Ok(())
    }
}

/// Search backend returning a fixed result list
pub struct StaticBackend(pub Vec<Recording>);

#[async_trait]
impl SearchBackend for StaticBackend {
    async fn search_recordings(&self, _query: &str) -> Result<Vec<Recording>> {
        Ok(self.0.clone())
    }
}
