//! Publishing listens to the user's repository
//!
//! The now-playing status lives in a single swappable record; completed plays
//! are appended as new records.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::xrpc::RecordRepository;
use crate::db::UserStore;
use crate::error::{PiperError, Result};
use crate::models::records::{PLAY_COLLECTION, STATUS_COLLECTION, STATUS_RKEY};
use crate::models::{AtprotoSession, PlayRecord, StatusRecord, Track};
use crate::utils::cancellable;

/// Outbound side of the polling and ingestion paths
#[async_trait]
pub trait PlayPublisher: Send + Sync {
    async fn publish_now_playing(
        &self,
        cancel: &CancellationToken,
        user_id: i64,
        track: &Track,
    ) -> Result<()>;

    async fn clear_now_playing(&self, cancel: &CancellationToken, user_id: i64) -> Result<()>;

    async fn submit_play(&self, cancel: &CancellationToken, user_id: i64, track: &Track)
        -> Result<()>;
}

pub struct RepositoryPublisher {
    repo: Arc<dyn RecordRepository>,
    users: Arc<dyn UserStore>,
    client_agent: String,
    /// Users whose status slot was cleared since the last publish
    cleared: DashMap<i64, bool>,
}

impl RepositoryPublisher {
    pub fn new(
        repo: Arc<dyn RecordRepository>,
        users: Arc<dyn UserStore>,
        client_agent: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            users,
            client_agent: client_agent.into(),
            cleared: DashMap::new(),
        }
    }

    async fn session(&self, user_id: i64) -> Result<AtprotoSession> {
        self.users
            .atproto_session(user_id)
            .await?
            .ok_or(PiperError::NoSession(user_id))
    }

    /// Read the current version, then write conditioned on it; one retry on conflict
    async fn swap_status(&self, session: &AtprotoSession, record: &StatusRecord) -> Result<()> {
        let value = serde_json::to_value(record)?;
        let mut retried = false;

        loop {
            let current = self
                .repo
                .get_record(session, STATUS_COLLECTION, STATUS_RKEY)
                .await?;
            let swap = current.as_ref().map(|r| r.cid.as_str());

            match self
                .repo
                .put_record(session, STATUS_COLLECTION, STATUS_RKEY, &value, swap)
                .await
            {
                Ok(cid) => {
                    debug!("Status for {} now at {}", session.did, cid);
                    return Ok(());
                }
                Err(PiperError::SwapConflict(target)) if !retried => {
                    warn!("Swap conflict on {} for {}, retrying once", target, session.did);
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl PlayPublisher for RepositoryPublisher {
    async fn publish_now_playing(
        &self,
        cancel: &CancellationToken,
        user_id: i64,
        track: &Track,
    ) -> Result<()> {
        let record = StatusRecord::playing(track, &self.client_agent, Utc::now())?;
        let session = self.session(user_id).await?;

        cancellable(cancel, self.swap_status(&session, &record)).await?;
        self.cleared.insert(user_id, false);
        Ok(())
    }

    async fn clear_now_playing(&self, cancel: &CancellationToken, user_id: i64) -> Result<()> {
        if self.cleared.get(&user_id).is_some_and(|c| *c) {
            return Ok(());
        }

        let session = self.session(user_id).await?;
        let record = StatusRecord::cleared(Utc::now());

        cancellable(cancel, self.swap_status(&session, &record)).await?;
        self.cleared.insert(user_id, true);
        Ok(())
    }

    async fn submit_play(
        &self,
        cancel: &CancellationToken,
        user_id: i64,
        track: &Track,
    ) -> Result<()> {
        let record = PlayRecord::from_track(track, &self.client_agent)?;
        let value = serde_json::to_value(&record)?;
        let session = self.session(user_id).await?;

        let uri = cancellable(
            cancel,
            self.repo.create_record(&session, PLAY_COLLECTION, &value),
        )
        .await?;
        debug!("Submitted play {} for user {}", uri, user_id);
        Ok(())
    }
}
