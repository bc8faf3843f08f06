//! Persistence interfaces consumed by the scheduler, publisher and ingestion API

use async_trait::async_trait;

use super::tables::{LinkTable, PlayTable, SessionTable, UserTable};
use super::DbEngine;
use crate::error::Result;
use crate::models::{AtprotoSession, LinkedUser, Provider, ProviderCredentials, Track, User};
use crate::utils::auth::generate_api_token;

/// Durable play history
#[async_trait]
pub trait PlayStore: Send + Sync {
    async fn save_track(&self, user_id: i64, track: &Track) -> Result<i64>;

    async fn recent_tracks(&self, user_id: i64, limit: u32) -> Result<Vec<Track>>;
}

/// User, provider link and session lookups
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn user_by_handle(&self, handle: &str) -> Result<Option<User>>;

    async fn user_by_api_token(&self, token: &str) -> Result<Option<User>>;

    async fn linked_users(&self, provider: Provider) -> Result<Vec<LinkedUser>>;

    async fn update_credentials(&self, user_id: i64, credentials: &ProviderCredentials)
        -> Result<()>;

    /// Stop polling the link until the user relinks
    async fn flag_reauth(&self, user_id: i64, provider: Provider) -> Result<()>;

    async fn atproto_session(&self, user_id: i64) -> Result<Option<AtprotoSession>>;
}

/// SQLite implementation of both stores
#[derive(Clone)]
pub struct SqliteStore {
    engine: DbEngine,
}

impl SqliteStore {
    pub fn new(engine: DbEngine) -> Self {
        Self { engine }
    }

    /// Create a user and issue its api token; only the hash is kept
    pub async fn create_user(&self, handle: &str, did: Option<&str>) -> Result<(User, String)> {
        let pool = self.engine.pool();
        let id = UserTable::insert(pool, handle, did).await?;
        let token = generate_api_token();
        UserTable::set_api_token(pool, id, &token).await?;

        let user = User {
            id,
            handle: handle.trim().to_string(),
            did: did.map(str::to_string),
        };
        Ok((user, token))
    }

    /// Issue a fresh api token, invalidating the previous one
    pub async fn rotate_api_token(&self, user_id: i64) -> Result<String> {
        let token = generate_api_token();
        UserTable::set_api_token(self.engine.pool(), user_id, &token).await?;
        Ok(token)
    }

    pub async fn save_session(&self, user_id: i64, session: &AtprotoSession) -> Result<()> {
        SessionTable::upsert(self.engine.pool(), user_id, session).await
    }
}

#[async_trait]
impl PlayStore for SqliteStore {
    async fn save_track(&self, user_id: i64, track: &Track) -> Result<i64> {
        PlayTable::insert(self.engine.pool(), user_id, track).await
    }

    async fn recent_tracks(&self, user_id: i64, limit: u32) -> Result<Vec<Track>> {
        PlayTable::recent(self.engine.pool(), user_id, limit).await
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn user_by_handle(&self, handle: &str) -> Result<Option<User>> {
        UserTable::get_by_handle(self.engine.pool(), handle).await
    }

    async fn user_by_api_token(&self, token: &str) -> Result<Option<User>> {
        UserTable::get_by_api_token(self.engine.pool(), token).await
    }

    async fn linked_users(&self, provider: Provider) -> Result<Vec<LinkedUser>> {
        LinkTable::linked(self.engine.pool(), provider).await
    }

    async fn update_credentials(
        &self,
        user_id: i64,
        credentials: &ProviderCredentials,
    ) -> Result<()> {
        LinkTable::upsert(self.engine.pool(), user_id, credentials).await
    }

    async fn flag_reauth(&self, user_id: i64, provider: Provider) -> Result<()> {
        LinkTable::flag_reauth(self.engine.pool(), user_id, provider).await
    }

    async fn atproto_session(&self, user_id: i64) -> Result<Option<AtprotoSession>> {
        SessionTable::get(self.engine.pool(), user_id).await
    }
}
