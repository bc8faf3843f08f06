//! User table operations

use sqlx::{FromRow, SqlitePool};

use crate::error::Result;
use crate::models::User;
use crate::utils::auth::{hash_api_token, verify_api_token};

/// Database row for user table
#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    handle: String,
    did: Option<String>,
    api_token_hash: Option<String>,
}

impl UserRow {
    fn into_user(self) -> User {
        User {
            id: self.id,
            handle: self.handle,
            did: self.did,
        }
    }
}

/// User table operations
pub struct UserTable;

impl UserTable {
    /// Get user by external handle, ignoring case
    pub async fn get_by_handle(pool: &SqlitePool, handle: &str) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, handle, did, api_token_hash FROM user WHERE lower(handle) = lower(?)",
        )
        .bind(handle.trim())
        .fetch_optional(pool)
        .await?;

        Ok(row.map(|r| r.into_user()))
    }

    /// Get the user owning an api token
    pub async fn get_by_api_token(pool: &SqlitePool, token: &str) -> Result<Option<User>> {
        let hash = hash_api_token(token);
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, handle, did, api_token_hash FROM user WHERE api_token_hash = ?",
        )
        .bind(&hash)
        .fetch_optional(pool)
        .await?;

        Ok(row
            .filter(|r| {
                r.api_token_hash
                    .as_deref()
                    .is_some_and(|stored| verify_api_token(token, stored))
            })
            .map(|r| r.into_user()))
    }

    /// Insert a user
    pub async fn insert(pool: &SqlitePool, handle: &str, did: Option<&str>) -> Result<i64> {
        let result = sqlx::query("INSERT INTO user (handle, did) VALUES (?, ?)")
            .bind(handle.trim())
            .bind(did)
            .execute(pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    /// Replace the stored api token hash
    pub async fn set_api_token(pool: &SqlitePool, id: i64, token: &str) -> Result<()> {
        sqlx::query("UPDATE user SET api_token_hash = ? WHERE id = ?")
            .bind(hash_api_token(token))
            .bind(id)
            .execute(pool)
            .await?;

        Ok(())
    }
}
