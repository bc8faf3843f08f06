//! Provider link table operations

use sqlx::{FromRow, SqlitePool};
use tracing::warn;

use crate::error::Result;
use crate::models::{LinkedUser, Provider, ProviderCredentials};

#[derive(Debug, FromRow)]
struct LinkRow {
    userid: i64,
    handle: String,
    credentials: String,
}

impl LinkRow {
    fn into_linked_user(self) -> Option<LinkedUser> {
        match serde_json::from_str::<ProviderCredentials>(&self.credentials) {
            Ok(credentials) => Some(LinkedUser {
                user_id: self.userid,
                handle: self.handle,
                credentials,
            }),
            Err(e) => {
                warn!("Skipping unreadable credentials for user {}: {}", self.userid, e);
                None
            }
        }
    }
}

/// Provider link table operations
pub struct LinkTable;

impl LinkTable {
    /// Users with a usable link to `provider`
    pub async fn linked(pool: &SqlitePool, provider: Provider) -> Result<Vec<LinkedUser>> {
        let rows: Vec<LinkRow> = sqlx::query_as(
            r#"
            SELECT l.userid, u.handle, l.credentials
            FROM provider_link l
            JOIN user u ON u.id = l.userid
            WHERE l.provider = ? AND l.needs_reauth = 0
            ORDER BY l.userid
            "#,
        )
        .bind(provider.as_str())
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().filter_map(|r| r.into_linked_user()).collect())
    }

    /// Insert or replace the link, clearing any reauth flag
    pub async fn upsert(
        pool: &SqlitePool,
        user_id: i64,
        credentials: &ProviderCredentials,
    ) -> Result<()> {
        let json = serde_json::to_string(credentials)?;

        sqlx::query(
            r#"
            INSERT INTO provider_link (userid, provider, credentials, needs_reauth, updated_at)
            VALUES (?, ?, ?, 0, strftime('%s','now'))
            ON CONFLICT(userid, provider) DO UPDATE SET
                credentials = excluded.credentials,
                needs_reauth = 0,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(credentials.provider().as_str())
        .bind(json)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Park the link until relinked, dropping the rejected credentials
    pub async fn flag_reauth(pool: &SqlitePool, user_id: i64, provider: Provider) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE provider_link
            SET needs_reauth = 1, credentials = '{}', updated_at = strftime('%s','now')
            WHERE userid = ? AND provider = ?
            "#,
        )
        .bind(user_id)
        .bind(provider.as_str())
        .execute(pool)
        .await?;

        Ok(())
    }
}
