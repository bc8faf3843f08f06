//! Repository session table operations

use sqlx::{FromRow, SqlitePool};

use crate::error::Result;
use crate::models::AtprotoSession;

#[derive(Debug, FromRow)]
struct SessionRow {
    did: String,
    pds_url: String,
    access_token: String,
}

pub struct SessionTable;

impl SessionTable {
    pub async fn get(pool: &SqlitePool, user_id: i64) -> Result<Option<AtprotoSession>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT did, pds_url, access_token FROM atproto_session WHERE userid = ?",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(|r| AtprotoSession {
            did: r.did,
            pds_url: r.pds_url,
            access_token: r.access_token,
        }))
    }

    pub async fn upsert(pool: &SqlitePool, user_id: i64, session: &AtprotoSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO atproto_session (userid, did, pds_url, access_token, updated_at)
            VALUES (?, ?, ?, ?, strftime('%s','now'))
            ON CONFLICT(userid) DO UPDATE SET
                did = excluded.did,
                pds_url = excluded.pds_url,
                access_token = excluded.access_token,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(&session.did)
        .bind(&session.pds_url)
        .bind(&session.access_token)
        .execute(pool)
        .await?;

        sqlx::query("UPDATE user SET did = ? WHERE id = ?")
            .bind(&session.did)
            .bind(user_id)
            .execute(pool)
            .await?;

        Ok(())
    }
}
