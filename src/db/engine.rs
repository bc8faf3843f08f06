//! Database engine and connection management

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::error::Result;

/// Database engine wrapper
#[derive(Clone)]
pub struct DbEngine {
    pool: SqlitePool,
}

impl DbEngine {
    /// Open (creating if needed) the SQLite database at `url` and ensure the schema
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30))
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        let engine = Self { pool };
        engine.create_tables().await?;
        Ok(engine)
    }

    /// Private in-memory database
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.pragma("foreign_keys", "ON");

        // every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let engine = Self { pool };
        engine.create_tables().await?;
        Ok(engine)
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create_tables(&self) -> Result<()> {
        let pool = &self.pool;

        // User table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                handle TEXT NOT NULL,
                did TEXT,
                api_token_hash TEXT,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_user_handle ON user(handle);
            CREATE INDEX IF NOT EXISTS idx_user_api_token_hash ON user(api_token_hash);
            "#,
        )
        .execute(pool)
        .await?;

        // Provider links, credentials stored as tagged json
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS provider_link (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                userid INTEGER NOT NULL,
                provider TEXT NOT NULL,
                credentials TEXT NOT NULL,
                needs_reauth INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
                FOREIGN KEY (userid) REFERENCES user(id) ON DELETE CASCADE
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_provider_link_user_provider
                ON provider_link(userid, provider);
            CREATE INDEX IF NOT EXISTS idx_provider_link_provider ON provider_link(provider);
            "#,
        )
        .execute(pool)
        .await?;

        // Repository sessions
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS atproto_session (
                userid INTEGER PRIMARY KEY,
                did TEXT NOT NULL,
                pds_url TEXT NOT NULL,
                access_token TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
                FOREIGN KEY (userid) REFERENCES user(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        // Play history
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS play (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                userid INTEGER NOT NULL,
                trackhash TEXT NOT NULL,
                name TEXT NOT NULL,
                artists TEXT NOT NULL DEFAULT '[]',
                album TEXT NOT NULL DEFAULT '',
                url TEXT NOT NULL DEFAULT '',
                duration INTEGER NOT NULL DEFAULT 0,
                service TEXT NOT NULL DEFAULT '',
                isrc TEXT,
                recording_mbid TEXT,
                release_mbid TEXT,
                timestamp INTEGER NOT NULL,
                FOREIGN KEY (userid) REFERENCES user(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_play_userid ON play(userid);
            CREATE INDEX IF NOT EXISTS idx_play_trackhash ON play(trackhash);
            "#,
        )
        .execute(pool)
        .await?;

        // Migration table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dbmigration (
                id INTEGER PRIMARY KEY,
                version INTEGER NOT NULL DEFAULT 0
            );
            INSERT OR IGNORE INTO dbmigration (id, version) VALUES (1, 0);
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}
