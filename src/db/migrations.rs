//! Database migrations

use tracing::info;

use super::DbEngine;
use crate::error::Result;

/// Current migration version
const CURRENT_VERSION: i32 = 2;

/// Run database migrations
pub async fn run_migrations(engine: &DbEngine) -> Result<()> {
    let pool = engine.pool();

    let current_version: i32 = sqlx::query_scalar("SELECT version FROM dbmigration WHERE id = 1")
        .fetch_one(pool)
        .await?;

    if current_version >= CURRENT_VERSION {
        info!("Database is up to date (version {})", current_version);
        return Ok(());
    }

    info!(
        "Running migrations from version {} to {}",
        current_version, CURRENT_VERSION
    );

    for version in (current_version + 1)..=CURRENT_VERSION {
        run_migration(engine, version).await?;

        sqlx::query("UPDATE dbmigration SET version = ? WHERE id = 1")
            .bind(version)
            .execute(pool)
            .await?;

        info!("Applied migration {}", version);
    }

    Ok(())
}

async fn run_migration(engine: &DbEngine, version: i32) -> Result<()> {
    let pool = engine.pool();

    match version {
        1 => {
            // base schema is created on connect
        }
        2 => {
            // databases created before reauth tracking lack the column
            let has_column: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM pragma_table_info('provider_link') WHERE name = 'needs_reauth'",
            )
            .fetch_one(pool)
            .await?;

            if has_column == 0 {
                sqlx::query(
                    "ALTER TABLE provider_link ADD COLUMN needs_reauth INTEGER NOT NULL DEFAULT 0",
                )
                .execute(pool)
                .await?;
            }

            sqlx::query("CREATE INDEX IF NOT EXISTS idx_play_user_timestamp ON play(userid, timestamp)")
                .execute(pool)
                .await?;
        }
        _ => {
            tracing::warn!("Unknown migration version: {}", version);
        }
    }

    Ok(())
}
