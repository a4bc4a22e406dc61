//! Schema for the SQLite library backend. Safe to run repeatedly.

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

use crate::db;

pub async fn run_migrations(path: &Path) -> Result<()> {
    let pool = db::connect(path).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the `bits` table and its indexes on an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per bit id; position keeps library order for random sampling.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bits (
            id TEXT PRIMARY KEY,
            position INTEGER NOT NULL,
            text TEXT NOT NULL,
            url TEXT NOT NULL,
            token_count INTEGER,
            access_tag TEXT,
            image_url TEXT,
            title TEXT,
            description TEXT,
            embedding BLOB,
            dims INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_bits_position ON bits(position)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_bits_url ON bits(url)")
        .execute(pool)
        .await?;

    Ok(())
}
