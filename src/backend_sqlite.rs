//! SQLite library backend.
//!
//! Bits live in a single `bits` table (see [`migrate`](crate::migrate)) with
//! embeddings stored as little-endian `f32` BLOBs. Similarity search loads
//! every embedded row and ranks by cosine similarity; random sampling
//! shuffles all rows with a seeded ChaCha8 RNG. Both are brute force, which
//! is fine for personal-library sizes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use polymath_core::backend::{keep_well_formed, Backend, MatchMetadata};
use polymath_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use polymath_core::query::{LibraryQuery, ScoredBit, Sort, TOP_K};
use polymath_core::{Library, PolymathError};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::{debug, info};

use crate::{db, migrate};

pub struct SqliteBackend {
    pool: SqlitePool,
    top_k: usize,
}

impl SqliteBackend {
    /// Open the database at `path`, creating the schema if needed.
    pub async fn open(path: &Path, top_k: usize) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::apply(&pool).await?;
        Ok(Self::from_pool(pool, top_k))
    }

    pub fn from_pool(pool: SqlitePool, top_k: usize) -> Self {
        Self {
            pool,
            top_k: top_k.min(TOP_K),
        }
    }

    /// Store every Bit of `library`, replacing rows with the same id.
    ///
    /// Replaced rows keep their position; new rows are appended.
    pub async fn upsert_library(&self, library: &Library) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let mut next_position: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(position) + 1, 0) FROM bits")
                .fetch_one(&mut *tx)
                .await?;

        for bit in library.iter() {
            let blob = bit.embedding.as_deref().map(vec_to_blob);
            let dims = bit.embedding.as_ref().map(|v| v.len() as i64);
            sqlx::query(
                r#"
                INSERT INTO bits (id, position, text, url, token_count, access_tag,
                                  image_url, title, description, embedding, dims)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    text = excluded.text,
                    url = excluded.url,
                    token_count = excluded.token_count,
                    access_tag = excluded.access_tag,
                    image_url = excluded.image_url,
                    title = excluded.title,
                    description = excluded.description,
                    embedding = excluded.embedding,
                    dims = excluded.dims
                "#,
            )
            .bind(&bit.id)
            .bind(next_position)
            .bind(&bit.text)
            .bind(&bit.info.url)
            .bind(bit.token_count.map(|n| n as i64))
            .bind(&bit.access_tag)
            .bind(&bit.info.image_url)
            .bind(&bit.info.title)
            .bind(&bit.info.description)
            .bind(blob)
            .bind(dims)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to store bit {}", bit.id))?;

            // Positions may skip values on replace; only their order matters.
            next_position += 1;
        }

        tx.commit().await?;
        info!(bits = library.len(), "stored library in sqlite");
        Ok(library.len())
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bits")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn row_to_scored(row: &SqliteRow, score: f32) -> Result<ScoredBit, PolymathError> {
    let id: Option<String> = row.try_get("id").ok();
    let metadata = MatchMetadata {
        text: row.try_get("text").ok(),
        url: row.try_get("url").ok(),
        token_count: row
            .try_get::<Option<i64>, _>("token_count")
            .ok()
            .flatten()
            .map(|n| n as usize),
        access_tag: row.try_get("access_tag").ok().flatten(),
        image_url: row.try_get("image_url").ok().flatten(),
        title: row.try_get("title").ok().flatten(),
        description: row.try_get("description").ok().flatten(),
    };
    Ok(ScoredBit {
        bit: metadata.into_bit(id)?,
        score,
    })
}

#[async_trait]
impl Backend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn top_k(&self) -> usize {
        self.top_k
    }

    async fn produce_query_result(&self, query: &LibraryQuery) -> Result<Vec<ScoredBit>> {
        match query.sort {
            Sort::Similarity => {
                let query_vec = query
                    .query_embedding
                    .as_deref()
                    .context("similarity query without embedding")?;
                let rows = sqlx::query(
                    "SELECT id, text, url, token_count, access_tag, image_url, title, description, embedding
                     FROM bits WHERE embedding IS NOT NULL ORDER BY position",
                )
                .fetch_all(&self.pool)
                .await?;
                debug!(candidates = rows.len(), "sqlite similarity scan");

                let mut scored: Vec<(f32, &SqliteRow)> = rows
                    .iter()
                    .map(|row| {
                        let blob: Vec<u8> = row.try_get("embedding").unwrap_or_default();
                        (cosine_similarity(query_vec, &blob_to_vec(&blob)), row)
                    })
                    .collect();
                scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
                scored.truncate(self.top_k);

                Ok(keep_well_formed(
                    self.name(),
                    scored.into_iter().map(|(score, row)| row_to_scored(row, score)),
                ))
            }
            Sort::Random => {
                let rows = sqlx::query(
                    "SELECT id, text, url, token_count, access_tag, image_url, title, description
                     FROM bits ORDER BY position",
                )
                .fetch_all(&self.pool)
                .await?;

                let mut rng = ChaCha8Rng::seed_from_u64(query.seed_or_random());
                let mut picked: Vec<&SqliteRow> = rows.iter().collect();
                picked.shuffle(&mut rng);
                picked.truncate(self.top_k);

                Ok(keep_well_formed(
                    self.name(),
                    picked.into_iter().map(|row| row_to_scored(row, 0.0)),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polymath_core::{Bit, Info};

    fn bit(id: &str, vector: Vec<f32>) -> Bit {
        let mut bit = Bit::new(id, format!("text {}", id), Info::new(format!("https://example.com/{}", id)));
        bit.embedding = Some(vector);
        bit.token_count = Some(2);
        bit
    }

    async fn backend(dir: &tempfile::TempDir) -> SqliteBackend {
        SqliteBackend::open(&dir.path().join("bits.sqlite"), TOP_K)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir).await;
        let mut library = Library::with_dims("test:tiny", 2);
        library.insert(bit("a", vec![1.0, 0.0])).unwrap();
        library.insert(bit("b", vec![0.0, 1.0])).unwrap();
        backend.upsert_library(&library).await.unwrap();

        let results = backend
            .produce_query_result(&LibraryQuery::similarity(vec![0.1, 1.0]))
            .await
            .unwrap();
        assert_eq!(results[0].bit.id, "b");
        assert_eq!(results[0].bit.token_count, Some(2));
        assert_eq!(results[1].bit.info.url, "https://example.com/a");
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_id() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir).await;
        let mut library = Library::with_dims("test:tiny", 2);
        library.insert(bit("a", vec![1.0, 0.0])).unwrap();
        backend.upsert_library(&library).await.unwrap();

        let mut update = Library::with_dims("test:tiny", 2);
        let mut changed = bit("a", vec![1.0, 0.0]);
        changed.text = "rewritten".to_string();
        update.insert(changed).unwrap();
        backend.upsert_library(&update).await.unwrap();

        assert_eq!(backend.count().await.unwrap(), 1);
        let results = backend
            .produce_query_result(&LibraryQuery::random(Some(3)))
            .await
            .unwrap();
        assert_eq!(results[0].bit.text, "rewritten");
    }

    #[tokio::test]
    async fn test_random_is_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir).await;
        let mut library = Library::with_dims("test:tiny", 2);
        for i in 0..20 {
            library.insert(bit(&format!("b{}", i), vec![1.0, i as f32])).unwrap();
        }
        backend.upsert_library(&library).await.unwrap();

        let query = LibraryQuery::random(Some(99));
        let first = backend.produce_query_result(&query).await.unwrap();
        let second = backend.produce_query_result(&query).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 20);
    }
}
