//! SQLite-backed [`VectorStore`] implementation.
//!
//! Records live in one `records` table keyed by `(collection, id)`; metadata
//! is stored as JSON text and embeddings as little-endian f32 BLOBs. Filters
//! and cosine ranking are evaluated in Rust over a single `SELECT` per
//! collection, so each read is one consistent snapshot.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::migrate;
use crate::models::Metadata;

use super::{rank_matches, Filter, Match, Record, StoredRecord, VectorStore};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(&config.db.path).await?;
        migrate::apply_schema(&pool).await?;
        Ok(Self::new(pool))
    }
}

fn parse_metadata(raw: &str, id: &str) -> Result<Metadata> {
    serde_json::from_str(raw).with_context(|| format!("corrupt metadata for record '{}'", id))
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn ensure_collection(&self, name: &str, model: &str, dims: usize) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO collections (name, embedding_model, dims, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(model)
        .bind(dims as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT embedding_model, dims FROM collections WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        let existing_model: String = row.get("embedding_model");
        let existing_dims: i64 = row.get("dims");

        if existing_model != model || existing_dims as usize != dims {
            bail!(
                "collection '{}' uses embedding model {} ({} dims), not {} ({} dims); reset it to switch models",
                name,
                existing_model,
                existing_dims,
                model,
                dims
            );
        }

        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM records WHERE collection = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert(&self, collection: &str, records: &[Record]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let dims: Option<i64> = sqlx::query_scalar("SELECT dims FROM collections WHERE name = ?")
            .bind(collection)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(dims) = dims else {
            bail!("collection '{}' does not exist", collection);
        };

        for record in records {
            if record.embedding.len() != dims as usize {
                bail!(
                    "embedding for '{}' has {} dims, collection '{}' expects {}",
                    record.id,
                    record.embedding.len(),
                    collection,
                    dims
                );
            }

            let metadata_json = serde_json::to_string(&record.metadata)?;
            let blob = vec_to_blob(&record.embedding);

            // UNIQUE(collection, id) rejects duplicates; dropping the
            // transaction on error rolls back the whole batch.
            sqlx::query(
                r#"
                INSERT INTO records (collection, id, document, metadata_json, embedding)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(collection)
            .bind(&record.id)
            .bind(&record.document)
            .bind(&metadata_json)
            .bind(&blob)
            .execute(&mut *tx)
            .await
            .with_context(|| {
                format!("failed to insert '{}' into '{}'", record.id, collection)
            })?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn query(
        &self,
        collection: &str,
        query_vec: &[f32],
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<Match>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document, metadata_json, embedding
            FROM records
            WHERE collection = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let mut matches = Vec::new();
        for row in &rows {
            let id: String = row.get("id");
            let raw: String = row.get("metadata_json");
            let metadata = parse_metadata(&raw, &id)?;
            if !filter.matches(&metadata) {
                continue;
            }
            let blob: Vec<u8> = row.get("embedding");
            matches.push(Match {
                distance: cosine_distance(query_vec, &blob_to_vec(&blob)),
                record: StoredRecord {
                    id,
                    document: row.get("document"),
                    metadata,
                },
            });
        }

        Ok(rank_matches(matches, limit))
    }

    async fn get(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<StoredRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document, metadata_json
            FROM records
            WHERE collection = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let limit = limit.unwrap_or(usize::MAX);
        let mut records = Vec::new();
        for row in &rows {
            if records.len() >= limit {
                break;
            }
            let id: String = row.get("id");
            let raw: String = row.get("metadata_json");
            let metadata = parse_metadata(&raw, &id)?;
            if filter.matches(&metadata) {
                records.push(StoredRecord {
                    id,
                    document: row.get("document"),
                    metadata,
                });
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_db_path(dir.path().join("data").join("sca.sqlite"));
        let store = SqliteStore::open(&config).await.unwrap();
        (dir, store)
    }

    fn record(id: &str, embedding: Vec<f32>, severity: i64) -> Record {
        let mut metadata = Metadata::new();
        metadata.insert("severity".to_string(), json!(severity));
        Record {
            id: id.to_string(),
            document: format!("doc {}", id),
            metadata,
            embedding,
        }
    }

    #[tokio::test]
    async fn test_roundtrip_and_order() {
        let (_dir, store) = temp_store().await;
        store.ensure_collection("c", "m", 2).await.unwrap();
        store
            .insert(
                "c",
                &[record("a", vec![0.0, 1.0], 1), record("b", vec![1.0, 0.0], 4)],
            )
            .await
            .unwrap();

        assert_eq!(store.count("c").await.unwrap(), 2);

        let all = store.get("c", &Filter::new(), None).await.unwrap();
        assert_eq!(all[0].id, "a");
        assert_eq!(all[1].id, "b");
        assert_eq!(all[1].metadata.get("severity"), Some(&json!(4)));

        let hits = store
            .query("c", &[1.0, 0.0], 1, &Filter::new().gte("severity", 3.0))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "b");
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_duplicate_rolls_back_batch() {
        let (_dir, store) = temp_store().await;
        store.ensure_collection("c", "m", 2).await.unwrap();
        store.insert("c", &[record("a", vec![1.0, 0.0], 0)]).await.unwrap();

        let result = store
            .insert(
                "c",
                &[record("b", vec![1.0, 0.0], 0), record("a", vec![1.0, 0.0], 0)],
            )
            .await;
        assert!(result.is_err());
        assert_eq!(store.count("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_collections_are_independent() {
        let (_dir, store) = temp_store().await;
        store.ensure_collection("one", "m", 2).await.unwrap();
        store.ensure_collection("two", "m", 2).await.unwrap();
        store.insert("one", &[record("a", vec![1.0, 0.0], 0)]).await.unwrap();
        store.insert("two", &[record("a", vec![1.0, 0.0], 0)]).await.unwrap();

        store.delete_collection("one").await.unwrap();
        assert_eq!(store.count("one").await.unwrap(), 0);
        assert_eq!(store.count("two").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insert_into_missing_collection_fails() {
        let (_dir, store) = temp_store().await;
        let err = store
            .insert("nope", &[record("a", vec![1.0, 0.0], 0)])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_model_pinned_per_collection() {
        let (_dir, store) = temp_store().await;
        store.ensure_collection("c", "hashing", 384).await.unwrap();
        assert!(store.ensure_collection("c", "other", 384).await.is_err());
        store.delete_collection("c").await.unwrap();
        assert!(store.ensure_collection("c", "other", 384).await.is_ok());
    }
}
