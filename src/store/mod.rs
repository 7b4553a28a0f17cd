//! Storage abstraction for named vector collections.
//!
//! The [`VectorStore`] trait defines every storage operation the
//! [`Collection`](crate::collection::Collection) adapter needs, so the service
//! layer runs unchanged against SQLite ([`sqlite::SqliteStore`]) or memory
//! ([`memory::InMemoryStore`], used by tests).
//!
//! A collection holds `(id, document, metadata, embedding)` records and is
//! pinned to the embedding model and dimensionality it was created with.
//! Reads return records in insertion order; similarity queries return them by
//! increasing cosine distance.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::models::Metadata;

/// One predicate on a metadata key.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// The key is present and equal to the value.
    Eq(Value),
    /// The key is present, numeric, and at least the threshold.
    Gte(f64),
}

/// Conjunction of metadata conditions. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Condition)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push((key.into(), Condition::Eq(value.into())));
        self
    }

    pub fn gte(mut self, key: impl Into<String>, threshold: f64) -> Self {
        self.conditions.push((key.into(), Condition::Gte(threshold)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> &[(String, Condition)] {
        &self.conditions
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.conditions.iter().all(|(key, condition)| {
            let Some(value) = metadata.get(key) else {
                return false;
            };
            match condition {
                Condition::Eq(expected) => value == expected,
                Condition::Gte(threshold) => value.as_f64().is_some_and(|v| v >= *threshold),
            }
        })
    }
}

/// A record to be written, with its precomputed embedding.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

/// A record as read back (embedding omitted).
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
}

/// A similarity hit: the record and its cosine distance to the query.
#[derive(Debug, Clone)]
pub struct Match {
    pub record: StoredRecord,
    pub distance: f32,
}

/// Sort hits by ascending distance and keep the first `limit`. The sort is
/// stable, so equal distances keep insertion order.
pub(crate) fn rank_matches(mut matches: Vec<Match>, limit: usize) -> Vec<Match> {
    matches.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    matches.truncate(limit);
    matches
}

/// Abstract storage backend for vector collections.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_collection`](VectorStore::ensure_collection) | Create a collection if missing |
/// | [`delete_collection`](VectorStore::delete_collection) | Drop a collection and its records |
/// | [`insert`](VectorStore::insert) | Append a batch of records atomically |
/// | [`count`](VectorStore::count) | Number of records |
/// | [`query`](VectorStore::query) | Filtered cosine-similarity search |
/// | [`get`](VectorStore::get) | Filtered read in insertion order |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if it does not exist. Fails if it exists with a
    /// different embedding model or dimensionality.
    async fn ensure_collection(&self, name: &str, model: &str, dims: usize) -> Result<()>;

    /// Remove the collection and all of its records. Missing collections are
    /// not an error.
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Append records. Either every record is stored or none is; duplicate
    /// ids (within the batch or against stored records) fail the batch.
    async fn insert(&self, collection: &str, records: &[Record]) -> Result<()>;

    async fn count(&self, collection: &str) -> Result<usize>;

    /// Records matching `filter`, nearest first, at most `limit`.
    async fn query(
        &self,
        collection: &str,
        query_vec: &[f32],
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<Match>>;

    /// Records matching `filter` in insertion order, all of them when `limit`
    /// is `None`. A single snapshot read.
    async fn get(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<StoredRecord>>;
}
