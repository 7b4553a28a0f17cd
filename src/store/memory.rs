//! In-memory [`VectorStore`] implementation for tests.
//!
//! All collections live in one `HashMap` behind a `std::sync::RwLock`, so
//! every read sees a consistent snapshot. Vector search is brute-force cosine
//! similarity over the collection.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_distance;

use super::{rank_matches, Filter, Match, Record, StoredRecord, VectorStore};

struct MemCollection {
    model: String,
    dims: usize,
    records: Vec<Record>,
}

#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, MemCollection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, MemCollection>>> {
        self.collections
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, MemCollection>>> {
        self.collections
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

fn stored(record: &Record) -> StoredRecord {
    StoredRecord {
        id: record.id.clone(),
        document: record.document.clone(),
        metadata: record.metadata.clone(),
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn ensure_collection(&self, name: &str, model: &str, dims: usize) -> Result<()> {
        let mut collections = self.write()?;
        match collections.get(name) {
            Some(existing) if existing.model != model || existing.dims != dims => bail!(
                "collection '{}' uses embedding model {} ({} dims), not {} ({} dims)",
                name,
                existing.model,
                existing.dims,
                model,
                dims
            ),
            Some(_) => {}
            None => {
                collections.insert(
                    name.to_string(),
                    MemCollection {
                        model: model.to_string(),
                        dims,
                        records: Vec::new(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.write()?.remove(name);
        Ok(())
    }

    async fn insert(&self, collection: &str, records: &[Record]) -> Result<()> {
        let mut collections = self.write()?;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| anyhow!("collection '{}' does not exist", collection))?;

        // Validate the whole batch before touching the collection.
        let mut seen: HashSet<&str> = target.records.iter().map(|r| r.id.as_str()).collect();
        for record in records {
            if record.embedding.len() != target.dims {
                bail!(
                    "embedding for '{}' has {} dims, collection '{}' expects {}",
                    record.id,
                    record.embedding.len(),
                    collection,
                    target.dims
                );
            }
            if !seen.insert(record.id.as_str()) {
                bail!("duplicate id '{}' in collection '{}'", record.id, collection);
            }
        }

        target.records.extend(records.iter().cloned());
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        Ok(self
            .read()?
            .get(collection)
            .map(|c| c.records.len())
            .unwrap_or(0))
    }

    async fn query(
        &self,
        collection: &str,
        query_vec: &[f32],
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<Match>> {
        let collections = self.read()?;
        let Some(target) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let matches = target
            .records
            .iter()
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| Match {
                record: stored(r),
                distance: cosine_distance(query_vec, &r.embedding),
            })
            .collect();

        Ok(rank_matches(matches, limit))
    }

    async fn get(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<StoredRecord>> {
        let collections = self.read()?;
        let Some(target) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        Ok(target
            .records
            .iter()
            .filter(|r| filter.matches(&r.metadata))
            .take(limit.unwrap_or(usize::MAX))
            .map(stored)
            .collect())
    }
}
