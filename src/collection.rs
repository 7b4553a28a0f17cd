//! Named vector collection: the adapter the service layer talks to.
//!
//! A [`Collection`] pairs a [`VectorStore`] with an [`Embedder`]. Documents
//! are embedded on write; queries are embedded on search. Every mutating call
//! has been persisted by the store when it returns.

use std::sync::Arc;

use tracing::debug;

use crate::embedding::{embed_query, Embedder};
use crate::error::{Error, Result};
use crate::models::{CollectionStats, Metadata, SearchResult};
use crate::store::{Filter, Record, StoredRecord, VectorStore};

/// Which optional fields a filtered read returns. Ids are always returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Include {
    pub documents: bool,
    pub metadatas: bool,
}

impl Include {
    pub const ALL: Include = Include {
        documents: true,
        metadatas: true,
    };
    pub const METADATAS: Include = Include {
        documents: false,
        metadatas: true,
    };
}

#[derive(Clone)]
pub struct Collection {
    name: String,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl Collection {
    /// Open (creating if needed) the collection `name`, pinned to the
    /// embedder's model.
    pub async fn open(
        name: impl Into<String>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let collection = Self {
            name: name.into(),
            store,
            embedder,
        };
        collection
            .store
            .ensure_collection(
                &collection.name,
                collection.embedder.model_name(),
                collection.embedder.dims(),
            )
            .await?;
        Ok(collection)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Embed and append documents. The three slices are positionally aligned
    /// and must have equal lengths.
    pub async fn add(&self, documents: &[String], metadatas: &[Metadata], ids: &[String]) -> Result<()> {
        if documents.len() != metadatas.len() || documents.len() != ids.len() {
            return Err(Error::validation(format!(
                "documents ({}), metadatas ({}), and ids ({}) must have the same length",
                documents.len(),
                metadatas.len(),
                ids.len()
            )));
        }
        if documents.is_empty() {
            return Ok(());
        }

        let embeddings = self.embedder.embed(documents).await?;
        if embeddings.len() != documents.len() {
            return Err(Error::Upstream(anyhow::anyhow!(
                "embedding provider returned {} vectors for {} documents",
                embeddings.len(),
                documents.len()
            )));
        }

        let records: Vec<Record> = documents
            .iter()
            .zip(metadatas)
            .zip(ids)
            .zip(embeddings)
            .map(|(((document, metadata), id), embedding)| Record {
                id: id.clone(),
                document: document.clone(),
                metadata: metadata.clone(),
                embedding,
            })
            .collect();

        self.store.insert(&self.name, &records).await?;
        debug!(collection = %self.name, added = records.len(), "records added");
        Ok(())
    }

    /// Nearest `limit` records to `query`, optionally filtered.
    ///
    /// A blank query matches everything: the first `limit` matching records
    /// in insertion order, each with distance `0.0`.
    pub async fn search(&self, query: &str, limit: usize, filter: Option<&Filter>) -> Result<SearchResult> {
        let empty = Filter::new();
        let filter = filter.unwrap_or(&empty);

        if query.trim().is_empty() {
            let records = self.store.get(&self.name, filter, Some(limit)).await?;
            let distances = vec![0.0; records.len()];
            let mut result = to_result(records, Include::ALL);
            result.distances = distances;
            return Ok(result);
        }

        let query_vec = embed_query(self.embedder.as_ref(), query).await?;
        let matches = self.store.query(&self.name, &query_vec, limit, filter).await?;

        let mut result = SearchResult::default();
        for m in matches {
            result.ids.push(m.record.id);
            result.documents.push(m.record.document);
            result.metadatas.push(m.record.metadata);
            result.distances.push(m.distance);
        }
        Ok(result)
    }

    /// Every record matching `filter`, in insertion order, without distances.
    pub async fn get_by_filter(&self, filter: &Filter, include: Include) -> Result<SearchResult> {
        let records = self.store.get(&self.name, filter, None).await?;
        Ok(to_result(records, include))
    }

    /// The full corpus in one read.
    pub async fn get_all(&self) -> Result<SearchResult> {
        self.get_by_filter(&Filter::new(), Include::ALL).await
    }

    /// Drop every record and recreate the collection with the same name and
    /// embedding model.
    pub async fn reset(&self) -> Result<()> {
        self.store.delete_collection(&self.name).await?;
        self.store
            .ensure_collection(&self.name, self.embedder.model_name(), self.embedder.dims())
            .await?;
        debug!(collection = %self.name, "collection reset");
        Ok(())
    }

    pub async fn stats(&self) -> Result<CollectionStats> {
        Ok(CollectionStats {
            count: self.store.count(&self.name).await?,
            name: self.name.clone(),
        })
    }
}

fn to_result(records: Vec<StoredRecord>, include: Include) -> SearchResult {
    let mut result = SearchResult::default();
    for record in records {
        result.ids.push(record.id);
        if include.documents {
            result.documents.push(record.document);
        }
        if include.metadatas {
            result.metadatas.push(record.metadata);
        }
    }
    result
}
