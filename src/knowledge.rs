//! Curated security-pattern knowledge base.
//!
//! Items are stored in their own collection with a fixed metadata schema
//! ([`KnowledgeMetadata`]). Writes are validated before anything reaches the
//! store; searches combine semantic similarity with optional metadata
//! filters.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::collection::{Collection, Include};
use crate::error::{Error, Result};
use crate::models::{
    to_metadata, unknown_category, KnowledgeItem, KnowledgeMetadata, KnowledgeStats,
    NewKnowledgeItem, SearchResult,
};
use crate::store::Filter;

pub const MAX_SEVERITY: i64 = 5;

/// Filtered knowledge search. Empty strings count as "not provided".
#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeQuery {
    pub query: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub pattern_type: Option<String>,
    #[serde(default)]
    pub min_severity: Option<u8>,
    #[serde(default)]
    pub standard: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    5
}

impl KnowledgeQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            category: None,
            pattern_type: None,
            min_severity: None,
            standard: None,
            limit: default_limit(),
        }
    }

    /// One equality condition per provided field; `min_severity` becomes a
    /// `>=` condition. A severity floor of 0 excludes nothing and is omitted.
    pub fn filter(&self) -> Filter {
        let mut filter = Filter::new();
        for (key, value) in [
            ("category", &self.category),
            ("pattern_type", &self.pattern_type),
            ("standard", &self.standard),
        ] {
            if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                filter = filter.eq(key, v);
            }
        }
        if let Some(min) = self.min_severity.filter(|m| *m > 0) {
            filter = filter.gte("severity", f64::from(min));
        }
        filter
    }
}

#[derive(Clone)]
pub struct KnowledgeBase {
    collection: Collection,
}

impl KnowledgeBase {
    pub fn new(collection: Collection) -> Self {
        Self { collection }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Validate and store one item.
    pub async fn add_item(&self, item: NewKnowledgeItem) -> Result<KnowledgeItem> {
        let mut added = self.add_items(vec![item]).await?;
        added
            .pop()
            .ok_or_else(|| Error::Upstream(anyhow::anyhow!("knowledge item was not stored")))
    }

    /// Validate every item, then store them as one batch. An invalid item
    /// rejects the whole batch before the store is touched.
    pub async fn add_items(&self, items: Vec<NewKnowledgeItem>) -> Result<Vec<KnowledgeItem>> {
        let last_updated = Utc::now().to_rfc3339();
        let mut prepared = Vec::with_capacity(items.len());
        for (position, item) in items.into_iter().enumerate() {
            prepared.push(prepare(position, item, &last_updated)?);
        }

        let mut documents = Vec::with_capacity(prepared.len());
        let mut metadatas = Vec::with_capacity(prepared.len());
        let mut ids = Vec::with_capacity(prepared.len());
        for (content, item) in &prepared {
            documents.push(content.clone());
            metadatas.push(to_metadata(&item.metadata)?);
            ids.push(item.id.clone());
        }

        self.collection.add(&documents, &metadatas, &ids).await?;
        info!(added = prepared.len(), collection = self.collection.name(), "knowledge items added");

        Ok(prepared.into_iter().map(|(_, item)| item).collect())
    }

    pub async fn search(&self, query: &KnowledgeQuery) -> Result<SearchResult> {
        if let Some(min) = query.min_severity {
            if i64::from(min) > MAX_SEVERITY {
                return Err(Error::validation(format!(
                    "min_severity must be between 0 and {}, got {}",
                    MAX_SEVERITY, min
                )));
            }
        }
        let filter = query.filter();
        self.collection
            .search(&query.query, query.limit, Some(&filter))
            .await
    }

    /// Item count plus a tally per category, from one full read.
    pub async fn stats(&self) -> Result<KnowledgeStats> {
        let all = self
            .collection
            .get_by_filter(&Filter::new(), Include::METADATAS)
            .await?;

        let mut categories: BTreeMap<String, usize> = BTreeMap::new();
        for metadata in &all.metadatas {
            let category = metadata
                .get("category")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(unknown_category);
            *categories.entry(category).or_insert(0) += 1;
        }

        Ok(KnowledgeStats {
            count: all.len(),
            name: self.collection.name().to_string(),
            categories,
        })
    }

    pub async fn reset(&self) -> Result<()> {
        self.collection.reset().await
    }
}

fn prepare(
    position: usize,
    item: NewKnowledgeItem,
    last_updated: &str,
) -> Result<(String, KnowledgeItem)> {
    if !(0..=MAX_SEVERITY).contains(&item.severity) {
        return Err(Error::validation(format!(
            "severity must be between 0 and {}, got {} (item {})",
            MAX_SEVERITY, item.severity, position
        )));
    }
    if item.content.trim().is_empty() {
        return Err(Error::validation(format!(
            "knowledge item {} has empty content",
            position
        )));
    }

    let references = match &item.references {
        Some(refs) => Some(serde_json::to_string(refs).map_err(anyhow::Error::from)?),
        None => None,
    };

    let metadata = KnowledgeMetadata {
        category: item.category,
        pattern_type: item.pattern_type,
        severity: item.severity as u8,
        standard: item.standard,
        version: item.version,
        references,
        code_example: item.code_example,
        description: item.description,
        last_updated: last_updated.to_string(),
    };

    Ok((
        item.content,
        KnowledgeItem {
            id: format!("kb_{}", Uuid::new_v4()),
            metadata,
        },
    ))
}

/// Parse a knowledge seed file: either one item object or an array of them.
pub fn parse_items(json: &str) -> anyhow::Result<Vec<NewKnowledgeItem>> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    Ok(match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)?,
        other => vec![serde_json::from_value(other)?],
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::store::memory::InMemoryStore;

    async fn kb() -> KnowledgeBase {
        let collection = Collection::open(
            "kb",
            Arc::new(InMemoryStore::new()),
            Arc::new(HashingEmbedder::default()),
        )
        .await
        .unwrap();
        KnowledgeBase::new(collection)
    }

    fn item(content: &str, category: &str, severity: i64) -> NewKnowledgeItem {
        NewKnowledgeItem {
            content: content.to_string(),
            category: category.to_string(),
            pattern_type: "pattern".to_string(),
            severity,
            ..NewKnowledgeItem::default()
        }
    }

    #[tokio::test]
    async fn test_severity_out_of_range_rejected_without_mutation() {
        let kb = kb().await;
        for severity in [-1, 6] {
            let err = kb.add_item(item("x", "vulnerability", severity)).await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }
        assert_eq!(kb.stats().await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_severity_bounds_accepted() {
        let kb = kb().await;
        let low = kb.add_item(item("low", "info", 0)).await.unwrap();
        let high = kb.add_item(item("high", "vulnerability", 5)).await.unwrap();
        assert_eq!(low.metadata.severity, 0);
        assert_eq!(high.metadata.severity, 5);
        assert!(high.id.starts_with("kb_"));
        assert_eq!(kb.stats().await.unwrap().count, 2);
    }

    #[tokio::test]
    async fn test_references_stored_as_json_string() {
        let kb = kb().await;
        let added = kb
            .add_item(NewKnowledgeItem {
                references: Some(vec!["https://swcregistry.io/docs/SWC-107".to_string()]),
                ..item("Reentrancy guard pattern", "vulnerability", 5)
            })
            .await
            .unwrap();
        assert_eq!(
            added.metadata.references.as_deref(),
            Some(r#"["https://swcregistry.io/docs/SWC-107"]"#)
        );

        let stored = kb.collection().get_all().await.unwrap();
        assert_eq!(
            stored.metadatas[0].get("references").and_then(|v| v.as_str()),
            Some(r#"["https://swcregistry.io/docs/SWC-107"]"#)
        );
    }

    #[tokio::test]
    async fn test_search_filters_by_category_and_severity() {
        let kb = kb().await;
        kb.add_items(vec![
            item("reentrancy in withdraw functions", "vulnerability", 5),
            item("integer overflow in token math", "vulnerability", 2),
            item("use checks effects interactions", "best_practice", 4),
        ])
        .await
        .unwrap();

        let mut query = KnowledgeQuery::new("withdraw");
        query.category = Some("vulnerability".to_string());
        let result = kb.search(&query).await.unwrap();
        assert_eq!(result.len(), 2);
        assert!(result
            .metadatas
            .iter()
            .all(|m| m.get("category").and_then(|v| v.as_str()) == Some("vulnerability")));

        let mut query = KnowledgeQuery::new("withdraw");
        query.min_severity = Some(3);
        let result = kb.search(&query).await.unwrap();
        assert_eq!(result.len(), 2);
        assert!(result
            .metadatas
            .iter()
            .all(|m| m.get("severity").and_then(|v| v.as_u64()).unwrap_or(0) >= 3));
    }

    #[tokio::test]
    async fn test_min_severity_above_max_rejected() {
        let kb = kb().await;
        kb.add_item(item("reentrancy", "vulnerability", 5)).await.unwrap();

        let mut query = KnowledgeQuery::new("reentrancy");
        query.min_severity = Some(6);
        assert!(matches!(
            kb.search(&query).await.unwrap_err(),
            Error::Validation(_)
        ));

        query.min_severity = Some(5);
        assert_eq!(kb.search(&query).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_filter_values_are_ignored() {
        let kb = kb().await;
        kb.add_item(item("anything", "vulnerability", 1)).await.unwrap();
        let mut query = KnowledgeQuery::new("anything");
        query.category = Some(String::new());
        query.min_severity = Some(0);
        assert!(query.filter().is_empty());
        assert_eq!(kb.search(&query).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stats_tallies_categories() {
        let kb = kb().await;
        kb.add_items(vec![item("a1", "A", 1), item("a2", "A", 1), item("b1", "B", 1)])
            .await
            .unwrap();
        let stats = kb.stats().await.unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.name, "kb");
        assert_eq!(stats.categories.get("A"), Some(&2));
        assert_eq!(stats.categories.get("B"), Some(&1));
    }

    #[tokio::test]
    async fn test_invalid_item_rejects_batch() {
        let kb = kb().await;
        let err = kb
            .add_items(vec![item("ok", "A", 1), item("bad", "A", 9)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(kb.stats().await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_reset_twice() {
        let kb = kb().await;
        kb.add_item(item("a", "A", 1)).await.unwrap();
        kb.reset().await.unwrap();
        assert_eq!(kb.stats().await.unwrap().count, 0);
        kb.reset().await.unwrap();
        assert_eq!(kb.stats().await.unwrap().count, 0);
    }

    #[test]
    fn test_parse_items_accepts_object_or_array() {
        let one = parse_items(r#"{"content":"c","category":"A","pattern_type":"p","severity":3}"#)
            .unwrap();
        assert_eq!(one.len(), 1);
        let many = parse_items(
            r#"[{"content":"c","category":"A","pattern_type":"p"},{"content":"d","category":"B","pattern_type":"q","severity":1}]"#,
        )
        .unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many[0].severity, 0);
    }
}
