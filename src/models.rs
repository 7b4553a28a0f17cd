//! Core data models used throughout the analyzer.
//!
//! These types represent the chunks, knowledge items, search results, and
//! clause analyses that flow through the ingestion, retrieval, and analysis
//! pipelines. Records are stored in the vector store as `(id, document,
//! metadata)` triples; the typed metadata structs here convert to and from the
//! untyped [`Metadata`] map the store persists.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Untyped metadata map attached to every stored record.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Serialize a typed metadata struct into a [`Metadata`] map.
pub fn to_metadata<T: Serialize>(value: &T) -> Result<Metadata> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map),
        other => bail!("metadata must serialize to a JSON object, got {}", other),
    }
}

/// Deserialize a [`Metadata`] map back into a typed struct.
pub fn from_metadata<T: DeserializeOwned>(metadata: &Metadata) -> Result<T> {
    Ok(serde_json::from_value(serde_json::Value::Object(
        metadata.clone(),
    ))?)
}

/// Value of the `source` metadata key on contract chunks.
pub const CHUNK_SOURCE: &str = "smart_contract";

/// Metadata stored alongside each contract chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub contract_name: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// Character offset of the chunk within the source text.
    pub start_offset: usize,
    pub source: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Function signatures found in the chunk text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<String>,
}

/// A chunk of a contract's text, ready to be written to the vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Length of the chunk in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Input fields for a new knowledge-base item.
///
/// `severity` is signed so that out-of-range input reaches validation
/// instead of failing deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewKnowledgeItem {
    pub content: String,
    pub category: String,
    pub pattern_type: String,
    #[serde(default)]
    pub severity: i64,
    #[serde(default)]
    pub standard: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub references: Option<Vec<String>>,
    #[serde(default)]
    pub code_example: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Metadata stored alongside each knowledge-base item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeMetadata {
    #[serde(default = "unknown_category")]
    pub category: String,
    #[serde(default)]
    pub pattern_type: String,
    #[serde(default)]
    pub severity: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// JSON-encoded list of reference links.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_example: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub last_updated: String,
}

pub(crate) fn unknown_category() -> String {
    "unknown".to_string()
}

impl KnowledgeMetadata {
    /// Decode the JSON-encoded reference list, if any.
    pub fn reference_list(&self) -> Result<Vec<String>> {
        match &self.references {
            Some(encoded) => Ok(serde_json::from_str(encoded)?),
            None => Ok(Vec::new()),
        }
    }
}

/// A stored knowledge-base item, as returned from `add_item`.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeItem {
    pub id: String,
    pub metadata: KnowledgeMetadata,
}

/// Positionally aligned query results: `documents[i]`, `metadatas[i]`,
/// `ids[i]`, and `distances[i]` describe the same record.
///
/// `distances` is empty for plain filter reads.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResult {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<Metadata>,
    pub distances: Vec<f32>,
}

impl SearchResult {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    pub count: usize,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnowledgeStats {
    pub count: usize,
    pub name: String,
    pub categories: BTreeMap<String, usize>,
}

/// Aggregated view of one stored contract, rebuilt from its chunks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContractSummary {
    pub name: String,
    pub address: Option<String>,
    pub network: Option<String>,
    pub added_at: String,
    pub last_analyzed: Option<String>,
    pub function_signatures: Vec<String>,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskFlag {
    Yes,
    No,
}

/// One clause of a contract as explained by the LLM.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClauseAnalysis {
    pub clause_number: i64,
    pub original_clause: String,
    pub explanation: String,
    pub risk_flag: RiskFlag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_reason: Option<String>,
}
