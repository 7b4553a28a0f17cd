//! LLM-driven clause extraction and risk flagging.
//!
//! The whole document (truncated to `analysis.max_chars` characters) is sent
//! to the LLM with instructions to answer with a JSON array of clause
//! objects. Models often wrap that array in prose or code fences, so the
//! response is scanned for balanced `[...]` spans; the first span that parses
//! as an array of objects is validated field by field into
//! [`ClauseAnalysis`] records.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::collection::{Collection, Include};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::llm::{CompletionRequest, LlmClient};
use crate::models::{from_metadata, ChunkMetadata, ClauseAnalysis, RiskFlag};
use crate::store::Filter;

const REQUIRED_FIELDS: [&str; 4] = ["clause_number", "original_clause", "explanation", "risk_flag"];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClauseError {
    #[error("no JSON array found in LLM response")]
    NoArrayFound,

    #[error("malformed JSON in LLM response: {0}")]
    MalformedJson(String),

    #[error("clause {index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("clause {index} has invalid '{field}': {reason}")]
    InvalidField {
        index: usize,
        field: &'static str,
        reason: String,
    },
}

pub struct ClauseExtractor {
    llm: Arc<dyn LlmClient>,
    max_chars: usize,
    temperature: f32,
    max_tokens: u32,
}

impl ClauseExtractor {
    pub fn new(llm: Arc<dyn LlmClient>, config: &Config) -> Self {
        Self {
            llm,
            max_chars: config.analysis.max_chars,
            temperature: config.llm.analysis_temperature,
            max_tokens: config.llm.max_tokens,
        }
    }

    /// The instructional prompt for `document_text`, truncated to the first
    /// `max_chars` characters.
    pub fn build_prompt(&self, document_text: &str) -> String {
        let truncated: String = document_text.chars().take(self.max_chars).collect();
        format!(
            r#"You are an expert legal analyst specializing in contract review for non-lawyers.
Your job is to make complex legal language accessible and highlight potential risks.

Analyze the following contract and break it down into numbered clauses.
For each significant clause, return a JSON object with the structure shown below.

Important guidelines:
1. Focus on the most important clauses (aim for 5-15 clauses total)
2. Skip boilerplate sections like signatures, dates, and standard formatting
3. Prioritize clauses that involve rights, obligations, payments, termination, liability, etc.
4. For risk_flag, use "Yes" only for genuine concerns that a non-lawyer should be aware of
5. Keep explanations clear and accessible to non-lawyers

Return ONLY a valid JSON array in this exact format:

[
  {{
    "clause_number": 1,
    "original_clause": "The exact text of the clause from the contract",
    "explanation": "Clear explanation in plain English of what this clause means",
    "risk_flag": "Yes or No",
    "risk_reason": "Explanation of the risk (only include if risk_flag is Yes)"
  }}
]

Contract text to analyze:

{truncated}
"#
        )
    }

    /// Ask the LLM to break `document_text` into annotated clauses.
    pub async fn extract_clauses(&self, document_text: &str) -> Result<Vec<ClauseAnalysis>> {
        if document_text.trim().is_empty() {
            return Err(Error::validation("document text is empty"));
        }

        let request = CompletionRequest {
            system: None,
            prompt: self.build_prompt(document_text),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        info!(model = self.llm.model_name(), "requesting clause analysis");
        let response = self.llm.complete(&request).await?;
        info!(response_chars = response.chars().count(), "clause analysis received");

        match parse_clauses(&response) {
            Ok(clauses) => {
                info!(clauses = clauses.len(), "parsed clauses");
                Ok(clauses)
            }
            Err(err) => {
                let preview: String = response.chars().take(500).collect();
                warn!(error = %err, raw_response = %preview, "could not parse clause analysis");
                Err(err.into())
            }
        }
    }

    /// Reassemble a stored contract from its chunks (ascending chunk index,
    /// joined by newlines) and analyze it.
    pub async fn analyze_stored(
        &self,
        contracts: &Collection,
        contract_name: &str,
    ) -> Result<Vec<ClauseAnalysis>> {
        let text = stored_contract_text(contracts, contract_name).await?;
        self.extract_clauses(&text).await
    }
}

/// The text of a stored contract rebuilt from its chunks.
pub async fn stored_contract_text(contracts: &Collection, contract_name: &str) -> Result<String> {
    let stored = contracts
        .get_by_filter(&Filter::new().eq("contract_name", contract_name), Include::ALL)
        .await?;
    if stored.is_empty() {
        return Err(Error::not_found(format!(
            "contract '{}' not found",
            contract_name
        )));
    }

    let mut chunks = Vec::with_capacity(stored.len());
    for (document, metadata) in stored.documents.into_iter().zip(&stored.metadatas) {
        let meta: ChunkMetadata = from_metadata(metadata)?;
        chunks.push((meta.chunk_index, document));
    }
    chunks.sort_by_key(|(index, _)| *index);

    Ok(chunks
        .into_iter()
        .map(|(_, text)| text)
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Extract and validate the clause array from a raw LLM response.
pub fn parse_clauses(response: &str) -> std::result::Result<Vec<ClauseAnalysis>, ClauseError> {
    let items = find_object_array(response)?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| validate_clause(index, item))
        .collect()
}

/// The first balanced `[...]` span that parses as an array of objects.
fn find_object_array(text: &str) -> std::result::Result<Vec<Map<String, Value>>, ClauseError> {
    let mut last_error: Option<String> = None;

    for (start, _) in text.match_indices('[') {
        let Some(end) = balanced_end(text, start) else {
            continue;
        };
        match serde_json::from_str::<Vec<Value>>(&text[start..end]) {
            Ok(values) => {
                let objects: Option<Vec<Map<String, Value>>> = values
                    .into_iter()
                    .map(|v| match v {
                        Value::Object(map) => Some(map),
                        _ => None,
                    })
                    .collect();
                match objects {
                    Some(objects) => return Ok(objects),
                    None => {
                        last_error = Some("expected an array of clause objects".to_string());
                    }
                }
            }
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    match last_error {
        Some(message) => Err(ClauseError::MalformedJson(message)),
        None => Err(ClauseError::NoArrayFound),
    }
}

/// Byte index one past the `]` closing the `[` at `start`, ignoring brackets
/// inside JSON strings.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn validate_clause(
    index: usize,
    item: &Map<String, Value>,
) -> std::result::Result<ClauseAnalysis, ClauseError> {
    for field in REQUIRED_FIELDS {
        if !item.contains_key(field) {
            return Err(ClauseError::MissingField { index, field });
        }
    }

    let clause_number = clause_number(&item["clause_number"]).ok_or_else(|| {
        ClauseError::InvalidField {
            index,
            field: "clause_number",
            reason: format!("expected an integer, got {}", item["clause_number"]),
        }
    })?;
    let original_clause = string_field(index, item, "original_clause")?;
    let explanation = string_field(index, item, "explanation")?;

    let flag = string_field(index, item, "risk_flag")?;
    let risk_flag = match flag.trim().to_ascii_lowercase().as_str() {
        "yes" => RiskFlag::Yes,
        "no" => RiskFlag::No,
        _ => {
            return Err(ClauseError::InvalidField {
                index,
                field: "risk_flag",
                reason: format!("expected \"Yes\" or \"No\", got {:?}", flag),
            })
        }
    };

    let risk_reason = match risk_flag {
        RiskFlag::No => None,
        RiskFlag::Yes => match item.get("risk_reason") {
            Some(Value::String(reason)) if !reason.trim().is_empty() => Some(reason.clone()),
            _ => {
                return Err(ClauseError::MissingField {
                    index,
                    field: "risk_reason",
                })
            }
        },
    };

    Ok(ClauseAnalysis {
        clause_number,
        original_clause,
        explanation,
        risk_flag,
        risk_reason,
    })
}

/// Integers, integral floats, and numeric strings are accepted.
fn clause_number(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_field(
    index: usize,
    item: &Map<String, Value>,
    field: &'static str,
) -> std::result::Result<String, ClauseError> {
    match &item[field] {
        Value::String(s) => Ok(s.clone()),
        other => Err(ClauseError::InvalidField {
            index,
            field,
            reason: format!("expected a string, got {}", other),
        }),
    }
}
