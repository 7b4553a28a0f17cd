//! Retrieval-augmented question answering over stored contracts.
//!
//! A question is answered in one pass: the nearest contract chunks and the
//! nearest knowledge-base items are retrieved, rendered into one context
//! block (contract hits first, then knowledge hits, each in distance order),
//! and sent to the LLM under a fixed analyst prompt. The model's reply is
//! returned as-is.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::chunk::Chunker;
use crate::collection::Collection;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::knowledge::KnowledgeBase;
use crate::llm::{CompletionRequest, LlmClient};
use crate::models::{to_metadata, CollectionStats, Metadata};
use crate::store::Filter;

/// Analyst instructions that open every question-answering system prompt.
pub const RAG_GUIDELINES: &str = "You are an expert smart contract analyzer. Your task is to answer questions about smart contracts based on the provided context.

Guidelines:
1. Use both the contract context and knowledge base context to provide comprehensive answers
2. Highlight any security concerns or best practices from the knowledge base
3. If a vulnerability is mentioned, include its severity and potential impact
4. When possible, provide code examples from the knowledge base
5. If the context doesn't contain enough information, say so
6. Be precise and technical in your explanations
7. Explain complex concepts in a clear and structured way";

/// Guidelines followed by the retrieved context and the question.
///
/// Both values are inserted verbatim; braces inside retrieved text are never
/// treated as placeholders.
pub fn system_prompt(context: &str, question: &str) -> String {
    format!(
        "{}\n\nContext: {}\n\nQuestion: {}",
        RAG_GUIDELINES, context, question
    )
}

fn str_field<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// `From Contract <name> (Functions: a, b):\n<text>\n`
pub fn format_contract_entry(document: &str, metadata: &Metadata) -> String {
    let mut entry = format!(
        "From Contract {}",
        str_field(metadata, "contract_name").unwrap_or("Unknown")
    );

    let functions: Vec<&str> = metadata
        .get("functions")
        .and_then(Value::as_array)
        .map(|fs| fs.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if !functions.is_empty() {
        entry.push_str(&format!(" (Functions: {})", functions.join(", ")));
    }

    entry.push_str(&format!(":\n{}\n", document));
    entry
}

/// `Knowledge Base (<category>) [Severity: n/5]`, optional example and
/// description, then `:\n<content>\n`.
pub fn format_knowledge_entry(document: &str, metadata: &Metadata) -> String {
    let mut entry = format!(
        "Knowledge Base ({})",
        str_field(metadata, "category").unwrap_or("Unknown")
    );

    if let Some(severity) = metadata
        .get("severity")
        .and_then(Value::as_u64)
        .filter(|s| *s > 0)
    {
        entry.push_str(&format!(" [Severity: {}/5]", severity));
    }
    if let Some(code) = str_field(metadata, "code_example") {
        entry.push_str(&format!("\nExample Implementation:\n{}", code));
    }
    if let Some(description) = str_field(metadata, "description") {
        entry.push_str(&format!("\nDescription: {}", description));
    }

    entry.push_str(&format!(":\n{}\n", document));
    entry
}

pub struct RagEngine {
    contracts: Collection,
    knowledge: KnowledgeBase,
    chunker: Chunker,
    llm: Arc<dyn LlmClient>,
    contract_k: usize,
    knowledge_k: usize,
    temperature: f32,
    max_tokens: u32,
}

impl RagEngine {
    pub fn new(
        config: &Config,
        contracts: Collection,
        knowledge: KnowledgeBase,
        llm: Arc<dyn LlmClient>,
    ) -> Result<Self> {
        Ok(Self {
            contracts,
            knowledge,
            chunker: Chunker::from_config(&config.chunking)?,
            llm,
            contract_k: config.retrieval.contract_k,
            knowledge_k: config.retrieval.knowledge_k,
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
        })
    }

    /// Chunk a contract and store the chunks. Returns the contract
    /// collection's stats afterwards.
    pub async fn add_contract(
        &self,
        contract_text: &str,
        contract_name: &str,
        contract_address: Option<&str>,
        network: Option<&str>,
    ) -> Result<CollectionStats> {
        if contract_name.trim().is_empty() {
            return Err(Error::validation("contract_name must not be empty"));
        }
        if contract_text.trim().is_empty() {
            return Err(Error::validation("contract_text must not be empty"));
        }

        let chunks = self
            .chunker
            .process(contract_text, contract_name, contract_address, network);

        let mut documents = Vec::with_capacity(chunks.len());
        let mut metadatas = Vec::with_capacity(chunks.len());
        let mut ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            metadatas.push(to_metadata(&chunk.metadata)?);
            documents.push(chunk.text);
            ids.push(chunk.id);
        }

        self.contracts.add(&documents, &metadatas, &ids).await?;
        info!(
            contract = contract_name,
            chunks = documents.len(),
            chars = contract_text.chars().count(),
            "contract added"
        );

        self.contracts.stats().await
    }

    /// Retrieve and render the context block for `question`.
    pub async fn build_context(&self, question: &str, contract_name: Option<&str>) -> Result<String> {
        let contract_filter = contract_name
            .filter(|n| !n.is_empty())
            .map(|n| Filter::new().eq("contract_name", n));

        let contract_hits = self
            .contracts
            .search(question, self.contract_k, contract_filter.as_ref())
            .await?;
        let knowledge_hits = self
            .knowledge
            .collection()
            .search(question, self.knowledge_k, None)
            .await?;

        let mut parts = Vec::with_capacity(contract_hits.len() + knowledge_hits.len());
        for (document, metadata) in contract_hits.documents.iter().zip(&contract_hits.metadatas) {
            parts.push(format_contract_entry(document, metadata));
        }
        for (document, metadata) in knowledge_hits.documents.iter().zip(&knowledge_hits.metadatas) {
            parts.push(format_knowledge_entry(document, metadata));
        }

        info!(
            contract_hits = contract_hits.len(),
            knowledge_hits = knowledge_hits.len(),
            "context retrieved"
        );
        Ok(parts.join("\n\n"))
    }

    /// Answer `question`, optionally restricted to one stored contract.
    pub async fn answer(&self, question: &str, contract_name: Option<&str>) -> Result<String> {
        if question.trim().is_empty() {
            return Err(Error::validation("question must not be empty"));
        }

        let context = self.build_context(question, contract_name).await?;
        let request = CompletionRequest {
            system: Some(system_prompt(&context, question)),
            prompt: question.to_string(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let answer = self.llm.complete(&request).await?;
        info!(answer_chars = answer.chars().count(), "question answered");
        Ok(answer)
    }
}
