//! TOML configuration parsing and validation.
//!
//! All settings are read once at process start from a TOML file (default
//! `./config/sca.toml`). Credentials are not part of the file: the LLM key is
//! read from `ANTHROPIC_API_KEY` and the OpenAI embedding key from
//! `OPENAI_API_KEY`.
//!
//! ```toml
//! [db]
//! path = "./data/sca.sqlite"
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [embedding]
//! provider = "local"
//! model = "all-minilm-l6-v2"
//!
//! [llm]
//! model = "claude-3-5-sonnet-20241022"
//!
//! [server]
//! bind = "0.0.0.0:8000"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub collections: CollectionsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Names of the two logical vector collections.
#[derive(Debug, Deserialize, Clone)]
pub struct CollectionsConfig {
    #[serde(default = "default_contracts_collection")]
    pub contracts: String,
    #[serde(default = "default_knowledge_collection")]
    pub knowledge: String,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            contracts: default_contracts_collection(),
            knowledge: default_knowledge_collection(),
        }
    }
}

fn default_contracts_collection() -> String {
    "smart_contract_analysis".to_string()
}
fn default_knowledge_collection() -> String {
    "smart_contract_knowledge_base".to_string()
}

/// Chunk sizes are measured in characters, not tokens.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Contract chunks pulled into the RAG context.
    #[serde(default = "default_top_k")]
    pub contract_k: usize,
    /// Knowledge-base items pulled into the RAG context.
    #[serde(default = "default_top_k")]
    pub knowledge_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            contract_k: default_top_k(),
            knowledge_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    0
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_url")]
    pub url: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature for question answering.
    #[serde(default)]
    pub temperature: f32,
    /// Sampling temperature for clause extraction.
    #[serde(default = "default_analysis_temperature")]
    pub analysis_temperature: f32,
    /// No timeout unless set.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            url: default_llm_url(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            analysis_temperature: default_analysis_temperature(),
            timeout_secs: None,
        }
    }
}

fn default_llm_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}
fn default_llm_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_max_tokens() -> u32 {
    4000
}
fn default_analysis_temperature() -> f32 {
    0.1
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    /// Document text beyond this many characters is not sent to the LLM.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Uploads yielding less extracted text than this are rejected.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            min_text_chars: default_min_text_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    8000
}
fn default_min_text_chars() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl Config {
    /// Configuration with every default applied and the database at `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            collections: CollectionsConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            analysis: AnalysisConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Check cross-field constraints. Called by [`load_config`].
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            anyhow::bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            anyhow::bail!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }

        if self.retrieval.contract_k < 1 || self.retrieval.knowledge_k < 1 {
            anyhow::bail!("retrieval.contract_k and retrieval.knowledge_k must be >= 1");
        }

        if self.collections.contracts.trim().is_empty()
            || self.collections.knowledge.trim().is_empty()
        {
            anyhow::bail!("collection names must not be empty");
        }
        if self.collections.contracts == self.collections.knowledge {
            anyhow::bail!("collections.contracts and collections.knowledge must differ");
        }

        match self.embedding.provider.as_str() {
            "openai" | "ollama" => {
                if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                    anyhow::bail!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        self.embedding.provider
                    );
                }
                if self.embedding.model.is_none() {
                    anyhow::bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
            }
            "local" | "hashing" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be local, openai, ollama, or hashing.",
                other
            ),
        }

        if self.embedding.dims == Some(0) {
            anyhow::bail!("embedding.dims must be > 0");
        }

        if self.llm.max_tokens == 0 {
            anyhow::bail!("llm.max_tokens must be > 0");
        }

        if self.analysis.max_chars == 0 {
            anyhow::bail!("analysis.max_chars must be > 0");
        }

        if self.server.max_upload_bytes == 0 {
            anyhow::bail!("server.max_upload_bytes must be > 0");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"data/sca.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.collections.contracts, "smart_contract_analysis");
        assert_eq!(config.collections.knowledge, "smart_contract_knowledge_base");
        assert_eq!(config.retrieval.contract_k, 2);
        assert_eq!(config.analysis.max_chars, 8000);
        assert_eq!(config.server.max_upload_bytes, 10_485_760);
        assert_eq!(config.embedding.max_retries, 0);
        assert!(config.llm.timeout_secs.is_none());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = parse(
            "[db]\npath = \"x.sqlite\"\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = parse("[db]\npath = \"x.sqlite\"\n[embedding]\nprovider = \"magic\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_openai_requires_dims() {
        let err = parse(
            "[db]\npath = \"x.sqlite\"\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_same_collection_names_rejected() {
        let err = parse(
            "[db]\npath = \"x.sqlite\"\n[collections]\ncontracts = \"a\"\nknowledge = \"a\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }
}
