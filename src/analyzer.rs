//! The application context shared by the CLI and the HTTP handlers.
//!
//! [`Analyzer`] owns both collections, the LLM client, and the services built
//! on them. It is constructed once at process start ([`Analyzer::from_config`])
//! or per test ([`Analyzer::new`] with an in-memory store) and passed around
//! explicitly; there is no global instance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use crate::clauses::ClauseExtractor;
use crate::collection::Collection;
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::Result;
use crate::knowledge::KnowledgeBase;
use crate::llm::{create_llm, LlmClient};
use crate::models::{ClauseAnalysis, CollectionStats};
use crate::rag::RagEngine;
use crate::stats::{summarize_contracts, ContractStats};
use crate::store::sqlite::SqliteStore;
use crate::store::VectorStore;

pub struct Analyzer {
    config: Config,
    contracts: Collection,
    knowledge: KnowledgeBase,
    rag: RagEngine,
    clauses: ClauseExtractor,
    llm: Arc<dyn LlmClient>,
    /// Contract name to the time of its latest clause analysis in this process.
    last_analyzed: Mutex<HashMap<String, String>>,
}

impl Analyzer {
    /// Open the SQLite store and build the configured embedder and LLM client.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store: Arc<dyn VectorStore> = Arc::new(SqliteStore::open(config).await?);
        let embedder = create_embedder(&config.embedding)?;
        let llm = create_llm(&config.llm)?;
        Self::new(config, store, embedder, llm).await
    }

    pub async fn new(
        config: &Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LlmClient>,
    ) -> Result<Self> {
        let contracts =
            Collection::open(&config.collections.contracts, store.clone(), embedder.clone()).await?;
        let knowledge = KnowledgeBase::new(
            Collection::open(&config.collections.knowledge, store, embedder).await?,
        );
        let rag = RagEngine::new(config, contracts.clone(), knowledge.clone(), llm.clone())?;
        let clauses = ClauseExtractor::new(llm.clone(), config);

        Ok(Self {
            config: config.clone(),
            contracts,
            knowledge,
            rag,
            clauses,
            llm,
            last_analyzed: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn contracts(&self) -> &Collection {
        &self.contracts
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    pub fn llm(&self) -> &dyn LlmClient {
        self.llm.as_ref()
    }

    fn last_analyzed(&self) -> MutexGuard<'_, HashMap<String, String>> {
        // The map only holds timestamps; a panic mid-insert leaves it usable.
        self.last_analyzed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn add_contract(
        &self,
        contract_text: &str,
        contract_name: &str,
        contract_address: Option<&str>,
        network: Option<&str>,
    ) -> Result<CollectionStats> {
        self.rag
            .add_contract(contract_text, contract_name, contract_address, network)
            .await
    }

    pub async fn query(&self, question: &str, contract_name: Option<&str>) -> Result<String> {
        self.rag.answer(question, contract_name).await
    }

    pub async fn contract_stats(&self) -> Result<ContractStats> {
        let all = self.contracts.get_all().await?;
        let contracts = summarize_contracts(&all, &self.last_analyzed())?;
        Ok(ContractStats {
            count: all.len(),
            name: self.contracts.name().to_string(),
            contracts,
        })
    }

    pub async fn reset_contracts(&self) -> Result<()> {
        self.contracts.reset().await?;
        self.last_analyzed().clear();
        Ok(())
    }

    /// Clause analysis of free text (an uploaded document).
    pub async fn analyze_text(&self, document_text: &str) -> Result<Vec<ClauseAnalysis>> {
        self.clauses.extract_clauses(document_text).await
    }

    /// Clause analysis of a stored contract; records the analysis time.
    pub async fn analyze_stored(&self, contract_name: &str) -> Result<Vec<ClauseAnalysis>> {
        let clauses = self
            .clauses
            .analyze_stored(&self.contracts, contract_name)
            .await?;
        self.last_analyzed()
            .insert(contract_name.to_string(), Utc::now().to_rfc3339());
        Ok(clauses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::error::Error;
    use crate::llm::testing::CannedLlm;
    use crate::store::memory::InMemoryStore;

    const ONE_CLAUSE: &str = r#"[{"clause_number": 1, "original_clause": "a", "explanation": "b", "risk_flag": "No"}]"#;

    async fn analyzer(llm: Arc<CannedLlm>) -> Analyzer {
        Analyzer::new(
            &Config::with_db_path("unused.sqlite"),
            Arc::new(InMemoryStore::new()),
            Arc::new(HashingEmbedder::default()),
            llm,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_collections_use_configured_names() {
        let a = analyzer(Arc::new(CannedLlm::replying(ONE_CLAUSE))).await;
        assert_eq!(a.contracts().name(), "smart_contract_analysis");
        assert_eq!(a.knowledge().collection().name(), "smart_contract_knowledge_base");
    }

    #[tokio::test]
    async fn test_analyze_stored_records_last_analyzed() {
        let a = analyzer(Arc::new(CannedLlm::replying(ONE_CLAUSE))).await;
        a.add_contract("The lessee shall pay rent.", "Lease", None, None)
            .await
            .unwrap();

        let before = a.contract_stats().await.unwrap();
        assert_eq!(before.contracts[0].last_analyzed, None);

        let clauses = a.analyze_stored("Lease").await.unwrap();
        assert_eq!(clauses.len(), 1);

        let after = a.contract_stats().await.unwrap();
        assert_eq!(after.count, 1);
        assert!(after.contracts[0].last_analyzed.is_some());
    }

    #[tokio::test]
    async fn test_analyze_unknown_contract_is_not_found() {
        let a = analyzer(Arc::new(CannedLlm::replying(ONE_CLAUSE))).await;
        assert!(matches!(
            a.analyze_stored("Nope").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_reset_contracts_keeps_knowledge() {
        let a = analyzer(Arc::new(CannedLlm::replying(ONE_CLAUSE))).await;
        a.add_contract("text", "C", None, None).await.unwrap();
        a.knowledge()
            .add_item(crate::models::NewKnowledgeItem {
                content: "k".to_string(),
                category: "A".to_string(),
                pattern_type: "p".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        a.reset_contracts().await.unwrap();
        assert_eq!(a.contract_stats().await.unwrap().count, 0);
        assert_eq!(a.knowledge().stats().await.unwrap().count, 1);
    }
}
