//! Collection statistics and per-contract summaries.
//!
//! Contract summaries are not stored anywhere: they are rebuilt from the
//! chunk metadata on every request. Chunks sharing a contract name belong to
//! the same logical contract, even when that contract was added more than
//! once. Used by `GET /rag/stats` and `sca stats`.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::analyzer::Analyzer;
use crate::error::Result;
use crate::models::{from_metadata, ChunkMetadata, ContractSummary, SearchResult};

/// Contract collection stats plus one summary per stored contract.
#[derive(Debug, Clone, Serialize)]
pub struct ContractStats {
    pub count: usize,
    pub name: String,
    pub contracts: Vec<ContractSummary>,
}

/// Group chunk records by contract name, sorted by name.
///
/// `added_at` is the earliest chunk timestamp; address and network are the
/// first ones seen; function signatures are deduplicated in chunk order.
pub fn summarize_contracts(
    chunks: &SearchResult,
    last_analyzed: &HashMap<String, String>,
) -> Result<Vec<ContractSummary>> {
    let mut by_name: BTreeMap<String, ContractSummary> = BTreeMap::new();

    for metadata in &chunks.metadatas {
        let meta: ChunkMetadata = from_metadata(metadata)?;
        let summary = by_name
            .entry(meta.contract_name.clone())
            .or_insert_with(|| ContractSummary {
                name: meta.contract_name.clone(),
                address: None,
                network: None,
                added_at: meta.timestamp.clone(),
                last_analyzed: last_analyzed.get(&meta.contract_name).cloned(),
                function_signatures: Vec::new(),
                chunk_count: 0,
            });

        summary.chunk_count += 1;
        if meta.timestamp < summary.added_at {
            summary.added_at = meta.timestamp;
        }
        if summary.address.is_none() {
            summary.address = meta.contract_address;
        }
        if summary.network.is_none() {
            summary.network = meta.network;
        }
        for signature in meta.functions {
            if !summary.function_signatures.contains(&signature) {
                summary.function_signatures.push(signature);
            }
        }
    }

    Ok(by_name.into_values().collect())
}

/// Print a summary of both collections (`sca stats`).
pub async fn run_stats(analyzer: &Analyzer) -> Result<()> {
    let config = analyzer.config();
    let contract_stats = analyzer.contract_stats().await?;
    let knowledge_stats = analyzer.knowledge().stats().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Contract Analyzer: Database Stats");
    println!("=================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  {:<32} {:>6} chunks", contract_stats.name, contract_stats.count);
    println!("  {:<32} {:>6} items", knowledge_stats.name, knowledge_stats.count);

    if !contract_stats.contracts.is_empty() {
        println!();
        println!("  Contracts:");
        println!(
            "  {:<24} {:>6} {:>9}   {}",
            "NAME", "CHUNKS", "FUNCTIONS", "ADDED"
        );
        println!("  {}", "-".repeat(66));

        for c in &contract_stats.contracts {
            println!(
                "  {:<24} {:>6} {:>9}   {}",
                c.name,
                c.chunk_count,
                c.function_signatures.len(),
                format_ts_relative(&c.added_at)
            );
        }
    }

    println!();
    Ok(())
}

/// Print knowledge-base category counts (`sca knowledge-stats`).
pub async fn run_knowledge_stats(analyzer: &Analyzer) -> Result<()> {
    let stats = analyzer.knowledge().stats().await?;

    println!("{}: {} items", stats.name, stats.count);
    if !stats.categories.is_empty() {
        println!();
        println!("  {:<32} {:>6}", "CATEGORY", "ITEMS");
        println!("  {}", "-".repeat(39));
        for (category, count) in &stats.categories {
            println!("  {:<32} {:>6}", category, count);
        }
    }
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format an RFC 3339 timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: &str) -> String {
    let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(ts) else {
        return ts.to_string();
    };
    let delta = chrono::Utc::now().timestamp() - parsed.timestamp();

    if delta < 0 {
        parsed.format("%Y-%m-%d %H:%M").to_string()
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        parsed.format("%Y-%m-%d %H:%M").to_string()
    }
}
