//! # Contract Analyzer CLI (`sca`)
//!
//! The `sca` binary is the command-line front end of the contract analyzer.
//! It initializes the database, ingests contracts and knowledge items, answers
//! questions, runs clause analysis, and starts the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! sca --config ./config/sca.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sca init` | Create the SQLite database and schema |
//! | `sca serve` | Start the HTTP API server |
//! | `sca add-contract <file> --name <name>` | Chunk, embed, and store a contract |
//! | `sca add-knowledge <file.json>` | Add knowledge items from JSON |
//! | `sca query "<question>"` | Answer a question from stored context |
//! | `sca analyze <file>` / `--contract <name>` | Clause risk analysis |
//! | `sca search-knowledge "<query>"` | Filtered knowledge search |
//! | `sca stats` | Collection sizes and contract summaries |
//! | `sca knowledge-stats` | Knowledge items per category |
//! | `sca reset <contracts\|knowledge>` | Drop a collection |
//! | `sca completions <shell>` | Print a shell completion script |
//!
//! Logs go to stderr and are filtered with `RUST_LOG`
//! (default `contract_analyzer=info`).

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use contract_analyzer::analyzer::Analyzer;
use contract_analyzer::config::{self, Config};
use contract_analyzer::extract::read_document;
use contract_analyzer::knowledge::{parse_items, KnowledgeQuery};
use contract_analyzer::models::{
    from_metadata, ClauseAnalysis, KnowledgeMetadata, RiskFlag, SearchResult,
};
use contract_analyzer::{migrate, server, stats};

/// Contract analyzer: contract ingestion, retrieval-augmented Q&A, and
/// clause risk analysis.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/sca.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "sca",
    about = "Smart contract analyzer: ingest contracts, ask questions, flag risky clauses",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sca.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run more than once.
    Init,

    /// Start the HTTP API server on `[server].bind`.
    Serve,

    /// Chunk, embed, and store a contract (PDF or plain text).
    AddContract {
        /// Path to the contract file.
        file: PathBuf,

        /// Name the contract is stored and queried under.
        #[arg(long)]
        name: String,

        /// On-chain address of the contract.
        #[arg(long)]
        address: Option<String>,

        /// Network the contract is deployed on.
        #[arg(long)]
        network: Option<String>,
    },

    /// Add knowledge-base items from a JSON file (one object or an array).
    AddKnowledge {
        file: PathBuf,
    },

    /// Answer a question using stored contracts and the knowledge base.
    Query {
        question: String,

        /// Restrict contract context to this contract.
        #[arg(long)]
        contract: Option<String>,
    },

    /// Clause-by-clause risk analysis of a file or a stored contract.
    Analyze {
        /// Contract file (PDF or plain text).
        #[arg(required_unless_present = "contract", conflicts_with = "contract")]
        file: Option<PathBuf>,

        /// Analyze the stored contract with this name.
        #[arg(long)]
        contract: Option<String>,

        /// Print the analysis as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Search the knowledge base with optional metadata filters.
    SearchKnowledge {
        query: String,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        pattern_type: Option<String>,

        /// Only items with at least this severity (1-5).
        #[arg(long)]
        min_severity: Option<u8>,

        #[arg(long)]
        standard: Option<String>,

        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// Show collection sizes and per-contract summaries.
    Stats,

    /// Show knowledge-base item counts per category.
    KnowledgeStats,

    /// Delete every record of a collection.
    Reset {
        #[arg(value_enum)]
        target: ResetTarget,
    },

    /// Print a shell completion script to stdout.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ResetTarget {
    Contracts,
    Knowledge,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "contract_analyzer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    // Commands that don't require config
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "sca", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::AddContract {
            file,
            name,
            address,
            network,
        } => {
            let text = read_document(&file)?;
            let analyzer = open(&cfg).await?;
            let stats = analyzer
                .add_contract(&text, &name, address.as_deref(), network.as_deref())
                .await?;
            println!(
                "Contract added successfully: {} ({} chunks in {})",
                name, stats.count, stats.name
            );
        }
        Commands::AddKnowledge { file } => {
            let raw = std::fs::read_to_string(&file)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", file.display(), e))?;
            let items = parse_items(&raw)?;
            let analyzer = open(&cfg).await?;
            let added = analyzer.knowledge().add_items(items).await?;
            println!("Added {} knowledge item(s).", added.len());
            for item in &added {
                println!("  {}  [{}] {}", item.id, item.metadata.category, item.metadata.pattern_type);
            }
        }
        Commands::Query { question, contract } => {
            let analyzer = open(&cfg).await?;
            let answer = analyzer.query(&question, contract.as_deref()).await?;
            println!("{}", answer);
        }
        Commands::Analyze {
            file,
            contract,
            json,
        } => {
            let analyzer = open(&cfg).await?;
            let clauses = match (file, contract) {
                (_, Some(name)) => analyzer.analyze_stored(&name).await?,
                (Some(path), None) => {
                    let text = read_document(&path)?;
                    analyzer.analyze_text(&text).await?
                }
                (None, None) => anyhow::bail!("either a file or --contract is required"),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&clauses)?);
            } else {
                print_clauses(&clauses);
            }
        }
        Commands::SearchKnowledge {
            query,
            category,
            pattern_type,
            min_severity,
            standard,
            limit,
        } => {
            let analyzer = open(&cfg).await?;
            let query = KnowledgeQuery {
                category,
                pattern_type,
                min_severity,
                standard,
                limit,
                ..KnowledgeQuery::new(query)
            };
            let results = analyzer.knowledge().search(&query).await?;
            print_knowledge_results(&results)?;
        }
        Commands::Stats => {
            let analyzer = open(&cfg).await?;
            stats::run_stats(&analyzer).await?;
        }
        Commands::KnowledgeStats => {
            let analyzer = open(&cfg).await?;
            stats::run_knowledge_stats(&analyzer).await?;
        }
        Commands::Reset { target } => {
            let analyzer = open(&cfg).await?;
            match target {
                ResetTarget::Contracts => {
                    analyzer.reset_contracts().await?;
                    println!("Collection reset successfully: {}", cfg.collections.contracts);
                }
                ResetTarget::Knowledge => {
                    analyzer.knowledge().reset().await?;
                    println!("Collection reset successfully: {}", cfg.collections.knowledge);
                }
            }
        }
        Commands::Completions { .. } => unreachable!(),
    }

    Ok(())
}

async fn open(cfg: &Config) -> anyhow::Result<Analyzer> {
    Ok(Analyzer::from_config(cfg).await?)
}

fn print_clauses(clauses: &[ClauseAnalysis]) {
    let flagged = clauses
        .iter()
        .filter(|c| c.risk_flag == RiskFlag::Yes)
        .count();
    println!("{} clause(s), {} flagged as risky", clauses.len(), flagged);

    for clause in clauses {
        println!();
        let marker = match clause.risk_flag {
            RiskFlag::Yes => "RISK",
            RiskFlag::No => "ok",
        };
        println!("#{} [{}]", clause.clause_number, marker);
        println!("  Clause:      {}", clause.original_clause);
        println!("  Explanation: {}", clause.explanation);
        if let Some(reason) = &clause.risk_reason {
            println!("  Reason:      {}", reason);
        }
    }
}

fn print_knowledge_results(results: &SearchResult) -> anyhow::Result<()> {
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for i in 0..results.len() {
        let meta: KnowledgeMetadata = from_metadata(&results.metadatas[i])?;

        print!("{}. [{}] {}", i + 1, meta.category, meta.pattern_type);
        if meta.severity > 0 {
            print!("  severity {}", meta.severity);
        }
        if let Some(standard) = &meta.standard {
            print!("  {}", standard);
        }
        if let Some(distance) = results.distances.get(i) {
            print!("  distance {:.3}", distance);
        }
        println!();
        println!("   {}", results.documents[i].replace('\n', " "));
        for reference in meta.reference_list()? {
            println!("   see: {}", reference);
        }
    }
    Ok(())
}
