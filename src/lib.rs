//! # Contract Analyzer
//!
//! Contract ingestion, retrieval-augmented question answering, and
//! clause-level risk analysis backed by an LLM.
//!
//! Contracts are split into overlapping chunks, embedded, and stored in a
//! named vector collection next to a curated knowledge base of security
//! patterns and best practices. Questions are answered by retrieving the
//! closest contract chunks and knowledge items and handing them to the LLM as
//! context. Clause analysis sends a whole document to the LLM and parses the
//! structured clause list out of its reply.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ PDF / text  │──▶│ Chunk+Embed │──▶│ VectorStore  │
//! │  uploads    │   │             │   │ SQLite / mem │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │
//!                    ┌─────────────┬─────────┤
//!                    ▼             ▼         ▼
//!               ┌─────────┐  ┌──────────┐ ┌────────┐
//!               │   RAG   │  │ Clauses  │ │ Stats  │──▶ CLI (sca) / HTTP
//!               └────┬────┘  └────┬─────┘ └────────┘
//!                    └─────┬──────┘
//!                          ▼
//!                    Anthropic LLM
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sca init
//! sca add-contract ./lease.pdf --name "Office Lease"
//! sca query "What is the termination notice period?" --contract "Office Lease"
//! sca analyze --contract "Office Lease"
//! sca serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Service error taxonomy |
//! | [`models`] | Core data types |
//! | [`chunk`] | Recursive character chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector store trait, SQLite and in-memory backends |
//! | [`collection`] | Named collections over a store and an embedder |
//! | [`knowledge`] | Knowledge-base items and filtered search |
//! | [`llm`] | LLM client abstraction (Anthropic) |
//! | [`rag`] | Context assembly and question answering |
//! | [`clauses`] | Clause extraction and response parsing |
//! | [`extract`] | PDF text extraction |
//! | [`analyzer`] | Application context shared by CLI and server |
//! | [`stats`] | Collection stats and contract summaries |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod analyzer;
pub mod chunk;
pub mod clauses;
pub mod collection;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod knowledge;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod rag;
pub mod server;
pub mod stats;
pub mod store;
