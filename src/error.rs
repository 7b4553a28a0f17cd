//! Error taxonomy shared by the analyzer's service layer.
//!
//! Backend seams (store, embedding, LLM) report failures as `anyhow::Error`;
//! those convert into [`Error::Upstream`] at the service boundary so callers
//! can tell caller mistakes apart from failing collaborators.

use crate::clauses::ClauseError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed caller input, rejected before any side effect.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// The LLM response could not be turned into a clause list.
    #[error(transparent)]
    Clause(#[from] ClauseError),

    /// The vector store, embedding provider, LLM, or PDF extractor failed.
    #[error("upstream service error: {0:#}")]
    Upstream(#[from] anyhow::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound(message.into())
    }
}
