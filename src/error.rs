//! Crate-wide error taxonomy.
//!
//! Variants map onto the error handling design: transient infrastructure
//! errors surface as task failures, bad input errors surface at the API
//! boundary, data-shape anomalies are handled by callers (skip + log), and
//! `Inconsistent` is reserved for invariant violations that should fail the
//! task loudly rather than be swallowed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KoditError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("git error: {0}")]
    Git(#[from] anyhow::Error),

    #[error("bad input: {0}")]
    BadInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("embedding provider error: {0}")]
    Embedding(String),

    #[error("enrichment provider error: {0}")]
    Enrichment(String),

    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KoditError>;
