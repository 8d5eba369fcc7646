//! Bundles every shared dependency the worker dispatch table and the
//! lifecycle/pipeline/search handlers need, so `main` wires each concrete
//! implementation up exactly once.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Configuration;
use crate::embedding::EmbeddingProvider;
use crate::enrichment::EnrichmentProvider;
use crate::git::GitAdapter;
use crate::index::{Bm25Index, VectorStore};
use crate::queue::TaskQueue;

#[derive(Clone)]
pub struct Context {
    pub config: Configuration,
    pub pool: SqlitePool,
    pub queue: TaskQueue,
    pub git: Arc<dyn GitAdapter>,
    pub bm25: Arc<Bm25Index>,
    pub vector_store: Arc<VectorStore>,
    pub code_embedder: Arc<dyn EmbeddingProvider>,
    pub text_embedder: Arc<dyn EmbeddingProvider>,
    pub enrichment_provider: Arc<dyn EnrichmentProvider>,
}
