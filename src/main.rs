use std::sync::Arc;

use clap::Parser;
use kodit::config::Configuration;
use kodit::context::Context;
use kodit::db;
use kodit::git::gix_adapter::GixAdapter;
use kodit::index::{Bm25Index, VectorStore};
use kodit::logging::install_logging;
use kodit::providers::http::{HttpEmbeddingProvider, HttpEnrichmentProvider};
use kodit::queue::{worker, TaskQueue};
use kodit::scheduler;
use tracing::info;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    let config = Configuration::parse();
    install_logging(&config);

    info!(index_dir = %config.index_dir.display(), "starting kodit worker");

    let pool = db::pool::connect(&config.db_path()).await?;
    let queue = TaskQueue::new(pool.clone());
    let bm25 = Arc::new(Bm25Index::open_or_create(&config.bm25_index_path())?);

    let qdrant_client = qdrant_client::client::QdrantClient::from_url(&config.qdrant_url).build()?;
    let vector_store = Arc::new(VectorStore::new(qdrant_client, config.embedding_vector_size));
    vector_store.ensure_collections().await?;

    let git: Arc<dyn kodit::git::GitAdapter> = Arc::new(GixAdapter::default());

    let code_embedder = Arc::new(HttpEmbeddingProvider::new(
        config.embedding_endpoint.clone(),
        config.embedding_model.clone(),
        config.provider_api_key.clone(),
        config.embedding_batch_tokens,
    ));
    let text_embedder = Arc::new(HttpEmbeddingProvider::new(
        config.embedding_endpoint.clone(),
        config.embedding_model.clone(),
        config.provider_api_key.clone(),
        config.embedding_batch_tokens,
    ));
    let enrichment_provider = Arc::new(HttpEnrichmentProvider::new(
        config.enrichment_endpoint.clone(),
        config.enrichment_model.clone(),
        config.provider_api_key.clone(),
    ));

    let ctx = Context {
        config,
        pool,
        queue,
        git,
        bm25,
        vector_store,
        code_embedder,
        text_embedder,
        enrichment_provider,
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let worker_ctx = ctx.clone();
    let worker_shutdown = shutdown_rx.clone();
    let worker_handle = tokio::spawn(async move { worker::run(&worker_ctx, worker_shutdown).await });

    let scheduler_ctx = ctx.clone();
    let scheduler_shutdown = shutdown_rx.clone();
    let scheduler_handle =
        tokio::spawn(async move { scheduler::run(&scheduler_ctx, scheduler_shutdown).await });

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal, waiting for in-flight task to finish");
    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(worker_handle, scheduler_handle);
    Ok(())
}
