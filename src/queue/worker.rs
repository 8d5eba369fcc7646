//! Cooperative single-worker loop (§5): `take()`, dispatch, `complete()`,
//! repeat. An empty queue sleeps `worker_idle_sleep_ms` before retrying
//! rather than busy-polling. Exhaustive match on `TaskType` so a new
//! variant fails to compile until dispatched here.

use tracing::{error, info, warn};

use crate::context::Context;
use crate::enrichment::handlers as enrichment_handlers;
use crate::error::{KoditError, Result};
use crate::pipeline;
use crate::queue::{Task, TaskType};
use crate::repo::lifecycle;
use crate::scan;

/// Runs until `shutdown` resolves. Each iteration takes at most one task;
/// an empty queue yields control back to the scheduler via a short sleep
/// instead of spinning.
pub async fn run(ctx: &Context, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            info!("worker loop received shutdown signal");
            return;
        }

        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("worker loop received shutdown signal");
                    return;
                }
            }
            task = ctx.queue.take() => {
                match task {
                    Ok(Some(task)) => {
                        let task_id = task.id;
                        let outcome = dispatch(ctx, &task).await;
                        if let Err(ref e) = outcome {
                            error!(task_id, task_type = task.r#type.as_str(), error = %e, "task failed");
                        }
                        if let Err(e) = ctx.queue.complete(task_id, outcome).await {
                            error!(task_id, error = %e, "failed to record task completion");
                        }
                    }
                    Ok(None) => {
                        tokio::time::sleep(ctx.config.worker_idle_sleep()).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to take next task, backing off");
                        tokio::time::sleep(ctx.config.worker_idle_sleep()).await;
                    }
                }
            }
        }
    }
}

async fn dispatch(ctx: &Context, task: &Task) -> Result<()> {
    let repo_id = || {
        task.payload
            .repo_id
            .ok_or_else(|| KoditError::Inconsistent("task payload missing repo_id".into()))
    };
    let commit_sha = || {
        task.payload
            .commit_sha
            .clone()
            .ok_or_else(|| KoditError::Inconsistent("task payload missing commit_sha".into()))
    };

    match task.r#type {
        // Reserved for the synchronous create-or-get step the API layer
        // performs inline; never actually enqueued by this codebase.
        TaskType::CreateRepository => Ok(()),

        TaskType::CloneRepository => {
            lifecycle::clone_repository(&ctx.pool, &ctx.queue, ctx.git.as_ref(), &ctx.config, repo_id()?)
                .await
        }
        TaskType::SyncRepository => {
            lifecycle::sync_repository(&ctx.pool, &ctx.queue, ctx.git.as_ref(), repo_id()?).await
        }
        TaskType::DeleteRepository => lifecycle::delete_repository(&ctx.pool, repo_id()?).await,

        TaskType::ScanCommit => {
            scan::scan_commit(&ctx.pool, ctx.git.as_ref(), repo_id()?, &commit_sha()?).await
        }
        TaskType::RescanCommit => {
            pipeline::rescan_commit(&ctx.pool, &ctx.bm25, &ctx.queue, repo_id()?, &commit_sha()?).await
        }

        TaskType::ExtractSnippetsForCommit => {
            let cloned_path = cloned_path_for(&ctx.pool, repo_id()?).await?;
            pipeline::extract_snippets_for_commit(&ctx.pool, &cloned_path, &commit_sha()?)
                .await
                .map(|_| ())
        }
        TaskType::CreateBm25IndexForCommit => {
            pipeline::create_bm25_index_for_commit(&ctx.pool, &ctx.bm25, &commit_sha()?).await
        }
        TaskType::CreateCodeEmbeddingsForCommit => {
            pipeline::create_code_embeddings_for_commit(
                &ctx.pool,
                ctx.vector_store.clone(),
                ctx.code_embedder.clone(),
                &commit_sha()?,
                ctx.config.enrichment_concurrency,
            )
            .await
        }
        TaskType::CreateSummaryEnrichmentForCommit => enrichment_handlers::create_summary_enrichments(
            &ctx.pool,
            ctx.enrichment_provider.as_ref(),
            &commit_sha()?,
        )
        .await
        .map(|_| ()),
        TaskType::CreateSummaryEmbeddingsForCommit => {
            pipeline::create_summary_embeddings_for_commit(
                &ctx.pool,
                ctx.vector_store.clone(),
                ctx.text_embedder.clone(),
                &commit_sha()?,
                ctx.config.enrichment_concurrency,
            )
            .await
        }

        TaskType::CreateArchitectureEnrichmentForCommit => enrichment_handlers::create_architecture_enrichment(
            &ctx.pool,
            ctx.enrichment_provider.as_ref(),
            &commit_sha()?,
        )
        .await
        .map(|_| ()),
        TaskType::CreatePublicApiDocsForCommit => enrichment_handlers::create_api_docs_enrichment(
            &ctx.pool,
            ctx.enrichment_provider.as_ref(),
            &commit_sha()?,
        )
        .await
        .map(|_| ()),
        TaskType::CreateCommitDescriptionForCommit => {
            enrichment_handlers::create_commit_description_enrichment(
                &ctx.pool,
                ctx.enrichment_provider.as_ref(),
                &commit_sha()?,
            )
            .await
            .map(|_| ())
        }
        TaskType::CreateDatabaseSchemaForCommit => enrichment_handlers::create_database_schema_enrichment(
            &ctx.pool,
            ctx.enrichment_provider.as_ref(),
            &commit_sha()?,
        )
        .await
        .map(|_| ()),
        TaskType::CreateCookbookForCommit => enrichment_handlers::create_cookbook_enrichment(
            &ctx.pool,
            ctx.enrichment_provider.as_ref(),
            &commit_sha()?,
        )
        .await
        .map(|_| ()),
        TaskType::CreateRepositoryStructureForCommit => {
            enrichment_handlers::create_repository_structure_enrichment(
                &ctx.pool,
                ctx.enrichment_provider.as_ref(),
                &commit_sha()?,
            )
            .await
            .map(|_| ())
        }
    }
}

async fn cloned_path_for(pool: &sqlx::SqlitePool, repo_id: i64) -> Result<std::path::PathBuf> {
    let cloned_path: Option<String> =
        sqlx::query_scalar("SELECT cloned_path FROM repositories WHERE id = ?")
            .bind(repo_id)
            .fetch_optional(pool)
            .await?
            .flatten();

    cloned_path
        .map(std::path::PathBuf::from)
        .ok_or_else(|| KoditError::Inconsistent(format!("repository {repo_id} has no cloned_path")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::connect_in_memory;

    #[tokio::test]
    async fn cloned_path_for_resolves_a_cloned_repository() {
        let pool = connect_in_memory().await.unwrap();
        let repo_id = sqlx::query(
            "INSERT INTO repositories (remote_uri, sanitized_remote_uri, cloned_path)
             VALUES ('https://a', 'https://a', '/data/a')",
        )
        .execute(&pool)
        .await
        .unwrap()
        .last_insert_rowid();

        let path = cloned_path_for(&pool, repo_id).await.unwrap();
        assert_eq!(path, std::path::PathBuf::from("/data/a"));
    }

    #[tokio::test]
    async fn cloned_path_for_rejects_an_uncloned_repository() {
        let pool = connect_in_memory().await.unwrap();
        let repo_id = sqlx::query(
            "INSERT INTO repositories (remote_uri, sanitized_remote_uri) VALUES ('https://a', 'https://a')",
        )
        .execute(&pool)
        .await
        .unwrap()
        .last_insert_rowid();

        let err = cloned_path_for(&pool, repo_id).await.unwrap_err();
        assert!(matches!(err, KoditError::Inconsistent(_)));
    }

    #[tokio::test]
    async fn cloned_path_for_rejects_an_unknown_repository() {
        let pool = connect_in_memory().await.unwrap();
        let err = cloned_path_for(&pool, 9999).await.unwrap_err();
        assert!(matches!(err, KoditError::Inconsistent(_)));
    }
}
