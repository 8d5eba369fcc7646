//! The indexing pipeline handlers that run between `SCAN_COMMIT` and the
//! enrichment stages (§4.4), plus `RESCAN_COMMIT` (§4.7).

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::info;

use crate::db::model::EnrichmentType;
use crate::embedding::{batch_by_token_budget, EmbeddingProvider};
use crate::error::{KoditError, Result};
use crate::index::{vector::CODE_COLLECTION, vector::TEXT_COLLECTION, Bm25Index, VectorStore};
use crate::queue::{Priority, TaskPayload, TaskQueue, TaskType};
use crate::slicer::slice_file;

const SUPPORTED_EXTENSIONS: &[&str] = &["rs", "py", "js", "jsx", "ts", "tsx"];

/// `EXTRACT_SNIPPETS_FOR_COMMIT`: slices every supported file changed in
/// the commit, content-hashes each resulting snippet, and reuses an
/// existing row with that hash or inserts a new one.
pub async fn extract_snippets_for_commit(
    pool: &sqlx::SqlitePool,
    repo_cloned_path: &std::path::Path,
    commit_sha: &str,
) -> Result<usize> {
    let files: Vec<(String, String)> =
        sqlx::query_as("SELECT path, extension FROM commit_files WHERE commit_sha = ?")
            .bind(commit_sha)
            .fetch_all(pool)
            .await?;

    let mut inserted = 0usize;

    for (path, extension) in files {
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            continue;
        }

        let full_path = repo_cloned_path.join(&path);
        let Ok(content) = tokio::fs::read_to_string(&full_path).await else {
            continue;
        };

        for sliced in slice_file(&extension, &content) {
            let sha = blake3::hash(sliced.content.as_bytes()).to_hex().to_string();

            sqlx::query(
                "INSERT INTO snippets (sha, content, extension) VALUES (?, ?, ?)
                 ON CONFLICT (sha) DO NOTHING",
            )
            .bind(&sha)
            .bind(&sliced.content)
            .bind(&sliced.extension)
            .execute(pool)
            .await?;

            sqlx::query(
                "INSERT INTO snippet_files (snippet_sha, commit_sha, path) VALUES (?, ?, ?)
                 ON CONFLICT (snippet_sha, commit_sha, path) DO NOTHING",
            )
            .bind(&sha)
            .bind(commit_sha)
            .bind(&path)
            .execute(pool)
            .await?;

            sqlx::query(
                "INSERT INTO commit_snippets (commit_sha, snippet_sha) VALUES (?, ?)
                 ON CONFLICT (commit_sha, snippet_sha) DO NOTHING",
            )
            .bind(commit_sha)
            .bind(&sha)
            .execute(pool)
            .await?;

            inserted += 1;
        }
    }

    info!(commit_sha, inserted, "extracted snippets for commit");
    Ok(inserted)
}

/// `CREATE_BM25_INDEX_FOR_COMMIT`: adds every snippet introduced in this
/// commit that isn't already indexed.
pub async fn create_bm25_index_for_commit(
    pool: &sqlx::SqlitePool,
    bm25: &Bm25Index,
    commit_sha: &str,
) -> Result<()> {
    let snippets: Vec<(String, String)> = sqlx::query_as(
        "SELECT s.sha, s.content FROM snippets s
         JOIN commit_snippets cs ON cs.snippet_sha = s.sha
         WHERE cs.commit_sha = ?
           AND s.sha NOT IN (SELECT snippet_sha FROM bm25_entries)",
    )
    .bind(commit_sha)
    .fetch_all(pool)
    .await?;

    for (sha, content) in &snippets {
        bm25.add_document(sha, content).await?;
        sqlx::query("INSERT INTO bm25_entries (snippet_sha) VALUES (?) ON CONFLICT DO NOTHING")
            .bind(sha)
            .execute(pool)
            .await?;
    }
    bm25.commit().await?;

    info!(commit_sha, count = snippets.len(), "indexed snippets into bm25");
    Ok(())
}

/// `CREATE_CODE_EMBEDDINGS_FOR_COMMIT`: embeds every not-yet-embedded
/// snippet's raw content into the code vector collection.
///
/// Batches are embedded `concurrency` at a time rather than one at a time,
/// grounded on `original_source`'s embedding service, which fans out one
/// `asyncio.Semaphore`-bounded task per batch instead of awaiting them in
/// sequence.
pub async fn create_code_embeddings_for_commit(
    pool: &sqlx::SqlitePool,
    vector_store: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    commit_sha: &str,
    concurrency: usize,
) -> Result<()> {
    let snippets: Vec<(String, String)> = sqlx::query_as(
        "SELECT s.sha, s.content FROM snippets s
         JOIN commit_snippets cs ON cs.snippet_sha = s.sha
         WHERE cs.commit_sha = ?
           AND NOT EXISTS (SELECT 1 FROM embeddings e WHERE e.snippet_sha = s.sha AND e.kind = 'code')",
    )
    .bind(commit_sha)
    .fetch_all(pool)
    .await?;

    let batches = batch_by_token_budget(snippets, embedder.max_tokens_per_request());
    let shas = run_embedding_batches(batches, vector_store, embedder, CODE_COLLECTION, concurrency).await?;

    for sha in shas {
        sqlx::query(
            "INSERT INTO embeddings (snippet_sha, kind) VALUES (?, 'code') ON CONFLICT DO NOTHING",
        )
        .bind(&sha)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Runs `embedder.embed` over each batch concurrently, bounded by
/// `concurrency` in-flight requests, upserting every resulting vector into
/// `collection` as it completes. Returns the ids embedded, for the caller
/// to record in whatever table tracks completion.
async fn run_embedding_batches(
    batches: Vec<Vec<(String, String)>>,
    vector_store: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    collection: &'static str,
    concurrency: usize,
) -> Result<Vec<String>> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut set = tokio::task::JoinSet::new();

    for batch in batches {
        let embedder = embedder.clone();
        let vector_store = vector_store.clone();
        let semaphore = semaphore.clone();
        set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("semaphore is never closed");
            let embedded = embedder.embed(batch).await?;
            let mut ids = Vec::with_capacity(embedded.len());
            for (id, vector) in embedded {
                vector_store.upsert(collection, &id, vector).await?;
                ids.push(id);
            }
            Ok::<Vec<String>, KoditError>(ids)
        });
    }

    let mut all_ids = Vec::new();
    while let Some(joined) = set.join_next().await {
        let ids = joined.map_err(|e| KoditError::Inconsistent(format!("embedding task panicked: {e}")))??;
        all_ids.extend(ids);
    }

    Ok(all_ids)
}

/// `CREATE_SUMMARY_EMBEDDINGS_FOR_COMMIT`: embeds every summary enrichment
/// created for this commit's snippets into the text vector collection, and
/// records the `enrichment_id -> snippet_sha` mapping search needs later.
/// Batches run `concurrency` at a time, same rationale as the code
/// embeddings above.
pub async fn create_summary_embeddings_for_commit(
    pool: &sqlx::SqlitePool,
    vector_store: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    commit_sha: &str,
    concurrency: usize,
) -> Result<()> {
    let rows: Vec<(i64, String, String)> = sqlx::query_as(
        "SELECT e.id, e.content, ea.entity_id
         FROM enrichments e
         JOIN enrichment_associations ea ON ea.enrichment_id = e.id
         JOIN commit_snippets cs ON cs.snippet_sha = ea.entity_id
         WHERE e.type = ? AND ea.entity_type = 'snippet_v2' AND cs.commit_sha = ?
           AND NOT EXISTS (SELECT 1 FROM summary_embeddings se WHERE se.enrichment_id = e.id)",
    )
    .bind(EnrichmentType::Summary.as_str())
    .bind(commit_sha)
    .fetch_all(pool)
    .await?;

    let items: Vec<(String, String)> = rows
        .iter()
        .map(|(id, content, _)| (id.to_string(), content.clone()))
        .collect();

    let batches = batch_by_token_budget(items, embedder.max_tokens_per_request());
    let enrichment_ids = run_embedding_batches(batches, vector_store, embedder, TEXT_COLLECTION, concurrency).await?;

    for enrichment_id in enrichment_ids {
        let Ok(id) = enrichment_id.parse::<i64>() else {
            continue;
        };
        if let Some((_, _, snippet_sha)) = rows.iter().find(|(rid, _, _)| *rid == id) {
            sqlx::query("INSERT INTO summary_embeddings (enrichment_id, snippet_sha) VALUES (?, ?)")
                .bind(id)
                .bind(snippet_sha)
                .execute(pool)
                .await?;
        }
    }

    Ok(())
}

/// `RESCAN_COMMIT` (§4.7): deletes every derived artifact for the commit in
/// dependency order, then re-enqueues the full pipeline at user priority.
/// The commit row and the snippets themselves survive — only their
/// per-commit associations and downstream indices are torn down.
pub async fn rescan_commit(
    pool: &sqlx::SqlitePool,
    bm25: &Bm25Index,
    queue: &TaskQueue,
    repo_id: i64,
    commit_sha: &str,
) -> Result<()> {
    let snippet_shas: Vec<String> =
        sqlx::query_scalar("SELECT snippet_sha FROM commit_snippets WHERE commit_sha = ?")
            .bind(commit_sha)
            .fetch_all(pool)
            .await?;

    // 1-4: snippet enrichments — BM25 docs, vector embeddings, associations, enrichment rows.
    for sha in &snippet_shas {
        bm25.delete_document(sha).await?;
        sqlx::query("DELETE FROM bm25_entries WHERE snippet_sha = ?")
            .bind(sha)
            .execute(pool)
            .await?;
        sqlx::query("DELETE FROM embeddings WHERE snippet_sha = ?")
            .bind(sha)
            .execute(pool)
            .await?;

        let enrichment_ids: Vec<i64> = sqlx::query_scalar(
            "SELECT enrichment_id FROM enrichment_associations WHERE entity_type = 'snippet_v2' AND entity_id = ?",
        )
        .bind(sha)
        .fetch_all(pool)
        .await?;

        for id in enrichment_ids {
            sqlx::query("DELETE FROM summary_embeddings WHERE enrichment_id = ?")
                .bind(id)
                .execute(pool)
                .await?;
            sqlx::query("DELETE FROM enrichment_associations WHERE enrichment_id = ?")
                .bind(id)
                .execute(pool)
                .await?;
            sqlx::query("DELETE FROM enrichments WHERE id = ?")
                .bind(id)
                .execute(pool)
                .await?;
        }
    }
    bm25.commit().await?;

    // 5: commit-level enrichments (associations then enrichments).
    let commit_enrichment_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT enrichment_id FROM enrichment_associations WHERE entity_type = 'git_commit' AND entity_id = ?",
    )
    .bind(commit_sha)
    .fetch_all(pool)
    .await?;
    for id in commit_enrichment_ids {
        sqlx::query("DELETE FROM enrichment_associations WHERE enrichment_id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        sqlx::query("DELETE FROM enrichments WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
    }

    sqlx::query("DELETE FROM commit_snippets WHERE commit_sha = ?")
        .bind(commit_sha)
        .execute(pool)
        .await?;

    // 6: commit file rows.
    sqlx::query("DELETE FROM commit_files WHERE commit_sha = ?")
        .bind(commit_sha)
        .execute(pool)
        .await?;

    queue
        .enqueue_tasks(
            TaskType::scan_and_index_commit_pipeline(),
            Priority::UserInitiated,
            &TaskPayload::for_commit(repo_id, commit_sha),
        )
        .await?;

    info!(commit_sha, "rescanned commit, pipeline re-enqueued");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::connect_in_memory;
    use chrono::Utc;

    async fn seed_repo_and_commit(pool: &sqlx::SqlitePool, commit_sha: &str) -> i64 {
        let repo_id = sqlx::query(
            "INSERT INTO repositories (remote_uri, sanitized_remote_uri) VALUES (?, ?)",
        )
        .bind("https://example.com/repo.git")
        .bind("https://example.com/repo.git")
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid();

        sqlx::query(
            "INSERT INTO commits (commit_sha, repo_id, date, author, message) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(commit_sha)
        .bind(repo_id)
        .bind(Utc::now())
        .bind("author")
        .bind("message")
        .execute(pool)
        .await
        .unwrap();

        repo_id
    }

    async fn seed_commit_file(pool: &sqlx::SqlitePool, commit_sha: &str, path: &str) {
        sqlx::query(
            "INSERT INTO commit_files (commit_sha, path, blob_sha, mime_type, size, extension)
             VALUES (?, ?, 'blob', 'text/plain', 0, 'rs')",
        )
        .bind(commit_sha)
        .bind(path)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn extract_snippets_dedups_identical_content_across_files() {
        let pool = connect_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let commit_sha = "c0ffee";
        seed_repo_and_commit(&pool, commit_sha).await;

        let body = "fn hello() -> i32 {\n    1\n}\n";
        std::fs::write(dir.path().join("a.rs"), body).unwrap();
        std::fs::write(dir.path().join("b.rs"), body).unwrap();
        seed_commit_file(&pool, commit_sha, "a.rs").await;
        seed_commit_file(&pool, commit_sha, "b.rs").await;

        extract_snippets_for_commit(&pool, dir.path(), commit_sha)
            .await
            .unwrap();

        let snippet_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM snippets")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(snippet_count, 1, "identical bodies hash to one snippet row");

        let file_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM snippet_files")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(file_count, 2, "each occurrence is still tracked by path");

        let commit_snippet_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM commit_snippets")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(commit_snippet_count, 1);
    }

    #[tokio::test]
    async fn extract_snippets_skips_unsupported_extensions() {
        let pool = connect_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let commit_sha = "c0ffee";
        seed_repo_and_commit(&pool, commit_sha).await;

        std::fs::write(dir.path().join("notes.md"), "# hello").unwrap();
        sqlx::query(
            "INSERT INTO commit_files (commit_sha, path, blob_sha, mime_type, size, extension)
             VALUES (?, 'notes.md', 'blob', 'text/markdown', 0, 'md')",
        )
        .bind(commit_sha)
        .execute(&pool)
        .await
        .unwrap();

        let inserted = extract_snippets_for_commit(&pool, dir.path(), commit_sha)
            .await
            .unwrap();
        assert_eq!(inserted, 0);
    }

    #[tokio::test]
    async fn bm25_indexing_tracks_entries_and_skips_reindexed_snippets() {
        let pool = connect_in_memory().await.unwrap();
        let bm25_dir = tempfile::tempdir().unwrap();
        let bm25 = Bm25Index::open_or_create(bm25_dir.path()).unwrap();
        let commit_sha = "c0ffee";
        seed_repo_and_commit(&pool, commit_sha).await;

        sqlx::query("INSERT INTO snippets (sha, content, extension) VALUES ('s1', 'fn a() {}', 'rs')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO commit_snippets (commit_sha, snippet_sha) VALUES (?, 's1')")
            .bind(commit_sha)
            .execute(&pool)
            .await
            .unwrap();

        create_bm25_index_for_commit(&pool, &bm25, commit_sha)
            .await
            .unwrap();

        let entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bm25_entries")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(entries, 1);

        // Re-running for the same commit must not re-add an already-indexed snippet.
        create_bm25_index_for_commit(&pool, &bm25, commit_sha)
            .await
            .unwrap();
        let entries_again: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bm25_entries")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(entries_again, 1);
    }

    #[tokio::test]
    async fn rescan_commit_tears_down_derived_state_and_requeues_pipeline() {
        let pool = connect_in_memory().await.unwrap();
        let bm25_dir = tempfile::tempdir().unwrap();
        let bm25 = Bm25Index::open_or_create(bm25_dir.path()).unwrap();
        let queue = TaskQueue::new(pool.clone());
        let commit_sha = "c0ffee";
        let repo_id = seed_repo_and_commit(&pool, commit_sha).await;

        sqlx::query("INSERT INTO snippets (sha, content, extension) VALUES ('s1', 'fn a() {}', 'rs')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO commit_snippets (commit_sha, snippet_sha) VALUES (?, 's1')")
            .bind(commit_sha)
            .execute(&pool)
            .await
            .unwrap();
        seed_commit_file(&pool, commit_sha, "a.rs").await;

        create_bm25_index_for_commit(&pool, &bm25, commit_sha)
            .await
            .unwrap();

        let enrichment_id = sqlx::query(
            "INSERT INTO enrichments (type, content) VALUES ('summary', 'a summary')",
        )
        .execute(&pool)
        .await
        .unwrap()
        .last_insert_rowid();
        sqlx::query(
            "INSERT INTO enrichment_associations (enrichment_id, entity_type, entity_id)
             VALUES (?, 'snippet_v2', 's1')",
        )
        .bind(enrichment_id)
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO summary_embeddings (enrichment_id, snippet_sha) VALUES (?, 's1')",
        )
        .bind(enrichment_id)
        .execute(&pool)
        .await
        .unwrap();

        rescan_commit(&pool, &bm25, &queue, repo_id, commit_sha)
            .await
            .unwrap();

        for table in [
            "bm25_entries",
            "embeddings",
            "summary_embeddings",
            "enrichment_associations",
            "enrichments",
            "commit_snippets",
            "commit_files",
        ] {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&pool)
                .await
                .unwrap();
            assert_eq!(count, 0, "{table} should be empty after rescan");
        }

        // The snippet row itself survives a rescan.
        let snippet_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM snippets")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(snippet_count, 1);

        let requeued = queue.take().await.unwrap().unwrap();
        assert_eq!(requeued.r#type, TaskType::ScanCommit);
    }
}
