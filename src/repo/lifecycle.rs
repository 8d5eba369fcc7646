//! Repository lifecycle handlers (§4.2): create-or-get, clone, sync,
//! delete. These back the `CREATE_REPOSITORY`, `CLONE_REPOSITORY`,
//! `SYNC_REPOSITORY` and `DELETE_REPOSITORY` task types.

use std::path::PathBuf;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

use crate::config::Configuration;
use crate::db::model::Repository;
use crate::error::{KoditError, Result};
use crate::git::GitAdapter;
use crate::queue::{Priority, TaskPayload, TaskQueue, TaskType};

use super::sync::sync_branches_and_tags;
use super::url::{clone_path, sanitize_git_url};

/// Looks up a repository by its sanitized remote URI, creating it if
/// absent. Returns `(repo, created)`; callers enqueue the clone pipeline
/// either way, since a pre-existing repository may have never finished
/// cloning, or a caller may just want to force a fresh sync.
pub async fn create_or_get_repository(
    pool: &SqlitePool,
    queue: &TaskQueue,
    remote_uri: &str,
) -> Result<(Repository, bool)> {
    let sanitized = sanitize_git_url(remote_uri)?;

    if let Some(existing) = find_by_sanitized_uri(pool, &sanitized).await? {
        // The sanitized URI matched, but the raw URI may carry a rotated
        // credential (token, password) that the existing row's sanitized
        // twin can't reflect. Persist it so later clones authenticate with
        // the new credential instead of the stale one.
        sqlx::query("UPDATE repositories SET remote_uri = ? WHERE id = ?")
            .bind(remote_uri)
            .bind(existing.id)
            .execute(pool)
            .await?;

        queue
            .enqueue_tasks(
                TaskType::create_new_repository_pipeline(),
                Priority::UserInitiated,
                &TaskPayload::for_repo(existing.id),
            )
            .await?;

        let mut existing = existing;
        existing.remote_uri = remote_uri.to_owned();
        return Ok((existing, false));
    }

    let id = sqlx::query(
        "INSERT INTO repositories (remote_uri, sanitized_remote_uri, tracking_type, tracking_value)
         VALUES (?, ?, 'branch', 'main')",
    )
    .bind(remote_uri)
    .bind(&sanitized)
    .execute(pool)
    .await?
    .last_insert_rowid();

    queue
        .enqueue_tasks(
            TaskType::create_new_repository_pipeline(),
            Priority::UserInitiated,
            &TaskPayload::for_repo(id),
        )
        .await?;

    let repo = find_by_id(pool, id).await?;
    Ok((repo, true))
}

async fn find_by_sanitized_uri(pool: &SqlitePool, sanitized: &str) -> Result<Option<Repository>> {
    let repo = sqlx::query_as::<_, Repository>(
        "SELECT * FROM repositories WHERE sanitized_remote_uri = ?",
    )
    .bind(sanitized)
    .fetch_optional(pool)
    .await?;
    Ok(repo)
}

async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Repository> {
    sqlx::query_as::<_, Repository>("SELECT * FROM repositories WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| KoditError::NotFound(format!("repository {id}")))
}

/// `CLONE_REPOSITORY`: clones the remote, resolves the working copy path,
/// syncs branches/tags, then enqueues the scan-and-index pipeline for the
/// tracked head commit.
pub async fn clone_repository(
    pool: &SqlitePool,
    queue: &TaskQueue,
    git: &dyn GitAdapter,
    config: &Configuration,
    repo_id: i64,
) -> Result<()> {
    let repo = find_by_id(pool, repo_id).await?;
    let dest = clone_path(&config.clone_root, &repo.sanitized_remote_uri);

    git.clone_repo(&repo.remote_uri, &dest).await?;

    sqlx::query("UPDATE repositories SET cloned_path = ? WHERE id = ?")
        .bind(dest.to_string_lossy().to_string())
        .bind(repo_id)
        .execute(pool)
        .await?;

    sync_branches_and_tags(pool, git, repo_id, &dest).await?;

    let head_sha = resolve_tracked_commit(git, &repo, &dest).await?;
    info!(repo_id, head_sha = %head_sha, "enqueuing scan for head commit of newly cloned repository");

    queue
        .enqueue_tasks(
            TaskType::scan_and_index_commit_pipeline(),
            Priority::UserInitiated,
            &TaskPayload::for_commit(repo_id, head_sha),
        )
        .await?;

    Ok(())
}

/// `SYNC_REPOSITORY`: pulls, re-syncs branches/tags, and enqueues the
/// scan-and-index pipeline only if the tracked head commit has moved.
pub async fn sync_repository(
    pool: &SqlitePool,
    queue: &TaskQueue,
    git: &dyn GitAdapter,
    repo_id: i64,
) -> Result<()> {
    let repo = find_by_id(pool, repo_id).await?;
    let cloned_path: PathBuf = repo
        .cloned_path
        .as_ref()
        .ok_or_else(|| KoditError::Inconsistent(format!("repository {repo_id} never cloned")))?
        .into();

    git.pull(&cloned_path).await?;
    sync_branches_and_tags(pool, git, repo_id, &cloned_path).await?;

    let head_sha = resolve_tracked_commit(git, &repo, &cloned_path).await?;

    let already_scanned = sqlx::query("SELECT 1 FROM commits WHERE commit_sha = ?")
        .bind(&head_sha)
        .fetch_optional(pool)
        .await?
        .is_some();

    sqlx::query("UPDATE repositories SET last_scanned_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(repo_id)
        .execute(pool)
        .await?;

    if already_scanned {
        info!(repo_id, head_sha = %head_sha, "sync found no new commit");
        return Ok(());
    }

    info!(repo_id, head_sha = %head_sha, "sync found new commit, enqueuing scan and indexing");
    queue
        .enqueue_tasks(
            TaskType::scan_and_index_commit_pipeline(),
            Priority::Background,
            &TaskPayload::for_commit(repo_id, head_sha),
        )
        .await?;

    Ok(())
}

/// `DELETE_REPOSITORY`: removes the repository row and every row that
/// references it, innermost first, then deletes the working copy on disk.
/// Enrichments/embeddings/bm25 entries for the repository's snippets are
/// left alone if those snippets are still referenced by another repository
/// (content-addressed dedup means the same snippet can be shared).
pub async fn delete_repository(pool: &SqlitePool, repo_id: i64) -> Result<()> {
    let repo = find_by_id(pool, repo_id).await?;
    let mut tx = pool.begin().await?;

    let commit_scoped_enrichment_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT ea.enrichment_id FROM enrichment_associations ea
         WHERE ea.entity_type = 'git_commit'
           AND ea.entity_id IN (SELECT commit_sha FROM commits WHERE repo_id = ?)",
    )
    .bind(repo_id)
    .fetch_all(&mut *tx)
    .await?;

    let repo_scoped_enrichment_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT enrichment_id FROM enrichment_associations WHERE entity_type = 'git_repo' AND entity_id = ?",
    )
    .bind(repo_id.to_string())
    .fetch_all(&mut *tx)
    .await?;

    for id in commit_scoped_enrichment_ids
        .iter()
        .chain(repo_scoped_enrichment_ids.iter())
    {
        sqlx::query("DELETE FROM enrichment_associations WHERE enrichment_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM enrichments WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query(
        "DELETE FROM commit_snippets WHERE commit_sha IN (SELECT commit_sha FROM commits WHERE repo_id = ?)",
    )
    .bind(repo_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "DELETE FROM commit_files WHERE commit_sha IN (SELECT commit_sha FROM commits WHERE repo_id = ?)",
    )
    .bind(repo_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM branches WHERE repo_id = ?")
        .bind(repo_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM tags WHERE repo_id = ?")
        .bind(repo_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM commits WHERE repo_id = ?")
        .bind(repo_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM repositories WHERE id = ?")
        .bind(repo_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    if let Some(cloned_path) = repo.cloned_path {
        let path = PathBuf::from(cloned_path);
        if path.exists() {
            tokio::fs::remove_dir_all(&path).await?;
        }
    }

    Ok(())
}

/// Resolves the commit the repository's tracking config currently points
/// at: the branch's head, or the newest commit reachable by a matching tag.
async fn resolve_tracked_commit(
    git: &dyn GitAdapter,
    repo: &Repository,
    cloned_path: &std::path::Path,
) -> Result<String> {
    let tracking = repo
        .tracking_config()
        .ok_or_else(|| KoditError::Inconsistent("unknown tracking_type in repository row".into()))?;

    match tracking.tracking_type {
        crate::db::model::TrackingType::Branch => {
            let branches = git.branches(cloned_path).await?;
            branches
                .into_iter()
                .find(|b| b.name == tracking.value)
                .map(|b| b.head_commit_sha)
                .ok_or_else(|| {
                    KoditError::NotFound(format!("tracked branch {} not found", tracking.value))
                })
        }
        crate::db::model::TrackingType::Tag => {
            let pattern = glob_to_regex(&tracking.value);
            let mut tags = git.tags(cloned_path).await?;
            tags.retain(|t| pattern.is_match(&t.name));
            tags.sort_by_key(|t| t.created_at);
            tags.into_iter()
                .last()
                .map(|t| t.target_commit_sha)
                .ok_or_else(|| {
                    KoditError::NotFound(format!("no tag matching {} found", tracking.value))
                })
        }
    }
}

fn glob_to_regex(glob: &str) -> regex::Regex {
    let escaped = regex::escape(glob).replace(r"\*", ".*").replace(r"\?", ".");
    regex::Regex::new(&format!("^{escaped}$")).unwrap_or_else(|_| regex::Regex::new("$^").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::connect_in_memory;
    use crate::queue::TaskQueue;

    #[tokio::test]
    async fn create_or_get_repository_inserts_a_new_row() {
        let pool = connect_in_memory().await.unwrap();
        let queue = TaskQueue::new(pool.clone());

        let (repo, created) = create_or_get_repository(&pool, &queue, "https://example.com/a.git")
            .await
            .unwrap();

        assert!(created);
        assert_eq!(repo.remote_uri, "https://example.com/a.git");
    }

    #[tokio::test]
    async fn create_or_get_repository_updates_a_rotated_credential() {
        let pool = connect_in_memory().await.unwrap();
        let queue = TaskQueue::new(pool.clone());

        let (first, _) = create_or_get_repository(&pool, &queue, "https://old-token@example.com/a.git")
            .await
            .unwrap();

        let (second, created) =
            create_or_get_repository(&pool, &queue, "https://new-token@example.com/a.git")
                .await
                .unwrap();

        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.remote_uri, "https://new-token@example.com/a.git");
        assert_eq!(second.sanitized_remote_uri, first.sanitized_remote_uri);

        let stored_uri: String = sqlx::query_scalar("SELECT remote_uri FROM repositories WHERE id = ?")
            .bind(first.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stored_uri, "https://new-token@example.com/a.git");
    }
}
