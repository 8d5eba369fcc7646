//! Branch/tag synchronization (§4.2, §4.8).
//!
//! Two-phase: upsert every branch/tag whose target commit is already
//! scanned, then delete any database row whose name no longer appears in
//! git. A branch pointing at an unscanned commit is skipped rather than
//! inserted — it will be picked up on the next sync once that commit's
//! `SCAN_COMMIT` task lands, since a foreign-key reference to a commit row
//! that doesn't exist yet would either fail or dangle.

use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::git::GitAdapter;

pub struct SyncOutcome {
    pub num_branches: usize,
    pub num_tags: usize,
}

pub async fn sync_branches_and_tags(
    pool: &SqlitePool,
    git: &dyn GitAdapter,
    repo_id: i64,
    cloned_path: &std::path::Path,
) -> Result<SyncOutcome> {
    let num_branches = sync_branches(pool, git, repo_id, cloned_path).await?;
    let num_tags = sync_tags(pool, git, repo_id, cloned_path).await?;

    sqlx::query("UPDATE repositories SET num_branches = ?, num_tags = ? WHERE id = ?")
        .bind(num_branches as i64)
        .bind(num_tags as i64)
        .bind(repo_id)
        .execute(pool)
        .await?;

    Ok(SyncOutcome {
        num_branches,
        num_tags,
    })
}

async fn commit_is_scanned(pool: &SqlitePool, sha: &str) -> Result<bool> {
    let row = sqlx::query("SELECT 1 FROM commits WHERE commit_sha = ?")
        .bind(sha)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

async fn sync_branches(
    pool: &SqlitePool,
    git: &dyn GitAdapter,
    repo_id: i64,
    cloned_path: &std::path::Path,
) -> Result<usize> {
    let branch_refs = git.branches(cloned_path).await?;
    info!(count = branch_refs.len(), "found branches in git");

    let mut kept_names = Vec::new();
    let mut skipped = 0usize;

    for branch in &branch_refs {
        if !commit_is_scanned(pool, &branch.head_commit_sha).await? {
            skipped += 1;
            debug!(branch = %branch.name, sha = %branch.head_commit_sha, "commit not scanned yet, skipping");
            continue;
        }

        sqlx::query(
            "INSERT INTO branches (repo_id, name, head_commit_sha)
             VALUES (?, ?, ?)
             ON CONFLICT (repo_id, name) DO UPDATE SET head_commit_sha = excluded.head_commit_sha",
        )
        .bind(repo_id)
        .bind(&branch.name)
        .bind(&branch.head_commit_sha)
        .execute(pool)
        .await?;

        kept_names.push(branch.name.clone());
    }

    if skipped > 0 {
        info!(skipped, "skipped branches whose head commit isn't scanned yet");
    }

    let existing: Vec<String> =
        sqlx::query_scalar("SELECT name FROM branches WHERE repo_id = ?")
            .bind(repo_id)
            .fetch_all(pool)
            .await?;

    for name in existing {
        if !kept_names.contains(&name) {
            sqlx::query("DELETE FROM branches WHERE repo_id = ? AND name = ?")
                .bind(repo_id)
                .bind(&name)
                .execute(pool)
                .await?;
            info!(branch = %name, "deleted branch no longer present in git");
        }
    }

    Ok(kept_names.len())
}

async fn sync_tags(
    pool: &SqlitePool,
    git: &dyn GitAdapter,
    repo_id: i64,
    cloned_path: &std::path::Path,
) -> Result<usize> {
    let tag_refs = git.tags(cloned_path).await?;
    info!(count = tag_refs.len(), "found tags in git");

    let mut kept_names = Vec::new();
    let mut skipped = 0usize;

    for tag in &tag_refs {
        if !commit_is_scanned(pool, &tag.target_commit_sha).await? {
            skipped += 1;
            warn!(tag = %tag.name, sha = %tag.target_commit_sha, "target commit not scanned yet, skipping");
            continue;
        }

        sqlx::query(
            "INSERT INTO tags (repo_id, name, target_commit_sha, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (repo_id, name) DO UPDATE SET target_commit_sha = excluded.target_commit_sha",
        )
        .bind(repo_id)
        .bind(&tag.name)
        .bind(&tag.target_commit_sha)
        .bind(tag.created_at)
        .execute(pool)
        .await?;

        kept_names.push(tag.name.clone());
    }

    if skipped > 0 {
        info!(skipped, "skipped tags whose target commit isn't scanned yet");
    }

    let existing: Vec<String> = sqlx::query_scalar("SELECT name FROM tags WHERE repo_id = ?")
        .bind(repo_id)
        .fetch_all(pool)
        .await?;

    for name in existing {
        if !kept_names.contains(&name) {
            sqlx::query("DELETE FROM tags WHERE repo_id = ? AND name = ?")
                .bind(repo_id)
                .bind(&name)
                .execute(pool)
                .await?;
            info!(tag = %name, "deleted tag no longer present in git");
        }
    }

    Ok(kept_names.len())
}
