//! `SCAN_COMMIT` (§4.4): reads a commit's metadata and file listing from the
//! local clone and persists them. Idempotent — rerunning for an
//! already-scanned commit just overwrites the same rows with the same
//! values.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{KoditError, Result};
use crate::git::GitAdapter;

pub async fn scan_commit(
    pool: &SqlitePool,
    git: &dyn GitAdapter,
    repo_id: i64,
    commit_sha: &str,
) -> Result<()> {
    let cloned_path: String = sqlx::query_scalar("SELECT cloned_path FROM repositories WHERE id = ?")
        .bind(repo_id)
        .fetch_optional(pool)
        .await?
        .flatten()
        .ok_or_else(|| KoditError::Inconsistent(format!("repository {repo_id} has no cloned_path")))?;
    let cloned_path = std::path::Path::new(&cloned_path);

    let metadata = git.commit_metadata(cloned_path, commit_sha).await?;
    let files = git.file_listing(cloned_path, commit_sha).await?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO commits (commit_sha, repo_id, date, author, message, parent_commit_sha)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT (commit_sha) DO UPDATE SET
             date = excluded.date, author = excluded.author,
             message = excluded.message, parent_commit_sha = excluded.parent_commit_sha",
    )
    .bind(&metadata.commit_sha)
    .bind(repo_id)
    .bind(metadata.date)
    .bind(&metadata.author)
    .bind(&metadata.message)
    .bind(&metadata.parent_commit_sha)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM commit_files WHERE commit_sha = ?")
        .bind(commit_sha)
        .execute(&mut *tx)
        .await?;

    for file in &files {
        let extension = std::path::Path::new(&file.path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_owned();

        sqlx::query(
            "INSERT INTO commit_files (commit_sha, path, blob_sha, mime_type, size, extension)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(commit_sha)
        .bind(&file.path)
        .bind(&file.blob_sha)
        .bind(&file.mime_type)
        .bind(file.size as i64)
        .bind(extension)
        .execute(&mut *tx)
        .await?;
    }

    let num_commits: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM commits WHERE repo_id = ?")
        .bind(repo_id)
        .fetch_one(&mut *tx)
        .await?;

    sqlx::query("UPDATE repositories SET last_scanned_at = ?, num_commits = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(num_commits)
        .bind(repo_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(repo_id, commit_sha, files = files.len(), "scanned commit");
    Ok(())
}
