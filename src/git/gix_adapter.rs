use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::error::{KoditError, Result};

use super::{BranchRef, CommitMetadata, FileEntry, GitAdapter, TagRef};

/// `gix`-backed implementation of [`GitAdapter`].
///
/// `gix` is synchronous; every call here runs on the blocking thread pool
/// (§5: "handlers may suspend during git subprocess invocation" — for us
/// that suspension point is the `spawn_blocking` join, not a subprocess).
pub struct GixAdapter;

impl GixAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GixAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn io_err(e: impl std::fmt::Display) -> KoditError {
    KoditError::Git(anyhow::anyhow!("{e}"))
}

#[async_trait]
impl GitAdapter for GixAdapter {
    async fn clone_repo(&self, remote_uri: &str, dest: &Path) -> Result<()> {
        let remote_uri = remote_uri.to_owned();
        let dest = dest.to_owned();

        tokio::task::spawn_blocking(move || -> Result<()> {
            std::fs::create_dir_all(&dest)?;

            let mut prepare = gix::prepare_clone(remote_uri.as_str(), &dest).map_err(io_err)?;
            let (mut checkout, _outcome) = prepare
                .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
                .map_err(io_err)?;
            checkout
                .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
                .map_err(io_err)?;

            Ok(())
        })
        .await
        .map_err(io_err)??;

        Ok(())
    }

    async fn pull(&self, dest: &Path) -> Result<()> {
        let dest = dest.to_owned();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let repo = gix::open(&dest).map_err(io_err)?;
            let remote = repo
                .find_default_remote(gix::remote::Direction::Fetch)
                .ok_or_else(|| KoditError::Git(anyhow::anyhow!("no default remote")))?
                .map_err(io_err)?;

            let connection = remote
                .connect(gix::remote::Direction::Fetch)
                .map_err(io_err)?;
            connection
                .prepare_fetch(gix::progress::Discard, Default::default())
                .map_err(io_err)?
                .receive(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
                .map_err(io_err)?;

            Ok(())
        })
        .await
        .map_err(io_err)??;

        Ok(())
    }

    async fn branches(&self, dest: &Path) -> Result<Vec<BranchRef>> {
        let dest = dest.to_owned();

        tokio::task::spawn_blocking(move || -> Result<Vec<BranchRef>> {
            let repo = gix::open(&dest).map_err(io_err)?;
            let platform = repo.references().map_err(io_err)?;
            let mut out = Vec::new();

            for r in platform.local_branches().map_err(io_err)? {
                let mut r = r.map_err(io_err)?;
                let name = r
                    .name()
                    .shorten()
                    .to_string();
                let id = r.peel_to_id_in_place().map_err(io_err)?;
                out.push(BranchRef {
                    name,
                    head_commit_sha: id.to_hex().to_string(),
                });
            }

            Ok(out)
        })
        .await
        .map_err(io_err)?
    }

    async fn tags(&self, dest: &Path) -> Result<Vec<TagRef>> {
        let dest = dest.to_owned();

        tokio::task::spawn_blocking(move || -> Result<Vec<TagRef>> {
            let repo = gix::open(&dest).map_err(io_err)?;
            let platform = repo.references().map_err(io_err)?;
            let mut out = Vec::new();

            for r in platform.tags().map_err(io_err)? {
                let mut r = r.map_err(io_err)?;
                let name = r.name().shorten().to_string();
                let id = r.peel_to_id_in_place().map_err(io_err)?;
                let created_at = id
                    .object()
                    .ok()
                    .and_then(|o| o.try_into_commit().ok())
                    .and_then(|c| c.time().ok())
                    .map(|t| timestamp_to_utc(t.seconds))
                    .unwrap_or_else(Utc::now);

                out.push(TagRef {
                    name,
                    target_commit_sha: id.to_hex().to_string(),
                    created_at,
                });
            }

            Ok(out)
        })
        .await
        .map_err(io_err)?
    }

    async fn commit_metadata(&self, dest: &Path, sha: &str) -> Result<CommitMetadata> {
        let dest = dest.to_owned();
        let sha = sha.to_owned();

        tokio::task::spawn_blocking(move || -> Result<CommitMetadata> {
            let repo = gix::open(&dest).map_err(io_err)?;
            let id = gix::ObjectId::from_hex(sha.as_bytes()).map_err(io_err)?;
            let commit = repo.find_commit(id).map_err(io_err)?;
            let decoded = commit.decode().map_err(io_err)?;

            let author = decoded.author.name.to_string();
            let message = decoded.message().title.to_string();
            let date = timestamp_to_utc(decoded.author.time.seconds);
            let parent_commit_sha = decoded.parents().next().map(|p| p.to_hex().to_string());

            Ok(CommitMetadata {
                commit_sha: sha,
                date,
                author,
                message,
                parent_commit_sha,
            })
        })
        .await
        .map_err(io_err)?
    }

    async fn file_listing(&self, dest: &Path, sha: &str) -> Result<Vec<FileEntry>> {
        let dest = dest.to_owned();
        let sha = sha.to_owned();

        tokio::task::spawn_blocking(move || -> Result<Vec<FileEntry>> {
            let repo = gix::open(&dest).map_err(io_err)?;
            let id = gix::ObjectId::from_hex(sha.as_bytes()).map_err(io_err)?;
            let commit = repo.find_commit(id).map_err(io_err)?;
            let tree = commit.tree().map_err(io_err)?;

            let mut out = Vec::new();
            for entry in tree.traverse().breadthfirst.files().map_err(io_err)? {
                if !entry.mode.is_blob() {
                    continue;
                }
                let path = entry.filepath.to_string();
                let blob_sha = entry.oid.to_hex().to_string();
                let size = repo
                    .find_object(entry.oid)
                    .map(|o| o.data.len() as u64)
                    .unwrap_or(0);
                let mime_type = tree_magic_mini::from_filepath(Path::new(&path))
                    .unwrap_or("application/octet-stream")
                    .to_owned();

                out.push(FileEntry {
                    path,
                    blob_sha,
                    size,
                    mime_type,
                });
            }

            Ok(out)
        })
        .await
        .map_err(io_err)?
    }
}

fn timestamp_to_utc(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).single().unwrap_or_else(Utc::now)
}
