pub mod gix_adapter;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRef {
    pub name: String,
    pub head_commit_sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRef {
    pub name: String,
    pub target_commit_sha: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMetadata {
    pub commit_sha: String,
    pub date: DateTime<Utc>,
    pub author: String,
    pub message: String,
    pub parent_commit_sha: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub blob_sha: String,
    pub size: u64,
    pub mime_type: String,
}

/// Capability interface the core requires from git (§6). Implementations
/// are swappable — `gix_adapter::GixAdapter` for production, an in-memory
/// fake for tests — so the indexing pipeline never talks to a subprocess
/// or a specific git library directly.
#[async_trait]
pub trait GitAdapter: Send + Sync {
    async fn clone_repo(&self, remote_uri: &str, dest: &Path) -> Result<()>;
    async fn pull(&self, dest: &Path) -> Result<()>;
    async fn branches(&self, dest: &Path) -> Result<Vec<BranchRef>>;
    async fn tags(&self, dest: &Path) -> Result<Vec<TagRef>>;
    async fn commit_metadata(&self, dest: &Path, sha: &str) -> Result<CommitMetadata>;
    async fn file_listing(&self, dest: &Path, sha: &str) -> Result<Vec<FileEntry>>;
}
