//! Row structs for every persisted entity described in the data model.
//!
//! These mirror the SQL schema in `migrations/0001_init.sql` one-for-one;
//! nothing here re-derives what's already obvious from the column list, per
//! §3 of the spec.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingType {
    Branch,
    Tag,
}

impl TrackingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingType::Branch => "branch",
            TrackingType::Tag => "tag",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "branch" => Some(Self::Branch),
            "tag" => Some(Self::Tag),
            _ => None,
        }
    }
}

/// `tracking_config` is stored as a `(type, value)` pair: a branch name, or
/// a tag glob pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingConfig {
    pub tracking_type: TrackingType,
    pub value: String,
}

impl TrackingConfig {
    pub fn branch(name: impl Into<String>) -> Self {
        Self {
            tracking_type: TrackingType::Branch,
            value: name.into(),
        }
    }

    pub fn tag(pattern: impl Into<String>) -> Self {
        Self {
            tracking_type: TrackingType::Tag,
            value: pattern.into(),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Repository {
    pub id: i64,
    pub remote_uri: String,
    pub sanitized_remote_uri: String,
    pub cloned_path: Option<String>,
    pub tracking_type: String,
    pub tracking_value: String,
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub num_commits: i64,
    pub num_branches: i64,
    pub num_tags: i64,
}

impl Repository {
    pub fn tracking_config(&self) -> Option<TrackingConfig> {
        TrackingType::from_str(&self.tracking_type).map(|tracking_type| TrackingConfig {
            tracking_type,
            value: self.tracking_value.clone(),
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Commit {
    pub commit_sha: String,
    pub repo_id: i64,
    pub date: DateTime<Utc>,
    pub author: String,
    pub message: String,
    pub parent_commit_sha: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CommitFile {
    pub commit_sha: String,
    pub path: String,
    pub blob_sha: String,
    pub mime_type: String,
    pub size: i64,
    pub extension: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Branch {
    pub repo_id: i64,
    pub name: String,
    pub head_commit_sha: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Tag {
    pub repo_id: i64,
    pub name: String,
    pub target_commit_sha: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Snippet {
    pub sha: String,
    pub content: String,
    pub extension: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentType {
    Summary,
    Architecture,
    ApiDocs,
    RepositoryStructure,
    Cookbook,
    DatabaseSchema,
    CommitDescription,
}

impl EnrichmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Architecture => "architecture",
            Self::ApiDocs => "api_docs",
            Self::RepositoryStructure => "repository_structure",
            Self::Cookbook => "cookbook",
            Self::DatabaseSchema => "database_schema",
            Self::CommitDescription => "commit_description",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    SnippetV2,
    GitCommit,
    GitRepo,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SnippetV2 => "snippet_v2",
            Self::GitCommit => "git_commit",
            Self::GitRepo => "git_repo",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Enrichment {
    pub id: i64,
    pub r#type: String,
    pub subtype: Option<String>,
    pub content: String,
    pub language: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EnrichmentAssociation {
    pub enrichment_id: i64,
    pub entity_type: String,
    pub entity_id: String,
}
