use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Exhaustive task type enum (§6). Dispatch in `queue::worker` matches on
/// this exhaustively so a new variant fails to compile until it's wired up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    CreateRepository,
    CloneRepository,
    SyncRepository,
    DeleteRepository,
    ScanCommit,
    RescanCommit,
    ExtractSnippetsForCommit,
    CreateBm25IndexForCommit,
    CreateCodeEmbeddingsForCommit,
    CreateSummaryEnrichmentForCommit,
    CreateSummaryEmbeddingsForCommit,
    CreateArchitectureEnrichmentForCommit,
    CreatePublicApiDocsForCommit,
    CreateCommitDescriptionForCommit,
    CreateDatabaseSchemaForCommit,
    CreateCookbookForCommit,
    CreateRepositoryStructureForCommit,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::CreateRepository => "CREATE_REPOSITORY",
            TaskType::CloneRepository => "CLONE_REPOSITORY",
            TaskType::SyncRepository => "SYNC_REPOSITORY",
            TaskType::DeleteRepository => "DELETE_REPOSITORY",
            TaskType::ScanCommit => "SCAN_COMMIT",
            TaskType::RescanCommit => "RESCAN_COMMIT",
            TaskType::ExtractSnippetsForCommit => "EXTRACT_SNIPPETS_FOR_COMMIT",
            TaskType::CreateBm25IndexForCommit => "CREATE_BM25_INDEX_FOR_COMMIT",
            TaskType::CreateCodeEmbeddingsForCommit => "CREATE_CODE_EMBEDDINGS_FOR_COMMIT",
            TaskType::CreateSummaryEnrichmentForCommit => "CREATE_SUMMARY_ENRICHMENT_FOR_COMMIT",
            TaskType::CreateSummaryEmbeddingsForCommit => "CREATE_SUMMARY_EMBEDDINGS_FOR_COMMIT",
            TaskType::CreateArchitectureEnrichmentForCommit => {
                "CREATE_ARCHITECTURE_ENRICHMENT_FOR_COMMIT"
            }
            TaskType::CreatePublicApiDocsForCommit => "CREATE_PUBLIC_API_DOCS_FOR_COMMIT",
            TaskType::CreateCommitDescriptionForCommit => "CREATE_COMMIT_DESCRIPTION_FOR_COMMIT",
            TaskType::CreateDatabaseSchemaForCommit => "CREATE_DATABASE_SCHEMA_FOR_COMMIT",
            TaskType::CreateCookbookForCommit => "CREATE_COOKBOOK_FOR_COMMIT",
            TaskType::CreateRepositoryStructureForCommit => {
                "CREATE_REPOSITORY_STRUCTURE_FOR_COMMIT"
            }
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "CREATE_REPOSITORY" => TaskType::CreateRepository,
            "CLONE_REPOSITORY" => TaskType::CloneRepository,
            "SYNC_REPOSITORY" => TaskType::SyncRepository,
            "DELETE_REPOSITORY" => TaskType::DeleteRepository,
            "SCAN_COMMIT" => TaskType::ScanCommit,
            "RESCAN_COMMIT" => TaskType::RescanCommit,
            "EXTRACT_SNIPPETS_FOR_COMMIT" => TaskType::ExtractSnippetsForCommit,
            "CREATE_BM25_INDEX_FOR_COMMIT" => TaskType::CreateBm25IndexForCommit,
            "CREATE_CODE_EMBEDDINGS_FOR_COMMIT" => TaskType::CreateCodeEmbeddingsForCommit,
            "CREATE_SUMMARY_ENRICHMENT_FOR_COMMIT" => TaskType::CreateSummaryEnrichmentForCommit,
            "CREATE_SUMMARY_EMBEDDINGS_FOR_COMMIT" => TaskType::CreateSummaryEmbeddingsForCommit,
            "CREATE_ARCHITECTURE_ENRICHMENT_FOR_COMMIT" => {
                TaskType::CreateArchitectureEnrichmentForCommit
            }
            "CREATE_PUBLIC_API_DOCS_FOR_COMMIT" => TaskType::CreatePublicApiDocsForCommit,
            "CREATE_COMMIT_DESCRIPTION_FOR_COMMIT" => TaskType::CreateCommitDescriptionForCommit,
            "CREATE_DATABASE_SCHEMA_FOR_COMMIT" => TaskType::CreateDatabaseSchemaForCommit,
            "CREATE_COOKBOOK_FOR_COMMIT" => TaskType::CreateCookbookForCommit,
            "CREATE_REPOSITORY_STRUCTURE_FOR_COMMIT" => {
                TaskType::CreateRepositoryStructureForCommit
            }
            _ => return None,
        })
    }

    /// The fixed pipeline expansion for `SCAN_AND_INDEX_COMMIT` (§4.4). This
    /// isn't itself a `TaskType` — it's a virtual operation that expands
    /// into this ordered sequence, enqueued as one batch.
    pub fn scan_and_index_commit_pipeline() -> &'static [TaskType] {
        &[
            TaskType::ScanCommit,
            TaskType::ExtractSnippetsForCommit,
            TaskType::CreateBm25IndexForCommit,
            TaskType::CreateCodeEmbeddingsForCommit,
            TaskType::CreateSummaryEnrichmentForCommit,
            TaskType::CreateSummaryEmbeddingsForCommit,
            TaskType::CreateArchitectureEnrichmentForCommit,
            TaskType::CreatePublicApiDocsForCommit,
            TaskType::CreateCommitDescriptionForCommit,
            TaskType::CreateDatabaseSchemaForCommit,
            TaskType::CreateCookbookForCommit,
            TaskType::CreateRepositoryStructureForCommit,
        ]
    }

    /// The pipeline run when a brand new repository is cloned: a single
    /// `CLONE_REPOSITORY` task, which itself enqueues the commit pipeline
    /// once the tracked head commit is known.
    pub fn create_new_repository_pipeline() -> &'static [TaskType] {
        &[TaskType::CloneRepository]
    }
}

/// Named priority bands (§4.1). `USER_INITIATED` strictly precedes
/// `BACKGROUND`; within a band, FIFO by `created_at`. We encode this as
/// disjoint numeric ranges so a single `ORDER BY priority, created_at`
/// clause gives exactly the required ordering, with room inside each band
/// for `enqueue_tasks` to preserve pipeline order via increasing offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    UserInitiated,
    Background,
}

impl Priority {
    const USER_INITIATED_BASE: i64 = 0;
    const BACKGROUND_BASE: i64 = 1_000_000_000;

    pub fn base(&self) -> i64 {
        match self {
            Priority::UserInitiated => Self::USER_INITIATED_BASE,
            Priority::Background => Self::BACKGROUND_BASE,
        }
    }

    pub fn offset(&self, index: usize) -> i64 {
        self.base() + index as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    InFlight,
    Done,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::InFlight => "in_flight",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => TaskState::Pending,
            "in_flight" => TaskState::InFlight,
            "done" => TaskState::Done,
            "failed" => TaskState::Failed,
            _ => return None,
        })
    }
}

/// The payload carried by every task. `repo_id` and `commit_sha` are the
/// identity fields most handlers key their idempotency check on (§4.1); the
/// `extra` bag carries anything handler-specific.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPayload {
    pub repo_id: Option<i64>,
    pub commit_sha: Option<String>,
    #[serde(flatten)]
    pub extra: std::collections::BTreeMap<String, Json>,
}

impl TaskPayload {
    pub fn for_repo(repo_id: i64) -> Self {
        Self {
            repo_id: Some(repo_id),
            ..Default::default()
        }
    }

    pub fn for_commit(repo_id: i64, commit_sha: impl Into<String>) -> Self {
        Self {
            repo_id: Some(repo_id),
            commit_sha: Some(commit_sha.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: i64,
    pub r#type: TaskType,
    pub payload: TaskPayload,
    pub priority: i64,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub taken_at: Option<DateTime<Utc>>,
    pub attempts: i64,
    pub last_error: Option<String>,
}
