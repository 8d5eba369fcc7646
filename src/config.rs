use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Process-wide configuration, parsed from CLI flags or a config file.
///
/// Field layout follows the same `clap` + `serde` dual-derive the rest of
/// this family of services uses: every option is settable from the CLI and
/// has a sane default so the worker can start with zero flags.
#[derive(Serialize, Deserialize, Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Configuration {
    #[clap(long, default_value_os_t = default_index_dir())]
    #[serde(default = "default_index_dir")]
    /// Directory to store all persistent state (sqlite db, tantivy index).
    pub index_dir: PathBuf,

    #[clap(long, default_value_os_t = default_clone_root())]
    #[serde(default = "default_clone_root")]
    /// Root directory under which repositories are cloned.
    pub clone_root: PathBuf,

    #[clap(long, default_value_t = default_sync_interval_secs())]
    #[serde(default = "default_sync_interval_secs")]
    /// How often the sync scheduler enqueues `SYNC_REPOSITORY` per repo.
    pub sync_interval_secs: u64,

    #[clap(long, default_value_t = default_embedding_batch_tokens())]
    #[serde(default = "default_embedding_batch_tokens")]
    /// Token budget per embedding provider request.
    pub embedding_batch_tokens: usize,

    #[clap(long, default_value_t = default_enrichment_concurrency())]
    #[serde(default = "default_enrichment_concurrency")]
    /// Bound on concurrent in-flight enrichment/embedding HTTP calls per handler.
    pub enrichment_concurrency: usize,

    #[clap(long, default_value_t = default_rrf_k())]
    #[serde(default = "default_rrf_k")]
    /// Reciprocal rank fusion constant.
    pub rrf_k: u32,

    #[clap(long, default_value_t = default_worker_idle_sleep_ms())]
    #[serde(default = "default_worker_idle_sleep_ms")]
    /// How long the worker sleeps after finding an empty queue.
    pub worker_idle_sleep_ms: u64,

    #[clap(long, default_value_t = default_qdrant_url())]
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    #[clap(long, default_value_t = default_vector_size())]
    #[serde(default = "default_vector_size")]
    /// Dimensionality of both the code and text embedding collections.
    pub embedding_vector_size: u64,

    #[clap(long, default_value_t = default_embedding_endpoint())]
    #[serde(default = "default_embedding_endpoint")]
    pub embedding_endpoint: String,

    #[clap(long, default_value_t = default_embedding_model())]
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[clap(long, default_value_t = default_enrichment_endpoint())]
    #[serde(default = "default_enrichment_endpoint")]
    pub enrichment_endpoint: String,

    #[clap(long, default_value_t = default_enrichment_model())]
    #[serde(default = "default_enrichment_model")]
    pub enrichment_model: String,

    #[clap(long, env = "KODIT_PROVIDER_API_KEY")]
    #[serde(default)]
    /// Bearer token sent to both the embedding and enrichment endpoints.
    pub provider_api_key: Option<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            index_dir: default_index_dir(),
            clone_root: default_clone_root(),
            sync_interval_secs: default_sync_interval_secs(),
            embedding_batch_tokens: default_embedding_batch_tokens(),
            enrichment_concurrency: default_enrichment_concurrency(),
            rrf_k: default_rrf_k(),
            worker_idle_sleep_ms: default_worker_idle_sleep_ms(),
            qdrant_url: default_qdrant_url(),
            embedding_vector_size: default_vector_size(),
            embedding_endpoint: default_embedding_endpoint(),
            embedding_model: default_embedding_model(),
            enrichment_endpoint: default_enrichment_endpoint(),
            enrichment_model: default_enrichment_model(),
            provider_api_key: None,
        }
    }
}

impl Configuration {
    /// Directory where logs are written to.
    pub fn log_dir(&self) -> PathBuf {
        self.index_dir.join("logs")
    }

    pub fn db_path(&self) -> PathBuf {
        self.index_dir.join("kodit.db")
    }

    pub fn bm25_index_path(&self) -> PathBuf {
        self.index_dir.join("bm25")
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn worker_idle_sleep(&self) -> Duration {
        Duration::from_millis(self.worker_idle_sleep_ms)
    }
}

fn default_index_dir() -> PathBuf {
    match directories::ProjectDirs::from("dev", "kodit", "kodit") {
        Some(dirs) => dirs.data_dir().to_owned(),
        None => "kodit_data".into(),
    }
}

fn default_clone_root() -> PathBuf {
    default_index_dir().join("repos")
}

fn default_sync_interval_secs() -> u64 {
    30 * 60
}

fn default_embedding_batch_tokens() -> usize {
    8192
}

fn default_enrichment_concurrency() -> usize {
    8
}

fn default_rrf_k() -> u32 {
    60
}

fn default_worker_idle_sleep_ms() -> u64 {
    1000
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".to_owned()
}

fn default_vector_size() -> u64 {
    1536
}

fn default_embedding_endpoint() -> String {
    "http://localhost:11434/v1/embeddings".to_owned()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_owned()
}

fn default_enrichment_endpoint() -> String {
    "http://localhost:11434/v1/chat/completions".to_owned()
}

fn default_enrichment_model() -> String {
    "gpt-4o-mini".to_owned()
}
