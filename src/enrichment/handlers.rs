//! Each `CREATE_*_FOR_COMMIT` handler gathers its input text, calls the
//! enrichment provider once per unit of work, and persists an `Enrichment`
//! row plus its `EnrichmentAssociation`. Snippet-level enrichments
//! (summary) iterate over the commit's snippets; commit-level ones
//! (architecture, api docs, commit description, database schema, cookbook,
//! repository structure) run once per commit.

use sqlx::SqlitePool;
use tracing::info;

use crate::db::model::EnrichmentType;
use crate::error::Result;

use super::EnrichmentProvider;

const SUMMARY_SYSTEM_PROMPT: &str =
    "Summarize what this code snippet does in one or two sentences.";
const ARCHITECTURE_SYSTEM_PROMPT: &str =
    "Describe the architectural role of this commit's changed files.";
const API_DOCS_SYSTEM_PROMPT: &str = "Document the public API surface exposed by this commit.";
const COMMIT_DESCRIPTION_SYSTEM_PROMPT: &str = "Describe what this commit changes and why.";
const DATABASE_SCHEMA_SYSTEM_PROMPT: &str = "Describe any database schema touched by this commit.";
const COOKBOOK_SYSTEM_PROMPT: &str = "Write a short how-to recipe based on this commit's code.";
const REPOSITORY_STRUCTURE_SYSTEM_PROMPT: &str =
    "Describe the overall layout and purpose of this repository's directories.";

/// The id of an existing enrichment of `enrichment_type` for the given
/// entity, if one was already persisted. Replays of a pipeline stage must
/// not duplicate enrichments (at most one `(entity_id, type, subtype)` per
/// the associations table), so every handler checks this before calling
/// the provider.
async fn existing_enrichment_id(
    pool: &SqlitePool,
    enrichment_type: EnrichmentType,
    entity_type: &str,
    entity_id: &str,
) -> Result<Option<i64>> {
    sqlx::query_scalar(
        "SELECT e.id FROM enrichment_associations ea
         JOIN enrichments e ON e.id = ea.enrichment_id
         WHERE e.type = ? AND ea.entity_type = ? AND ea.entity_id = ?",
    )
    .bind(enrichment_type.as_str())
    .bind(entity_type)
    .bind(entity_id)
    .fetch_optional(pool)
    .await
    .map_err(Into::into)
}

async fn persist_enrichment(
    pool: &SqlitePool,
    enrichment_type: EnrichmentType,
    content: &str,
    entity_type: &str,
    entity_id: &str,
) -> Result<i64> {
    let id = sqlx::query("INSERT INTO enrichments (type, content) VALUES (?, ?)")
        .bind(enrichment_type.as_str())
        .bind(content)
        .execute(pool)
        .await?
        .last_insert_rowid();

    sqlx::query(
        "INSERT INTO enrichment_associations (enrichment_id, entity_type, entity_id) VALUES (?, ?, ?)",
    )
    .bind(id)
    .bind(entity_type)
    .bind(entity_id)
    .execute(pool)
    .await?;

    Ok(id)
}

/// `CREATE_SUMMARY_ENRICHMENT_FOR_COMMIT`: one summary enrichment per
/// snippet introduced in this commit.
pub async fn create_summary_enrichments(
    pool: &SqlitePool,
    provider: &dyn EnrichmentProvider,
    commit_sha: &str,
) -> Result<Vec<i64>> {
    let snippet_shas: Vec<String> = sqlx::query_scalar(
        "SELECT snippet_sha FROM commit_snippets WHERE commit_sha = ?",
    )
    .bind(commit_sha)
    .fetch_all(pool)
    .await?;

    let mut ids = Vec::with_capacity(snippet_shas.len());
    for sha in snippet_shas {
        if existing_enrichment_id(pool, EnrichmentType::Summary, "snippet_v2", &sha)
            .await?
            .is_some()
        {
            continue;
        }

        let content: String = sqlx::query_scalar("SELECT content FROM snippets WHERE sha = ?")
            .bind(&sha)
            .fetch_one(pool)
            .await?;

        let (_, summary) = provider
            .enrich(sha.clone(), content, SUMMARY_SYSTEM_PROMPT.to_owned())
            .await?;

        let id = persist_enrichment(
            pool,
            EnrichmentType::Summary,
            &summary,
            "snippet_v2",
            &sha,
        )
        .await?;
        ids.push(id);
    }

    info!(commit_sha, count = ids.len(), "created summary enrichments");
    Ok(ids)
}

async fn gathered_commit_text(pool: &SqlitePool, commit_sha: &str) -> Result<String> {
    let paths: Vec<String> =
        sqlx::query_scalar("SELECT path FROM commit_files WHERE commit_sha = ?")
            .bind(commit_sha)
            .fetch_all(pool)
            .await?;
    Ok(paths.join("\n"))
}

macro_rules! commit_level_handler {
    ($name:ident, $enrichment_type:expr, $system_prompt:expr) => {
        pub async fn $name(
            pool: &SqlitePool,
            provider: &dyn EnrichmentProvider,
            commit_sha: &str,
        ) -> Result<i64> {
            if let Some(id) =
                existing_enrichment_id(pool, $enrichment_type, "git_commit", commit_sha).await?
            {
                return Ok(id);
            }

            let text = gathered_commit_text(pool, commit_sha).await?;
            let (_, content) = provider
                .enrich(commit_sha.to_owned(), text, $system_prompt.to_owned())
                .await?;
            persist_enrichment(pool, $enrichment_type, &content, "git_commit", commit_sha).await
        }
    };
}

commit_level_handler!(
    create_architecture_enrichment,
    EnrichmentType::Architecture,
    ARCHITECTURE_SYSTEM_PROMPT
);
commit_level_handler!(
    create_api_docs_enrichment,
    EnrichmentType::ApiDocs,
    API_DOCS_SYSTEM_PROMPT
);
commit_level_handler!(
    create_commit_description_enrichment,
    EnrichmentType::CommitDescription,
    COMMIT_DESCRIPTION_SYSTEM_PROMPT
);
commit_level_handler!(
    create_database_schema_enrichment,
    EnrichmentType::DatabaseSchema,
    DATABASE_SCHEMA_SYSTEM_PROMPT
);
commit_level_handler!(
    create_cookbook_enrichment,
    EnrichmentType::Cookbook,
    COOKBOOK_SYSTEM_PROMPT
);
commit_level_handler!(
    create_repository_structure_enrichment,
    EnrichmentType::RepositoryStructure,
    REPOSITORY_STRUCTURE_SYSTEM_PROMPT
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::connect_in_memory;
    use async_trait::async_trait;
    use chrono::Utc;

    struct EchoProvider;

    #[async_trait]
    impl EnrichmentProvider for EchoProvider {
        async fn enrich(
            &self,
            id: String,
            text: String,
            _system_prompt: String,
        ) -> Result<(String, String)> {
            Ok((id, format!("enriched: {text}")))
        }
    }

    async fn seed_commit_with_snippet(pool: &SqlitePool, commit_sha: &str, snippet_sha: &str) {
        sqlx::query(
            "INSERT INTO repositories (remote_uri, sanitized_remote_uri) VALUES ('https://a', 'https://a')",
        )
        .execute(pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO commits (commit_sha, repo_id, date, author, message) VALUES (?, 1, ?, 'a', 'm')",
        )
        .bind(commit_sha)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO snippets (sha, content, extension) VALUES (?, 'fn a() {}', 'rs')")
            .bind(snippet_sha)
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO commit_snippets (commit_sha, snippet_sha) VALUES (?, ?)")
            .bind(commit_sha)
            .bind(snippet_sha)
            .execute(pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn summary_enrichment_persists_one_row_per_snippet() {
        let pool = connect_in_memory().await.unwrap();
        seed_commit_with_snippet(&pool, "c1", "s1").await;

        let ids = create_summary_enrichments(&pool, &EchoProvider, "c1").await.unwrap();
        assert_eq!(ids.len(), 1);

        let (enrichment_type, content): (String, String) =
            sqlx::query_as("SELECT type, content FROM enrichments WHERE id = ?")
                .bind(ids[0])
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(enrichment_type, EnrichmentType::Summary.as_str());
        assert_eq!(content, "enriched: fn a() {}");

        let (entity_type, entity_id): (String, String) = sqlx::query_as(
            "SELECT entity_type, entity_id FROM enrichment_associations WHERE enrichment_id = ?",
        )
        .bind(ids[0])
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(entity_type, "snippet_v2");
        assert_eq!(entity_id, "s1");
    }

    #[tokio::test]
    async fn commit_level_handler_associates_with_the_commit_not_a_snippet() {
        let pool = connect_in_memory().await.unwrap();
        seed_commit_with_snippet(&pool, "c1", "s1").await;
        sqlx::query(
            "INSERT INTO commit_files (commit_sha, path, blob_sha, mime_type, size, extension)
             VALUES ('c1', 'src/lib.rs', 'blob', 'text/plain', 0, 'rs')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let id = create_architecture_enrichment(&pool, &EchoProvider, "c1")
            .await
            .unwrap();

        let (entity_type, entity_id): (String, String) = sqlx::query_as(
            "SELECT entity_type, entity_id FROM enrichment_associations WHERE enrichment_id = ?",
        )
        .bind(id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(entity_type, "git_commit");
        assert_eq!(entity_id, "c1");

        let content: String = sqlx::query_scalar("SELECT content FROM enrichments WHERE id = ?")
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(content, "enriched: src/lib.rs");
    }

    #[tokio::test]
    async fn summary_enrichment_is_not_duplicated_on_replay() {
        let pool = connect_in_memory().await.unwrap();
        seed_commit_with_snippet(&pool, "c1", "s1").await;

        let first = create_summary_enrichments(&pool, &EchoProvider, "c1").await.unwrap();
        let second = create_summary_enrichments(&pool, &EchoProvider, "c1").await.unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM enrichments")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn commit_level_enrichment_returns_the_same_id_on_replay() {
        let pool = connect_in_memory().await.unwrap();
        seed_commit_with_snippet(&pool, "c1", "s1").await;
        sqlx::query(
            "INSERT INTO commit_files (commit_sha, path, blob_sha, mime_type, size, extension)
             VALUES ('c1', 'src/lib.rs', 'blob', 'text/plain', 0, 'rs')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let first = create_architecture_enrichment(&pool, &EchoProvider, "c1").await.unwrap();
        let second = create_architecture_enrichment(&pool, &EchoProvider, "c1").await.unwrap();

        assert_eq!(first, second);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM enrichments")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
