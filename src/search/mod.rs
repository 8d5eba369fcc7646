//! Hybrid search (§4.6): BM25 keywords, code-vector, and text-vector
//! candidate lists fused by reciprocal rank fusion.

use sqlx::SqlitePool;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::index::{Bm25Index, VectorStore};

#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub language: Option<String>,
    pub author: Option<String>,
    pub date_from: Option<chrono::DateTime<chrono::Utc>>,
    pub date_to: Option<chrono::DateTime<chrono::Utc>>,
    pub repo_id: Option<i64>,
    pub path_prefix: Option<String>,
}

impl SearchFilter {
    fn is_empty(&self) -> bool {
        self.language.is_none()
            && self.author.is_none()
            && self.date_from.is_none()
            && self.date_to.is_none()
            && self.repo_id.is_none()
            && self.path_prefix.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub keywords: Vec<String>,
    pub code_query: Option<String>,
    pub text_query: Option<String>,
    pub top_k: usize,
    pub filter: SearchFilter,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub snippet_sha: String,
    pub fused_score: f64,
    pub bm25_score: Option<f32>,
    pub code_vector_score: Option<f32>,
    pub text_vector_score: Option<f32>,
}

/// Resolves the filter predicate to a concrete set of eligible snippet ids
/// against the relational store, before any per-mode retrieval runs
/// (filter push-down, §4.6). Returns `None` when the filter is empty,
/// meaning "no constraint" rather than "match nothing".
async fn resolve_filter_ids(pool: &SqlitePool, filter: &SearchFilter) -> Result<Option<Vec<String>>> {
    if filter.is_empty() {
        return Ok(None);
    }

    let mut query = String::from(
        "SELECT DISTINCT cs.snippet_sha FROM commit_snippets cs
         JOIN commits c ON c.commit_sha = cs.commit_sha
         JOIN commit_files cf ON cf.commit_sha = cs.commit_sha
         WHERE 1 = 1",
    );
    if filter.language.is_some() {
        query.push_str(" AND cf.extension = ?");
    }
    if filter.author.is_some() {
        query.push_str(" AND c.author = ?");
    }
    if filter.date_from.is_some() {
        query.push_str(" AND c.date >= ?");
    }
    if filter.date_to.is_some() {
        query.push_str(" AND c.date <= ?");
    }
    if filter.repo_id.is_some() {
        query.push_str(" AND c.repo_id = ?");
    }
    if filter.path_prefix.is_some() {
        query.push_str(" AND cf.path LIKE ?");
    }

    let mut q = sqlx::query_scalar::<_, String>(&query);
    if let Some(ref lang) = filter.language {
        q = q.bind(lang.clone());
    }
    if let Some(ref author) = filter.author {
        q = q.bind(author.clone());
    }
    if let Some(date_from) = filter.date_from {
        q = q.bind(date_from);
    }
    if let Some(date_to) = filter.date_to {
        q = q.bind(date_to);
    }
    if let Some(repo_id) = filter.repo_id {
        q = q.bind(repo_id);
    }
    if let Some(ref prefix) = filter.path_prefix {
        q = q.bind(format!("{prefix}%"));
    }

    Ok(Some(q.fetch_all(pool).await?))
}

pub struct HybridSearch<'a> {
    pub pool: &'a SqlitePool,
    pub bm25: &'a Bm25Index,
    pub vector_store: &'a VectorStore,
    pub code_embedder: &'a dyn EmbeddingProvider,
    pub text_embedder: &'a dyn EmbeddingProvider,
    /// Reciprocal rank fusion constant (`Configuration::rrf_k`); 60 is the
    /// conventional default across RRF implementations.
    pub rrf_k: f64,
}

impl<'a> HybridSearch<'a> {
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let allowed = resolve_filter_ids(self.pool, &request.filter).await?;
        let allowed_slice = allowed.as_deref();

        let mut bm25_candidates: Vec<(String, f32)> = Vec::new();
        for keyword in &request.keywords {
            bm25_candidates.extend(
                self.bm25
                    .search(keyword, request.top_k, allowed_slice)
                    .await?,
            );
        }

        let code_candidates = if let Some(ref query) = request.code_query {
            let vectors = self
                .code_embedder
                .embed(vec![("query".to_owned(), query.clone())])
                .await?;
            let (_, vector) = vectors
                .into_iter()
                .next()
                .ok_or_else(|| crate::error::KoditError::Embedding("empty code query embedding".into()))?;
            self.vector_store
                .search(crate::index::vector::CODE_COLLECTION, vector, request.top_k as u64, allowed_slice)
                .await?
        } else {
            Vec::new()
        };

        let text_candidates = if let Some(ref query) = request.text_query {
            let vectors = self
                .text_embedder
                .embed(vec![("query".to_owned(), query.clone())])
                .await?;
            let (_, vector) = vectors
                .into_iter()
                .next()
                .ok_or_else(|| crate::error::KoditError::Embedding("empty text query embedding".into()))?;
            let enrichment_hits = self
                .vector_store
                .search(crate::index::vector::TEXT_COLLECTION, vector, request.top_k as u64, None)
                .await?;
            self.map_enrichment_hits_to_snippets(enrichment_hits, allowed_slice).await?
        } else {
            Vec::new()
        };

        let fused = fuse(&bm25_candidates, &code_candidates, &text_candidates, request.top_k, self.rrf_k);
        Ok(fused)
    }

    /// Text-vector search returns summary-enrichment ids; resolve each to
    /// its snippet id via the stored `summary_embeddings` association.
    async fn map_enrichment_hits_to_snippets(
        &self,
        hits: Vec<(String, f32)>,
        allowed: Option<&[String]>,
    ) -> Result<Vec<(String, f32)>> {
        let mut out = Vec::with_capacity(hits.len());
        for (enrichment_id, score) in hits {
            let Ok(enrichment_id) = enrichment_id.parse::<i64>() else {
                continue;
            };
            let snippet_sha: Option<String> = sqlx::query_scalar(
                "SELECT snippet_sha FROM summary_embeddings WHERE enrichment_id = ?",
            )
            .bind(enrichment_id)
            .fetch_optional(self.pool)
            .await?;

            if let Some(sha) = snippet_sha {
                if let Some(allowed) = allowed {
                    if !allowed.iter().any(|a| a == &sha) {
                        continue;
                    }
                }
                out.push((sha, score));
            }
        }
        Ok(out)
    }
}

/// Reciprocal rank fusion (§4.6), `k` configurable via `Configuration::rrf_k`
/// (60 by default). Each candidate list is
/// already rank-ordered by the caller's retrieval (best first). Ties after
/// fusion are broken by mode-list insertion order: BM25, then code, then
/// text — enforced here by iterating lists in that order when scores tie.
fn fuse(
    bm25: &[(String, f32)],
    code: &[(String, f32)],
    text: &[(String, f32)],
    top_k: usize,
    rrf_k: f64,
) -> Vec<SearchHit> {
    use std::collections::HashMap;

    #[derive(Default)]
    struct Acc {
        score: f64,
        bm25: Option<f32>,
        code: Option<f32>,
        text: Option<f32>,
    }

    // A `Vec` plus an index map (rather than a `BTreeMap`) so first-seen
    // order survives into the final stable sort: a document's position
    // among ties reflects the first list it appeared in (BM25, then code,
    // then text), not alphabetical snippet sha order.
    let mut order: Vec<String> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut accs: Vec<Acc> = Vec::new();

    let mut add_list = |list: &[(String, f32)], assign: fn(&mut Acc, f32)| {
        for (rank, (id, score)) in list.iter().enumerate() {
            let pos = *index.entry(id.clone()).or_insert_with(|| {
                order.push(id.clone());
                accs.push(Acc::default());
                accs.len() - 1
            });
            let entry = &mut accs[pos];
            entry.score += 1.0 / (rrf_k + (rank + 1) as f64);
            assign(entry, *score);
        }
    };

    add_list(bm25, |acc, score| acc.bm25 = Some(score));
    add_list(code, |acc, score| acc.code = Some(score));
    add_list(text, |acc, score| acc.text = Some(score));

    let mut hits: Vec<SearchHit> = order
        .into_iter()
        .zip(accs)
        .map(|(snippet_sha, acc)| SearchHit {
            snippet_sha,
            fused_score: acc.score,
            bm25_score: acc.bm25,
            code_vector_score: acc.code,
            text_vector_score: acc.text,
        })
        .collect();

    // Stable sort: documents tied on fused_score keep their relative
    // first-seen order from `order` above.
    hits.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    hits.truncate(top_k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrf_prefers_documents_ranked_highly_across_lists() {
        let bm25 = vec![("a".to_owned(), 1.0), ("b".to_owned(), 0.5)];
        let code = vec![("b".to_owned(), 0.9), ("a".to_owned(), 0.2)];
        let text = vec![];

        let fused = fuse(&bm25, &code, &text, 10, 60.0);
        assert_eq!(fused.len(), 2);
        // both documents appear at rank 1 and rank 2 across the two lists,
        // so their scores should be very close; "a" appears first in bm25
        // (rank 1) and second in code (rank 2), "b" the reverse — symmetric.
        assert!((fused[0].fused_score - fused[1].fused_score).abs() < 1e-9);
    }

    #[test]
    fn fusion_truncates_to_top_k() {
        let bm25: Vec<(String, f32)> = (0..20).map(|i| (i.to_string(), 1.0)).collect();
        let fused = fuse(&bm25, &[], &[], 5, 60.0);
        assert_eq!(fused.len(), 5);
    }

    #[test]
    fn ties_are_broken_by_mode_list_insertion_order() {
        // "z" and "a" tie at rank 1 of disjoint single-item lists; "z" comes
        // from bm25 (checked first) and "a" from code (checked second), so
        // "z" must sort ahead of "a" despite alphabetical order saying
        // otherwise.
        let bm25 = vec![("z".to_owned(), 1.0)];
        let code = vec![("a".to_owned(), 1.0)];
        let text: Vec<(String, f32)> = vec![];

        let fused = fuse(&bm25, &code, &text, 10, 60.0);
        assert_eq!(fused[0].snippet_sha, "z");
        assert_eq!(fused[1].snippet_sha, "a");
    }
}
