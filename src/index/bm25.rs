//! BM25 keyword index (§4.6), backed by `tantivy`.
//!
//! One document per indexed snippet: `snippet_sha` (stored, not indexed for
//! search) and `content` (indexed, BM25-scored). Deletes only happen on
//! rescan/repository deletion (§5) — the index is otherwise append-only.

use std::path::Path;
use std::sync::Arc;

use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Schema, Value, STORED, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, Term};
use tokio::sync::RwLock;

use crate::error::{KoditError, Result};

pub struct Bm25Index {
    index: Index,
    reader: RwLock<IndexReader>,
    snippet_sha_field: tantivy::schema::Field,
    content_field: tantivy::schema::Field,
    writer: tokio::sync::Mutex<IndexWriter>,
}

fn build_schema() -> (Schema, tantivy::schema::Field, tantivy::schema::Field) {
    let mut builder = Schema::builder();
    let snippet_sha = builder.add_text_field("snippet_sha", STORED);
    let content = builder.add_text_field("content", TEXT | STORED);
    (builder.build(), snippet_sha, content)
}

impl Bm25Index {
    pub fn open_or_create(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let (schema, snippet_sha_field, content_field) = build_schema();

        let directory = tantivy::directory::MmapDirectory::open(path)
            .map_err(|e| KoditError::Inconsistent(format!("bm25 index directory: {e}")))?;
        let index = Index::open_or_create(directory, schema)
            .map_err(|e| KoditError::Inconsistent(format!("bm25 index open: {e}")))?;
        let reader = index
            .reader()
            .map_err(|e| KoditError::Inconsistent(format!("bm25 reader: {e}")))?;
        let writer = index
            .writer(50_000_000)
            .map_err(|e| KoditError::Inconsistent(format!("bm25 writer: {e}")))?;

        Ok(Self {
            index,
            reader: RwLock::new(reader),
            snippet_sha_field,
            content_field,
            writer: tokio::sync::Mutex::new(writer),
        })
    }

    pub async fn add_document(&self, snippet_sha: &str, content: &str) -> Result<()> {
        let writer = self.writer.lock().await;
        writer
            .add_document(doc!(
                self.snippet_sha_field => snippet_sha,
                self.content_field => content,
            ))
            .map_err(|e| KoditError::Inconsistent(format!("bm25 add_document: {e}")))?;
        Ok(())
    }

    pub async fn delete_document(&self, snippet_sha: &str) -> Result<()> {
        let writer = self.writer.lock().await;
        let term = Term::from_field_text(self.snippet_sha_field, snippet_sha);
        writer.delete_term(term);
        Ok(())
    }

    pub async fn commit(&self) -> Result<()> {
        {
            let mut writer = self.writer.lock().await;
            writer
                .commit()
                .map_err(|e| KoditError::Inconsistent(format!("bm25 commit: {e}")))?;
        }
        let mut reader = self.reader.write().await;
        *reader = self
            .index
            .reader()
            .map_err(|e| KoditError::Inconsistent(format!("bm25 reader refresh: {e}")))?;
        Ok(())
    }

    /// Returns up to `top_k` `(snippet_sha, score)` pairs for one keyword,
    /// optionally constrained to `allowed` ids (filter push-down, §4.6).
    pub async fn search(
        &self,
        keyword: &str,
        top_k: usize,
        allowed: Option<&[String]>,
    ) -> Result<Vec<(String, f32)>> {
        let reader = self.reader.read().await;
        let searcher = reader.searcher();

        let parser = QueryParser::for_index(&self.index, vec![self.content_field]);
        let query = parser
            .parse_query(keyword)
            .map_err(|e| KoditError::Inconsistent(format!("bm25 query parse: {e}")))?;

        let hits = searcher
            .search(&query, &TopDocs::with_limit(top_k.max(1) * 4))
            .map_err(|e| KoditError::Inconsistent(format!("bm25 search: {e}")))?;

        let mut out = Vec::new();
        for (score, addr) in hits {
            let retrieved = searcher
                .doc(addr)
                .map_err(|e| KoditError::Inconsistent(format!("bm25 doc fetch: {e}")))?;
            let Some(sha) = retrieved
                .get_first(self.snippet_sha_field)
                .and_then(|v| v.as_text())
                .map(|s| s.to_owned())
            else {
                continue;
            };

            if let Some(allowed) = allowed {
                if !allowed.iter().any(|a| a == &sha) {
                    continue;
                }
            }

            out.push((sha, score));
            if out.len() == top_k {
                break;
            }
        }

        Ok(out)
    }
}

pub type SharedBm25Index = Arc<Bm25Index>;
