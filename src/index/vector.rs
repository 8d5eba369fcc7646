//! Vector store backed by `qdrant-client` (§4.6). Two logical collections
//! share the same client: `code` (snippet content embeddings) and `text`
//! (summary-enrichment embeddings, joined back to snippets via
//! `summary_embeddings`).

use qdrant_client::client::QdrantClient;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigOneOf;
use qdrant_client::qdrant::{
    CreateCollection, Distance, PointStruct, SearchPoints, VectorParams, VectorsConfig,
};
use tracing::info;

use crate::error::{KoditError, Result};

pub const CODE_COLLECTION: &str = "kodit_code_embeddings";
pub const TEXT_COLLECTION: &str = "kodit_text_embeddings";

pub struct VectorStore {
    client: QdrantClient,
    vector_size: u64,
}

impl VectorStore {
    pub fn new(client: QdrantClient, vector_size: u64) -> Self {
        Self {
            client,
            vector_size,
        }
    }

    pub async fn ensure_collections(&self) -> Result<()> {
        for collection in [CODE_COLLECTION, TEXT_COLLECTION] {
            let exists = self
                .client
                .collection_info(collection)
                .await
                .is_ok();
            if exists {
                continue;
            }

            self.client
                .create_collection(&CreateCollection {
                    collection_name: collection.to_owned(),
                    vectors_config: Some(VectorsConfig {
                        config: Some(VectorsConfigOneOf::Params(VectorParams {
                            size: self.vector_size,
                            distance: Distance::Cosine.into(),
                            ..Default::default()
                        })),
                    }),
                    ..Default::default()
                })
                .await
                .map_err(|e| KoditError::Embedding(format!("create collection {collection}: {e}")))?;

            info!(collection, "created qdrant collection");
        }

        Ok(())
    }

    pub async fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: Vec<f32>,
    ) -> Result<()> {
        let point_id: qdrant_client::qdrant::PointId = point_id_from_sha(id);
        let payload: qdrant_client::Payload = serde_json::json!({ "id": id })
            .try_into()
            .map_err(|e| KoditError::Embedding(format!("build payload: {e}")))?;
        let point = PointStruct::new(point_id, vector, payload);

        self.client
            .upsert_points_blocking(collection, None, vec![point], None)
            .await
            .map_err(|e| KoditError::Embedding(format!("upsert into {collection}: {e}")))?;
        Ok(())
    }

    /// Returns up to `top_k` `(id, score)` pairs, optionally constrained to
    /// `allowed` ids via a Qdrant filter (filter push-down, §4.6).
    pub async fn search(
        &self,
        collection: &str,
        query_vector: Vec<f32>,
        top_k: u64,
        allowed: Option<&[String]>,
    ) -> Result<Vec<(String, f32)>> {
        let filter = allowed.map(|ids| qdrant_client::qdrant::Filter {
            must: vec![qdrant_client::qdrant::Condition {
                condition_one_of: Some(
                    qdrant_client::qdrant::condition::ConditionOneOf::HasId(
                        qdrant_client::qdrant::HasIdCondition {
                            has_id: ids.iter().map(|id| point_id_from_sha(id)).collect(),
                        },
                    ),
                ),
            }],
            ..Default::default()
        });

        let response = self
            .client
            .search_points(&SearchPoints {
                collection_name: collection.to_owned(),
                vector: query_vector,
                limit: top_k,
                filter,
                with_payload: Some(true.into()),
                ..Default::default()
            })
            .await
            .map_err(|e| KoditError::Embedding(format!("search {collection}: {e}")))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let id = point
                    .payload
                    .get("id")?
                    .as_str()
                    .map(|s| s.to_owned())?;
                Some((id, point.score))
            })
            .collect())
    }
}

/// Qdrant point ids must be a UUID or u64; snippet/enrichment ids are hex
/// shas, so we derive a deterministic UUID from the sha and keep the
/// original id in the point's payload for lookups after a search.
fn point_id_from_sha(sha: &str) -> qdrant_client::qdrant::PointId {
    let uuid = uuid_from_sha(sha);
    uuid.to_string().into()
}

fn uuid_from_sha(sha: &str) -> uuid::Uuid {
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, sha.as_bytes())
}
