//! Enrichment provider capability (§6) and the seven enrichment handlers
//! that back `CREATE_*_FOR_COMMIT` task types.

pub mod handlers;

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    async fn enrich(&self, id: String, text: String, system_prompt: String) -> Result<(String, String)>;
}
