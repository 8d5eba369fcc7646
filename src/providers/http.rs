//! HTTP-backed embedding and enrichment providers. Talks to an
//! OpenAI-compatible embeddings endpoint and a chat-completions-style
//! enrichment endpoint; either base URL can point at a local server.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;

use crate::embedding::EmbeddingProvider;
use crate::enrichment::EnrichmentProvider;
use crate::error::{KoditError, Result};

pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    max_tokens_per_request: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(endpoint: String, model: String, api_key: Option<String>, max_tokens_per_request: usize) -> Self {
        Self {
            client: build_client(api_key.as_deref()),
            endpoint,
            model,
            max_tokens_per_request,
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, batch: Vec<(String, String)>) -> Result<Vec<(String, Vec<f32>)>> {
        let (ids, texts): (Vec<String>, Vec<String>) = batch.into_iter().unzip();

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|e| KoditError::Embedding(e.to_string()))?
            .error_for_status()
            .map_err(|e| KoditError::Embedding(e.to_string()))?
            .json::<EmbeddingsResponse>()
            .await
            .map_err(|e| KoditError::Embedding(e.to_string()))?;

        if response.data.len() != ids.len() {
            return Err(KoditError::Embedding(format!(
                "expected {} embeddings, got {}",
                ids.len(),
                response.data.len()
            )));
        }

        Ok(ids
            .into_iter()
            .zip(response.data.into_iter().map(|d| d.embedding))
            .collect())
    }

    fn max_tokens_per_request(&self) -> usize {
        self.max_tokens_per_request
    }
}

pub struct HttpEnrichmentProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl HttpEnrichmentProvider {
    pub fn new(endpoint: String, model: String, api_key: Option<String>) -> Self {
        Self {
            client: build_client(api_key.as_deref()),
            endpoint,
            model,
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl EnrichmentProvider for HttpEnrichmentProvider {
    async fn enrich(&self, id: String, text: String, system_prompt: String) -> Result<(String, String)> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": system_prompt },
                    { "role": "user", "content": text },
                ],
            }))
            .send()
            .await
            .map_err(|e| KoditError::Enrichment(e.to_string()))?
            .error_for_status()
            .map_err(|e| KoditError::Enrichment(e.to_string()))?
            .json::<ChatResponse>()
            .await
            .map_err(|e| KoditError::Enrichment(e.to_string()))?;

        let content = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| KoditError::Enrichment("empty completion choices".into()))?;

        Ok((id, content))
    }
}

fn build_client(api_key: Option<&str>) -> reqwest::Client {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(key) = api_key {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {key}")) {
            headers.insert(AUTHORIZATION, value);
        }
    }

    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn embed_zips_ids_back_onto_returned_vectors_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "embedding": [0.1, 0.2] },
                    { "embedding": [0.3, 0.4] },
                ]
            })))
            .mount(&server)
            .await;

        let provider = HttpEmbeddingProvider::new(
            format!("{}/embeddings", server.uri()),
            "test-model".to_owned(),
            None,
            8192,
        );

        let result = provider
            .embed(vec![
                ("a".to_owned(), "alpha".to_owned()),
                ("b".to_owned(), "beta".to_owned()),
            ])
            .await
            .unwrap();

        assert_eq!(result, vec![
            ("a".to_owned(), vec![0.1, 0.2]),
            ("b".to_owned(), vec![0.3, 0.4]),
        ]);
    }

    #[tokio::test]
    async fn embed_rejects_a_mismatched_vector_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "embedding": [0.1] }]
            })))
            .mount(&server)
            .await;

        let provider = HttpEmbeddingProvider::new(
            format!("{}/embeddings", server.uri()),
            "test-model".to_owned(),
            None,
            8192,
        );

        let err = provider
            .embed(vec![
                ("a".to_owned(), "alpha".to_owned()),
                ("b".to_owned(), "beta".to_owned()),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, KoditError::Embedding(_)));
    }

    #[tokio::test]
    async fn enrich_extracts_the_first_completion_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [
                    { "message": { "content": "this snippet adds two numbers" } },
                ]
            })))
            .mount(&server)
            .await;

        let provider = HttpEnrichmentProvider::new(
            format!("{}/chat", server.uri()),
            "test-model".to_owned(),
            Some("secret".to_owned()),
        );

        let (id, content) = provider
            .enrich("s1".to_owned(), "fn add(a, b) { a + b }".to_owned(), "Summarize".to_owned())
            .await
            .unwrap();

        assert_eq!(id, "s1");
        assert_eq!(content, "this snippet adds two numbers");
    }

    #[tokio::test]
    async fn enrich_rejects_an_empty_choices_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": []
            })))
            .mount(&server)
            .await;

        let provider = HttpEnrichmentProvider::new(
            format!("{}/chat", server.uri()),
            "test-model".to_owned(),
            None,
        );

        let err = provider
            .enrich("s1".to_owned(), "text".to_owned(), "prompt".to_owned())
            .await
            .unwrap_err();
        assert!(matches!(err, KoditError::Enrichment(_)));
    }
}
