//! Embedding provider capability (§6): batches `(id, text)` pairs up to a
//! token budget and returns `(id, vector)` pairs. The concrete provider
//! (local model, remote HTTP API) is out of scope — only the trait and a
//! token-budget batching helper live here.

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, batch: Vec<(String, String)>) -> Result<Vec<(String, Vec<f32>)>>;
    fn max_tokens_per_request(&self) -> usize;
}

/// Very rough token estimate — whitespace-separated words, inflated by a
/// constant factor for sub-word tokenization. Good enough to keep batches
/// under a provider's token ceiling without pulling in a full tokenizer.
fn estimate_tokens(text: &str) -> usize {
    (text.split_whitespace().count() as f64 * 1.3).ceil() as usize
}

/// Splits `items` into batches whose estimated token sum stays under
/// `max_tokens`. A single item exceeding the budget gets its own
/// (oversized) batch rather than being silently dropped.
pub fn batch_by_token_budget(
    items: Vec<(String, String)>,
    max_tokens: usize,
) -> Vec<Vec<(String, String)>> {
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut current_tokens = 0usize;

    for (id, text) in items {
        let tokens = estimate_tokens(&text);
        if !current.is_empty() && current_tokens + tokens > max_tokens {
            batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current_tokens += tokens;
        current.push((id, text));
    }

    if !current.is_empty() {
        batches.push(current);
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_batches_at_token_budget() {
        let items: Vec<(String, String)> = (0..5)
            .map(|i| (i.to_string(), "word ".repeat(100)))
            .collect();

        let batches = batch_by_token_budget(items, 200);
        assert!(batches.len() > 1);
        for batch in &batches {
            let total: usize = batch.iter().map(|(_, t)| estimate_tokens(t)).sum();
            assert!(total <= 260); // one oversized item may straddle slightly under own cap
        }
    }

    #[test]
    fn oversized_single_item_gets_its_own_batch() {
        let items = vec![("a".to_owned(), "word ".repeat(1000))];
        let batches = batch_by_token_budget(items, 10);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
    }
}
