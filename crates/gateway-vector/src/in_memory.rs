use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use gateway_core::error::GatewayError;
use gateway_core::vector::{Embedder, RetrievedChunk, VectorStore};
use tokio::sync::Mutex;

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// In-memory vector store for tests: linear cosine-similarity scan.
pub struct InMemoryVectorStore {
    embedder: Arc<dyn Embedder>,
    collections: Mutex<HashMap<String, Vec<(String, Vec<f32>)>>>,
}

impl InMemoryVectorStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            collections: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add_texts(&self, collection: &str, texts: Vec<String>) -> Result<(), GatewayError> {
        if texts.is_empty() {
            return Ok(());
        }
        let vectors = self.embedder.embed(texts.clone()).await?;
        let mut collections = self.collections.lock().await;
        let entry = collections.entry(collection.to_string()).or_default();
        entry.extend(texts.into_iter().zip(vectors));
        Ok(())
    }

    async fn similarity_search(
        &self,
        collection: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, GatewayError> {
        let vectors = self.embedder.embed(vec![query.to_string()]).await?;
        let Some(query_vector) = vectors.into_iter().next() else {
            return Ok(Vec::new());
        };

        let collections = self.collections.lock().await;
        let Some(entries) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<RetrievedChunk> = entries
            .iter()
            .map(|(text, vector)| RetrievedChunk {
                text: text.clone(),
                score: cosine(&query_vector, vector),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct IdentityEmbedder;

    #[async_trait]
    impl Embedder for IdentityEmbedder {
        async fn embed(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>, GatewayError> {
            Ok(input
                .iter()
                .map(|s| vec![s.len() as f32, 1.0])
                .collect())
        }
    }

    #[tokio::test]
    async fn search_returns_closest_by_cosine() {
        let store = InMemoryVectorStore::new(Arc::new(IdentityEmbedder));
        store
            .add_texts("docs", vec!["short".into(), "a much longer piece of text".into()])
            .await
            .unwrap();
        let results = store.similarity_search("docs", "short", 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "short");
    }
}
