use async_trait::async_trait;

use crate::error::GatewayError;

#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub text: String,
    pub score: f32,
}

/// Turns text into embedding vectors. An external collaborator: the
/// actual model call is out of scope, only this seam is named here.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>, GatewayError>;
}

/// Retrieval-augmentation backend. Concrete adapters: `gateway-vector::QdrantVectorStore`
/// (production) and `gateway-vector::InMemoryVectorStore` (tests).
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn add_texts(&self, collection: &str, texts: Vec<String>) -> Result<(), GatewayError>;

    async fn similarity_search(
        &self,
        collection: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, GatewayError>;
}
