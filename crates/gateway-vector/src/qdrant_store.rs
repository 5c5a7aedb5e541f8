use std::sync::Arc;

use async_trait::async_trait;
use gateway_core::error::GatewayError;
use gateway_core::vector::{Embedder, RetrievedChunk, VectorStore};
use qdrant_client::qdrant::{
    CreateCollectionBuilder, Distance, PointStruct, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use uuid::Uuid;

/// Retrieval-augmentation backend over Qdrant. Each collection is created
/// lazily on first `add_texts` with cosine distance, sized to whatever the
/// configured `Embedder` produces.
pub struct QdrantVectorStore {
    client: Qdrant,
    embedder: Arc<dyn Embedder>,
}

impl QdrantVectorStore {
    pub fn new(url: &str, embedder: Arc<dyn Embedder>) -> Result<Self, GatewayError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| GatewayError::StoreError(e.to_string()))?;
        Ok(Self { client, embedder })
    }

    async fn ensure_collection(&self, collection: &str, dim: usize) -> Result<(), GatewayError> {
        let exists = self
            .client
            .collection_exists(collection)
            .await
            .map_err(|e| GatewayError::StoreError(e.to_string()))?;
        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(collection)
                        .vectors_config(VectorParamsBuilder::new(dim as u64, Distance::Cosine)),
                )
                .await
                .map_err(|e| GatewayError::StoreError(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn add_texts(&self, collection: &str, texts: Vec<String>) -> Result<(), GatewayError> {
        if texts.is_empty() {
            return Ok(());
        }
        let vectors = self.embedder.embed(texts.clone()).await?;
        let dim = vectors.first().map(|v| v.len()).unwrap_or(0);
        self.ensure_collection(collection, dim).await?;

        let points: Vec<PointStruct> = texts
            .into_iter()
            .zip(vectors)
            .map(|(text, vector)| {
                PointStruct::new(
                    Uuid::new_v4().to_string(),
                    vector,
                    [("text".to_string(), text.into())].into_iter().collect::<std::collections::HashMap<_, _>>(),
                )
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points))
            .await
            .map_err(|e| GatewayError::StoreError(e.to_string()))?;
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

        let results = self
            .client
            .search_points(
                SearchPointsBuilder::new(collection, query_vector, k as u64).with_payload(true),
            )
            .await
            .map_err(|e| GatewayError::StoreError(e.to_string()))?;

        Ok(results
            .result
            .into_iter()
            .map(|point| {
                let text = point
                    .payload
                    .get("text")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                RetrievedChunk {
                    text,
                    score: point.score,
                }
            })
            .collect())
    }
}
