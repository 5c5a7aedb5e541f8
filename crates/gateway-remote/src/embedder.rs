use async_trait::async_trait;
use gateway_core::error::GatewayError;
use gateway_core::vector::Embedder;
use serde::Deserialize;

/// Calls a remote embeddings endpoint, shaped like OpenAI's
/// `POST /embeddings` (`{"data": [{"embedding": [...]}]}`). Used by
/// `/embed` and `/query` and by file-upload ingestion.
pub struct RemoteEmbedder {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl RemoteEmbedder {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>, GatewayError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": input,
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::GenerationFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::GenerationFailed(format!(
                "embeddings API returned {}: {}",
                status, message
            )));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::GenerationFailed(e.to_string()))?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}
