use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::LlmError;
use crate::TextEmbedder;

/// Sentinel embedded once to discover the model's native dimension.
const DIMENSION_PROBE: &str = "test";

/// Embedding client for OpenAI-compatible `/embeddings` endpoints.
///
/// Vectors are L2-normalized on the way out so cosine-metric stores can
/// consume them directly even when the provider skips normalization.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    cached_size: OnceCell<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

impl HttpEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            cached_size: OnceCell::new(),
        }
    }

    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let url = format!("{}/embeddings", self.endpoint.trim_end_matches('/'));
        let mut request = self.client.post(&url).json(&json!({
            "model": self.model,
            "input": texts,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Protocol {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response.json().await?;
        if parsed.data.len() != texts.len() {
            return Err(LlmError::Malformed(format!(
                "asked for {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        // The API may answer out of order; `index` is authoritative.
        let mut rows = parsed.data;
        rows.sort_by_key(|row| row.index);
        Ok(rows
            .into_iter()
            .map(|row| l2_normalize(row.embedding))
            .collect())
    }
}

#[async_trait]
impl TextEmbedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        if text.trim().is_empty() {
            return Err(LlmError::Validation("cannot embed empty text".to_string()));
        }
        let mut vectors = self.request_embeddings(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| LlmError::Malformed("embedding response was empty".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Err(LlmError::Validation("cannot embed an empty batch".to_string()));
        }
        if texts.iter().any(|text| text.trim().is_empty()) {
            return Err(LlmError::Validation("cannot embed empty text".to_string()));
        }
        self.request_embeddings(texts).await
    }

    async fn vector_size(&self) -> Result<usize, LlmError> {
        let size = self
            .cached_size
            .get_or_try_init(|| async {
                let probe = self.embed(DIMENSION_PROBE).await?;
                debug!(model = %self.model, dimension = probe.len(), "detected embedding dimension");
                Ok::<usize, LlmError>(probe.len())
            })
            .await?;
        Ok(*size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_normalize_produces_unit_vectors() {
        let normalized = l2_normalize(vec![3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
        let norm: f32 = normalized.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_leaves_zero_vector_alone() {
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn embedding_rows_sort_by_index() {
        let raw = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]},
            ]
        });
        let mut parsed: EmbeddingResponse = serde_json::from_value(raw).unwrap();
        parsed.data.sort_by_key(|row| row.index);
        assert_eq!(parsed.data[0].embedding, vec![1.0, 0.0]);
    }
}
