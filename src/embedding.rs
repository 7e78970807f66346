use crate::llm::LlmError;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Upstream embedding requests carry at most this many texts.
pub const EMBEDDING_BATCH_SIZE: usize = 16;

/// How the API key is presented to the embedding service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AuthStyle {
    /// `api-key: <key>` (Azure OpenAI deployments)
    ApiKey,
    /// `Authorization: Bearer <key>`
    Bearer,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Full URL of the embeddings endpoint.
    pub endpoint: String,
    pub api_key: String,
    pub model: Option<String>,
    pub auth: AuthStyle,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Clone)]
pub struct EmbeddingClient {
    client: Client,
    config: EmbeddingConfig,
}

impl EmbeddingClient {
    pub fn new(client: Client, config: EmbeddingConfig) -> Self {
        Self { client, config }
    }

    /// Embed `texts`, one vector per input in the same order.
    ///
    /// Batches are sent one after another; the first failing batch aborts
    /// the whole call.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for (batch_no, batch) in texts.chunks(EMBEDDING_BATCH_SIZE).enumerate() {
            tracing::debug!(batch = batch_no, size = batch.len(), "requesting embeddings");
            let vectors = self.embed_batch(batch).await?;
            if vectors.len() != batch.len() {
                return Err(LlmError::Parse(format!(
                    "Embedding API returned {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                )));
            }
            embeddings.extend(vectors);
        }
        Ok(embeddings)
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let body = EmbeddingRequest {
            input: batch,
            model: self.config.model.as_deref(),
        };

        let mut req = self
            .client
            .post(&self.config.endpoint)
            .header("Content-Type", "application/json")
            .json(&body);

        if !self.config.api_key.is_empty() {
            req = match self.config.auth {
                AuthStyle::ApiKey => req.header("api-key", &self.config.api_key),
                AuthStyle::Bearer => {
                    req.header("Authorization", format!("Bearer {}", self.config.api_key))
                }
            };
        }

        let resp = req.send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            tracing::warn!(status, "embedding request rejected");
            return Err(LlmError::Api {
                status,
                message: text,
            });
        }

        let data: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        Ok(data.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Cosine similarity between two vectors.
///
/// Zero when the lengths differ, either vector is empty, or either has zero
/// magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Serialize embedding to bytes for SQLite BLOB storage
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize embedding from SQLite BLOB bytes
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_degenerate() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_embedding_roundtrip() {
        let emb = vec![0.1, 0.2, -0.3, 0.4];
        let bytes = embedding_to_bytes(&emb);
        let back = bytes_to_embedding(&bytes);
        assert_eq!(emb, back);
    }

    /// Fake embedding service: each vector is `[batch_no, position_in_batch]`.
    async fn spawn_upstream(
        batches: Arc<Mutex<Vec<usize>>>,
        fail: bool,
    ) -> String {
        let app = Router::new().route(
            "/embeddings",
            post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
                let batches = batches.clone();
                async move {
                    assert_eq!(headers.get("api-key").unwrap(), "secret");
                    if fail {
                        return Err((StatusCode::TOO_MANY_REQUESTS, "slow down"));
                    }
                    let inputs = body["input"].as_array().unwrap().len();
                    let batch_no = {
                        let mut seen = batches.lock().unwrap();
                        seen.push(inputs);
                        seen.len() - 1
                    };
                    let data: Vec<_> = (0..inputs)
                        .map(|i| serde_json::json!({ "embedding": [batch_no as f32, i as f32] }))
                        .collect();
                    Ok(Json(serde_json::json!({ "data": data })))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/embeddings")
    }

    fn client_for(endpoint: String) -> EmbeddingClient {
        EmbeddingClient::new(
            Client::new(),
            EmbeddingConfig {
                endpoint,
                api_key: "secret".into(),
                model: None,
                auth: AuthStyle::ApiKey,
            },
        )
    }

    #[tokio::test]
    async fn test_embed_batches_by_sixteen() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let endpoint = spawn_upstream(batches.clone(), false).await;
        let client = client_for(endpoint);

        let texts: Vec<String> = (0..40).map(|i| format!("text {i}")).collect();
        let vectors = client.embed(&texts).await.unwrap();

        assert_eq!(*batches.lock().unwrap(), vec![16, 16, 8]);
        assert_eq!(vectors.len(), 40);
        assert_eq!(vectors[0], vec![0.0, 0.0]);
        assert_eq!(vectors[17], vec![1.0, 1.0]);
        assert_eq!(vectors[39], vec![2.0, 7.0]);
    }

    #[tokio::test]
    async fn test_embed_surfaces_upstream_error() {
        let endpoint = spawn_upstream(Arc::new(Mutex::new(Vec::new())), true).await;
        let client = client_for(endpoint);

        let err = client.embed(&["hello".to_string()]).await.unwrap_err();
        match err {
            LlmError::Api { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "slow down");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_embed_empty_input_makes_no_request() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let endpoint = spawn_upstream(batches.clone(), false).await;
        let vectors = client_for(endpoint).embed(&[]).await.unwrap();
        assert!(vectors.is_empty());
        assert!(batches.lock().unwrap().is_empty());
    }
}
