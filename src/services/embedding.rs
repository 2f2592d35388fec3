use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::config::EmbeddingConfig;

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    content: String,
    // Some servers expect `input` instead; send both.
    input: String,
}

/// HTTP client for the embedding collaborator.
#[derive(Clone)]
pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    dimension: usize,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build embedding HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url,
            dimension: config.dimension,
        })
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for {} chars", text.len());

        let request = EmbeddingRequest {
            content: text.to_string(),
            input: text.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/embedding", self.base_url))
            .json(&request)
            .send()
            .await
            .context("Failed to connect to embedding server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API error ({}): {}", status, body);
        }

        let json: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        let embedding = Self::extract_embedding(&json)
            .context("Embedding response carried no embedding vector")?;

        if embedding.len() != self.dimension {
            anyhow::bail!(
                "Embedding dimension mismatch: got {}, expected {}",
                embedding.len(),
                self.dimension
            );
        }

        Ok(embedding)
    }

    /// Accepts `{"embedding": [...]}`, the llama-server array form
    /// `[{"embedding": [...]}]`, and OpenAI's `{"data": [{"embedding": ...}]}`.
    fn extract_embedding(json: &serde_json::Value) -> Option<Vec<f32>> {
        let node = if let Some(arr) = json.as_array() {
            arr.first()?.get("embedding")?
        } else if let Some(direct) = json.get("embedding") {
            direct
        } else {
            json.get("data")?.as_array()?.first()?.get("embedding")?
        };

        node.as_array()?
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_plain_embedding_object() {
        let json = json!({"embedding": [0.1, 0.2]});
        assert_eq!(
            EmbeddingClient::extract_embedding(&json),
            Some(vec![0.1, 0.2])
        );
    }

    #[test]
    fn extracts_openai_shape() {
        let json = json!({"data": [{"embedding": [1.0, -1.0]}]});
        assert_eq!(
            EmbeddingClient::extract_embedding(&json),
            Some(vec![1.0, -1.0])
        );
    }

    #[test]
    fn extracts_array_shape() {
        let json = json!([{"embedding": [0.5]}]);
        assert_eq!(EmbeddingClient::extract_embedding(&json), Some(vec![0.5]));
    }

    #[test]
    fn missing_embedding_yields_none() {
        let json = json!({"result": "ok"});
        assert_eq!(EmbeddingClient::extract_embedding(&json), None);
    }
}
