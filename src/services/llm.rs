use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::Stream;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tracing::debug;

use crate::config::LlmConfig;
use crate::models::chat::{ChatMessage, ModelId};

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, anyhow::Error>> + Send>>;

/// Generation collaborator. The pipeline only uses the streaming mode; the
/// non-streaming mode exists for deterministic full-response comparison.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, model: ModelId, messages: Vec<ChatMessage>) -> Result<String>;

    async fn generate_stream(
        &self,
        model: ModelId,
        messages: Vec<ChatMessage>,
    ) -> Result<TokenStream>;
}

/// Wire dialect of the model server. Backends are interchangeable behind
/// `LlmProvider`; the variant decides request shape and stream framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    /// Ollama native API: NDJSON over `/api/chat`.
    Ollama,
    /// llama-server / OpenAI style: SSE over `/v1/chat/completions`.
    OpenAiCompatible,
}

impl LlmBackend {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAiCompatible),
            other => anyhow::bail!("Unknown llm backend: {}", other),
        }
    }
}

/// What one framed line of a model stream means.
#[derive(Debug, PartialEq)]
enum StreamLine {
    Token(String),
    Done,
    Skip,
}

#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    backend: LlmBackend,
    base_url: String,
    max_tokens: usize,
    temperature: f32,
}

// ===== OpenAI-compatible wire types =====

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChoiceChunk>,
}

#[derive(Debug, Deserialize)]
struct ChoiceChunk {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

// ===== Ollama wire types =====

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    num_predict: usize,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatChunk {
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let backend = LlmBackend::parse(&config.backend)?;
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build LLM HTTP client")?;

        Ok(Self {
            client,
            backend,
            base_url: config.base_url,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn endpoint(&self) -> String {
        match self.backend {
            LlmBackend::Ollama => format!("{}/api/chat", self.base_url),
            LlmBackend::OpenAiCompatible => format!("{}/v1/chat/completions", self.base_url),
        }
    }

    fn request_body(
        &self,
        model: ModelId,
        messages: Vec<ChatMessage>,
        stream: bool,
    ) -> serde_json::Value {
        match self.backend {
            LlmBackend::Ollama => serde_json::json!(OllamaChatRequest {
                model: model.as_str().to_string(),
                messages,
                stream,
                options: OllamaOptions {
                    num_predict: self.max_tokens,
                    temperature: self.temperature,
                },
            }),
            LlmBackend::OpenAiCompatible => serde_json::json!(ChatCompletionRequest {
                model: model.as_str().to_string(),
                messages,
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                stream,
            }),
        }
    }

    async fn send(
        &self,
        model: ModelId,
        messages: Vec<ChatMessage>,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint())
            .json(&self.request_body(model, messages, stream))
            .send()
            .await
            .context("Failed to call model server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Model server error: {} - {}", status, body);
        }

        Ok(response)
    }

    /// Interpret one framed line of the streaming response body.
    fn parse_stream_line(backend: LlmBackend, line: &str) -> Result<StreamLine> {
        match backend {
            LlmBackend::OpenAiCompatible => {
                let Some(payload) = line.strip_prefix("data: ") else {
                    return Ok(StreamLine::Skip);
                };
                if payload == "[DONE]" {
                    return Ok(StreamLine::Done);
                }
                let chunk: ChatCompletionChunk =
                    serde_json::from_str(payload).context("Malformed SSE chunk")?;
                match chunk
                    .choices
                    .first()
                    .and_then(|c| c.delta.content.clone())
                {
                    Some(token) if !token.is_empty() => Ok(StreamLine::Token(token)),
                    _ => Ok(StreamLine::Skip),
                }
            }
            LlmBackend::Ollama => {
                let chunk: OllamaChatChunk =
                    serde_json::from_str(line).context("Malformed NDJSON chunk")?;
                if chunk.done {
                    return Ok(StreamLine::Done);
                }
                match chunk.message.map(|m| m.content) {
                    Some(token) if !token.is_empty() => Ok(StreamLine::Token(token)),
                    _ => Ok(StreamLine::Skip),
                }
            }
        }
    }
}

#[async_trait]
impl LlmProvider for LlmClient {
    async fn generate(&self, model: ModelId, messages: Vec<ChatMessage>) -> Result<String> {
        debug!("Non-streaming generation with {} messages", messages.len());

        let response = self.send(model, messages, false).await?;

        match self.backend {
            LlmBackend::OpenAiCompatible => {
                let parsed: ChatCompletionResponse = response
                    .json()
                    .await
                    .context("Failed to parse completion response")?;
                parsed
                    .choices
                    .into_iter()
                    .next()
                    .map(|c| c.message.content)
                    .ok_or_else(|| anyhow::anyhow!("Model returned no choices"))
            }
            LlmBackend::Ollama => {
                let parsed: OllamaChatChunk = response
                    .json()
                    .await
                    .context("Failed to parse chat response")?;
                parsed
                    .message
                    .map(|m| m.content)
                    .ok_or_else(|| anyhow::anyhow!("Model returned no message"))
            }
        }
    }

    async fn generate_stream(
        &self,
        model: ModelId,
        messages: Vec<ChatMessage>,
    ) -> Result<TokenStream> {
        debug!("Streaming generation with {} messages", messages.len());

        let response = self.send(model, messages, true).await?;
        let backend = self.backend;
        let mut bytes = response.bytes_stream();

        // Chunks from the wire are not line-aligned; buffer until '\n'.
        let stream = async_stream::try_stream! {
            let mut buf = String::new();

            'outer: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.context("Model stream interrupted")?;
                buf.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.drain(..=pos);

                    if line.is_empty() {
                        continue;
                    }

                    match LlmClient::parse_stream_line(backend, &line)? {
                        StreamLine::Token(token) => yield token,
                        StreamLine::Done => break 'outer,
                        StreamLine::Skip => {}
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
