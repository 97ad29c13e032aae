// src/llm/openai.rs

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::LlmConfig;
use crate::llm::{ChatMessage, CompletionProvider, LlmError};

/// Why a provider could not be built from configuration.
#[derive(Debug, thiserror::Error)]
pub enum ProviderSetupError {
    #[error("invalid LLM base URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Completion provider for any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, ProviderSetupError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: completions_endpoint(&config.base_url)?,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let payload = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            stream: true,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        // Split on raw newlines so multi-byte characters spanning chunks stay intact.
        let mut pending: Vec<u8> = Vec::new();
        let mut text = String::new();
        let mut bytes = response.bytes_stream();

        while let Some(chunk) = bytes.next().await {
            pending.extend_from_slice(&chunk?);
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                if apply_sse_line(&String::from_utf8_lossy(&line), &mut text) {
                    return Ok(text);
                }
            }
        }
        apply_sse_line(&String::from_utf8_lossy(&pending), &mut text);

        Ok(text)
    }
}

fn completions_endpoint(base_url: &str) -> Result<Url, url::ParseError> {
    let mut base = Url::parse(base_url)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("chat/completions")
}

/// Folds one line of the provider's event stream into `text`.
/// Returns `true` once the end-of-stream sentinel is seen.
fn apply_sse_line(line: &str, text: &mut String) -> bool {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return false;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return true;
    }

    match serde_json::from_str::<ChatChunk>(data) {
        Ok(chunk) => {
            for choice in chunk.choices {
                if let Some(content) = choice.delta.content {
                    text.push_str(&content);
                }
            }
        }
        Err(e) => tracing::debug!("Skipping unparseable completion chunk: {}", e),
    }
    false
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}
