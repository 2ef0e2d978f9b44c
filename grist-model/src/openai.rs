//! OpenAI-compatible HTTP backends.
//!
//! Works against any endpoint speaking the `/v1/embeddings` and
//! `/v1/chat/completions` dialect. Generation streams over SSE; tokens are
//! forwarded as they arrive and the stream tears down promptly on
//! cancellation.

use std::time::Duration;

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{Embedder, Generator, ModelError};

const MAX_ERROR_BODY: usize = 4 * 1024;

fn http_client() -> reqwest::Client {
    // No total request timeout: generation bodies stream for as long as the
    // model talks. Connection setup is still bounded.
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

async fn upstream_error(response: reqwest::Response) -> ModelError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message: String = body.chars().take(MAX_ERROR_BODY).collect();
    ModelError::Upstream { status, message }
}

// ── Embeddings ────────────────────────────────────────────────────────────

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Deserialize)]
struct EmbeddingEntry {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    /// `base_url` up to and including the API version, e.g.
    /// `https://api.openai.com/v1`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Codec(e.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(ModelError::Codec(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        Ok(parsed.data.into_iter().map(|e| e.embedding).collect())
    }
}

// ── Generation ────────────────────────────────────────────────────────────

pub struct OpenAiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

/// SSE streaming chunk from the chat completions API.
#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

impl Generator for OpenAiGenerator {
    async fn generate(
        &self,
        prompt: &str,
        tokens: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<String, ModelError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": true,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let mut stream = response.bytes_stream().eventsource();
        let mut answer = String::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ModelError::Cancelled),
                event = stream.next() => match event {
                    Some(Ok(event)) => {
                        if event.data.trim() == "[DONE]" {
                            break;
                        }
                        let Ok(chunk) = serde_json::from_str::<StreamChunk>(&event.data) else {
                            // Keepalives and metadata events carry no delta.
                            continue;
                        };
                        let Some(content) = chunk
                            .choices
                            .first()
                            .and_then(|c| c.delta.content.as_deref())
                            .filter(|c| !c.is_empty())
                        else {
                            continue;
                        };
                        answer.push_str(content);
                        if tokens.send(content.to_string()).await.is_err() {
                            // Receiver gone: the request was torn down.
                            return Err(ModelError::Cancelled);
                        }
                    }
                    Some(Err(err)) => {
                        return Err(ModelError::Request(format!("SSE stream error: {err}")));
                    }
                    None => {
                        if answer.is_empty() {
                            return Err(ModelError::Request(
                                "stream ended without [DONE] marker".into(),
                            ));
                        }
                        tracing::warn!(bytes = answer.len(), "stream ended without [DONE] marker");
                        break;
                    }
                },
            }
        }

        if answer.is_empty() {
            return Err(ModelError::Request("empty streaming response".into()));
        }
        Ok(answer)
    }
}
