/// Messages API client used as the production semantic extractor.
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use super::{Completion, ExtractorError, SemanticExtractor};
use crate::config::LlmConfig;

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicExtractor {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

// ── Response shapes ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct MessageResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct TokenUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart { message: StreamMessage },
    ContentBlockDelta { delta: Delta },
    MessageDelta { #[serde(default)] usage: TokenUsage },
    Error { error: StreamError },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct StreamMessage {
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}

// ── Client ───────────────────────────────────────────────────────────

impl AnthropicExtractor {
    /// Build a client from configuration, reading the API key from the
    /// configured environment variable.
    pub fn from_config(config: &LlmConfig) -> Result<Self, ExtractorError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            ExtractorError::Unauthorized(format!("{} is not set", config.api_key_env))
        })?;
        Self::new(config, api_key)
    }

    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self, ExtractorError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExtractorError::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/messages", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout,
        })
    }

    fn body(&self, system_prompt: &str, user_prompt: &str, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system_prompt,
            "messages": [{"role": "user", "content": user_prompt}],
            "stream": stream,
        })
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response, ExtractorError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ExtractorError::Unauthorized(body),
            _ => ExtractorError::Api {
                status: status.as_u16(),
                body,
            },
        })
    }

    fn map_transport(&self, e: reqwest::Error) -> ExtractorError {
        if e.is_timeout() {
            ExtractorError::Timeout(self.timeout)
        } else if e.is_connect() {
            ExtractorError::Unreachable(e.to_string())
        } else {
            ExtractorError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl SemanticExtractor for AnthropicExtractor {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Completion, ExtractorError> {
        let response = self
            .send(&self.body(system_prompt, user_prompt, false))
            .await?;
        let message: MessageResponse = response
            .json()
            .await
            .map_err(|e| ExtractorError::InvalidResponse(e.to_string()))?;

        Ok(Completion {
            text: message
                .content
                .iter()
                .filter(|b| b.kind == "text")
                .map(|b| b.text.as_str())
                .collect(),
            tokens_used: message.usage.input_tokens + message.usage.output_tokens,
        })
    }

    async fn stream(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        tokens: UnboundedSender<String>,
    ) -> Result<Completion, ExtractorError> {
        let response = self
            .send(&self.body(system_prompt, user_prompt, true))
            .await?;

        let mut parser = SseParser::default();
        let mut bytes = response.bytes_stream();
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| self.map_transport(e))?;
            for delta in parser.feed(&chunk)? {
                let _ = tokens.send(delta);
            }
        }
        for delta in parser.feed(b"\n")? {
            let _ = tokens.send(delta);
        }

        Ok(parser.finish())
    }
}

// ── Server-sent event parsing ────────────────────────────────────────

/// Incremental parser for the streaming Messages API.
#[derive(Default)]
struct SseParser {
    pending: Vec<u8>,
    text: String,
    input_tokens: u64,
    output_tokens: u64,
}

impl SseParser {
    /// Consume raw bytes; returns text deltas completed by this chunk.
    fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, ExtractorError> {
        self.pending.extend_from_slice(chunk);
        let mut deltas = Vec::new();

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let Some(data) = line.trim_end().strip_prefix("data:") else {
                continue;
            };
            let event: StreamEvent = match serde_json::from_str(data.trim()) {
                Ok(event) => event,
                Err(e) => {
                    debug!("Skipping unparsable stream event: {e}");
                    continue;
                }
            };
            match event {
                StreamEvent::MessageStart { message } => {
                    self.input_tokens = message.usage.input_tokens;
                    self.output_tokens = message.usage.output_tokens;
                }
                StreamEvent::ContentBlockDelta { delta } if !delta.text.is_empty() => {
                    self.text.push_str(&delta.text);
                    deltas.push(delta.text);
                }
                // Output usage in message_delta is cumulative.
                StreamEvent::MessageDelta { usage } => {
                    self.output_tokens = self.output_tokens.max(usage.output_tokens);
                }
                StreamEvent::Error { error } => {
                    return Err(ExtractorError::InvalidResponse(error.message));
                }
                _ => {}
            }
        }

        Ok(deltas)
    }

    fn finish(self) -> Completion {
        Completion {
            text: self.text,
            tokens_used: self.input_tokens + self.output_tokens,
        }
    }
}
