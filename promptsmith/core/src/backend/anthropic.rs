//! Anthropic messages API backend
//!
//! `POST /v1/messages` with `x-api-key` auth. Streaming replies arrive as
//! SSE events: text in `content_block_delta` / `text_delta`, end of reply
//! in `message_stop`.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::http::{self, SseEvent};
use super::kind::ProviderKind;
use super::traits::{CompletionRequest, CompletionResponse, LlmBackend, TokenStream, TokenUsage};
use super::AdapterSettings;
use crate::error::UpstreamError;

const API_VERSION: &str = "2023-06-01";

/// Anthropic backend
#[derive(Clone)]
pub struct AnthropicBackend {
    api_key: String,
    settings: AdapterSettings,
    http_client: reqwest::Client,
}

impl AnthropicBackend {
    /// Create a new Anthropic backend
    pub fn new(api_key: impl Into<String>, settings: AdapterSettings) -> Result<Self, UpstreamError> {
        Ok(Self {
            api_key: api_key.into(),
            http_client: http::build_client(settings.timeout)?,
            settings,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.settings.base_url.trim_end_matches('/'))
    }

    fn body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.settings.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "max_tokens": request.max_tokens.unwrap_or(self.settings.max_tokens),
            "temperature": request.temperature.unwrap_or(self.settings.temperature),
            "stream": stream,
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, UpstreamError> {
        let response = self
            .http_client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await?;
        http::check_status(response).await
    }
}

/// Join the text blocks of a messages reply
pub(crate) fn parse_message(value: &Value) -> Result<(String, Option<TokenUsage>), UpstreamError> {
    let blocks = value
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| UpstreamError::InvalidResponse("missing content blocks".into()))?;

    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();

    let usage = value.get("usage").map(|u| TokenUsage {
        prompt_tokens: u
            .get("input_tokens")
            .and_then(Value::as_u64)
            .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX)),
        completion_tokens: u
            .get("output_tokens")
            .and_then(Value::as_u64)
            .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX)),
    });

    Ok((text, usage))
}

fn stream_event(value: &Value) -> SseEvent {
    match value.get("type").and_then(Value::as_str) {
        Some("content_block_delta") => value
            .pointer("/delta/text")
            .and_then(Value::as_str)
            .map_or(SseEvent::Skip, |t| SseEvent::Text(t.to_string())),
        Some("message_stop") => SseEvent::Done,
        Some("error") => SseEvent::Error(
            value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("stream error")
                .to_string(),
        ),
        _ => SseEvent::Skip,
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    fn name(&self) -> &str {
        ProviderKind::Anthropic.as_str()
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn model_id(&self) -> &str {
        &self.settings.model
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, UpstreamError> {
        if !self.is_configured() {
            return Err(UpstreamError::NotConfigured);
        }
        let response = self.post(&self.body(request, false)).await?;
        let value = http::read_json(response).await?;
        let (content, token_usage) = parse_message(&value)?;
        Ok(CompletionResponse {
            content,
            token_usage,
            model_id: self.settings.model.clone(),
            provider: self.name().to_string(),
        })
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream, UpstreamError> {
        if !self.is_configured() {
            return Err(UpstreamError::NotConfigured);
        }
        let response = self.post(&self.body(request, true)).await?;
        Ok(http::spawn_sse_stream(
            self.name(),
            response,
            cancel,
            stream_event,
        ))
    }
}

impl std::fmt::Debug for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicBackend")
            .field("model", &self.settings.model)
            .finish_non_exhaustive()
    }
}
