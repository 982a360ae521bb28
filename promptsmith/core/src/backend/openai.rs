//! OpenAI-compatible chat completions backend
//!
//! Serves both OpenAI and Groq; Groq exposes the same
//! `/v1/chat/completions` API under a different root.
//!
//! Streaming uses server-sent events carrying `choices[0].delta.content`,
//! terminated by `data: [DONE]`.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::http::{self, SseEvent};
use super::kind::ProviderKind;
use super::traits::{
    CompletionRequest, CompletionResponse, LlmBackend, TokenStream, TokenUsage, DEFAULT_TEMPERATURE,
};
use super::AdapterSettings;
use crate::error::UpstreamError;

/// Backend for any OpenAI-compatible chat completions endpoint
#[derive(Clone)]
pub struct OpenAiCompatibleBackend {
    kind: ProviderKind,
    api_key: String,
    settings: AdapterSettings,
    http_client: reqwest::Client,
}

impl OpenAiCompatibleBackend {
    /// Create a backend for `kind` (OpenAI or Groq)
    pub fn new(
        kind: ProviderKind,
        api_key: impl Into<String>,
        settings: AdapterSettings,
    ) -> Result<Self, UpstreamError> {
        Ok(Self {
            kind,
            api_key: api_key.into(),
            http_client: http::build_client(settings.timeout)?,
            settings,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    fn body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        json!({
            "model": self.settings.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(self.settings.max_tokens),
            "temperature": request.temperature.unwrap_or(self.settings.temperature),
            "stream": stream,
        })
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, UpstreamError> {
        let response = self
            .http_client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        http::check_status(response).await
    }
}

/// Pull the text out of a non-streaming reply
pub(crate) fn parse_completion(value: &Value) -> Result<(String, Option<TokenUsage>), UpstreamError> {
    let content = value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| UpstreamError::InvalidResponse("missing choices[0].message.content".into()))?;

    let usage = value.get("usage").map(|u| TokenUsage {
        prompt_tokens: read_u32(u, "prompt_tokens"),
        completion_tokens: read_u32(u, "completion_tokens"),
    });

    Ok((content.to_string(), usage))
}

fn read_u32(value: &Value, key: &str) -> u32 {
    value
        .get(key)
        .and_then(Value::as_u64)
        .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX))
}

fn stream_event(value: &Value) -> SseEvent {
    if let Some(message) = value.pointer("/error/message").and_then(Value::as_str) {
        return SseEvent::Error(message.to_string());
    }
    match value.pointer("/choices/0/delta/content").and_then(Value::as_str) {
        Some(text) if !text.is_empty() => SseEvent::Text(text.to_string()),
        _ => SseEvent::Skip,
    }
}

#[async_trait]
impl LlmBackend for OpenAiCompatibleBackend {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn kind(&self) -> ProviderKind {
        self.kind
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
        let (content, token_usage) = parse_completion(&value)?;
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

impl std::fmt::Debug for OpenAiCompatibleBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleBackend")
            .field("kind", &self.kind)
            .field("model", &self.settings.model)
            .field("base_url", &self.settings.base_url)
            .finish_non_exhaustive()
    }
}
