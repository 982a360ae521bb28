//! Google Generative Language backend
//!
//! `models/{model}:generateContent` for full replies and
//! `models/{model}:streamGenerateContent?alt=sse` for streams. The API has
//! no end-of-stream marker; the stream completes when the body ends.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::http::{self, SseEvent};
use super::kind::ProviderKind;
use super::traits::{CompletionRequest, CompletionResponse, LlmBackend, TokenStream, TokenUsage};
use super::AdapterSettings;
use crate::error::UpstreamError;

/// Google backend
#[derive(Clone)]
pub struct GoogleBackend {
    api_key: String,
    settings: AdapterSettings,
    http_client: reqwest::Client,
}

impl GoogleBackend {
    /// Create a new Google backend
    pub fn new(api_key: impl Into<String>, settings: AdapterSettings) -> Result<Self, UpstreamError> {
        Ok(Self {
            api_key: api_key.into(),
            http_client: http::build_client(settings.timeout)?,
            settings,
        })
    }

    fn endpoint(&self, stream: bool) -> String {
        let method = if stream {
            "streamGenerateContent?alt=sse"
        } else {
            "generateContent"
        };
        format!(
            "{}/v1beta/models/{}:{}",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.model,
            method
        )
    }

    fn body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "contents": [{"role": "user", "parts": [{"text": request.prompt}]}],
            "generationConfig": {
                "maxOutputTokens": request.max_tokens.unwrap_or(self.settings.max_tokens),
                "temperature": request.temperature.unwrap_or(self.settings.temperature),
            },
        });
        if let Some(system) = &request.system {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        body
    }

    async fn post(&self, stream: bool, body: &Value) -> Result<reqwest::Response, UpstreamError> {
        let response = self
            .http_client
            .post(self.endpoint(stream))
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;
        http::check_status(response).await
    }
}

fn candidate_text(value: &Value) -> Option<String> {
    let parts = value.pointer("/candidates/0/content/parts")?.as_array()?;
    Some(
        parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect(),
    )
}

/// Extract the first candidate's text and usage
pub(crate) fn parse_generation(value: &Value) -> Result<(String, Option<TokenUsage>), UpstreamError> {
    let text = candidate_text(value)
        .ok_or_else(|| UpstreamError::InvalidResponse("missing candidates[0].content".into()))?;
    let usage = value.get("usageMetadata").map(|u| TokenUsage {
        prompt_tokens: u
            .get("promptTokenCount")
            .and_then(Value::as_u64)
            .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX)),
        completion_tokens: u
            .get("candidatesTokenCount")
            .and_then(Value::as_u64)
            .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX)),
    });
    Ok((text, usage))
}

fn stream_event(value: &Value) -> SseEvent {
    if let Some(message) = value.pointer("/error/message").and_then(Value::as_str) {
        return SseEvent::Error(message.to_string());
    }
    match candidate_text(value) {
        Some(text) if !text.is_empty() => SseEvent::Text(text),
        _ => SseEvent::Skip,
    }
}

#[async_trait]
impl LlmBackend for GoogleBackend {
    fn name(&self) -> &str {
        ProviderKind::Google.as_str()
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
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
        let response = self.post(false, &self.body(request)).await?;
        let value = http::read_json(response).await?;
        let (content, token_usage) = parse_generation(&value)?;
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
        let response = self.post(true, &self.body(request)).await?;
        Ok(http::spawn_sse_stream(
            self.name(),
            response,
            cancel,
            stream_event,
        ))
    }
}

impl std::fmt::Debug for GoogleBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleBackend")
            .field("model", &self.settings.model)
            .finish_non_exhaustive()
    }
}
