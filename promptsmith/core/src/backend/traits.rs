//! Provider Backend Traits
//!
//! One capability contract for every provider. Completion and streaming are
//! the deliverable and fail loudly with [`UpstreamError`]. Scoring and
//! enhancement are advisory: their default implementations are written once
//! here on top of `complete`, and degrade to tagged defaults instead of
//! failing on bad output.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::kind::ProviderKind;
use super::prompts;
use crate::error::UpstreamError;
use crate::quality::{parse_score_reply, Enhancement, ScoreOutcome};

/// Temperature used for scoring calls
pub const SCORING_TEMPERATURE: f32 = 0.3;

/// Temperature used when a request leaves it unset
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

// =============================================================================
// Requests and responses
// =============================================================================

/// A single completion request
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// User prompt
    pub prompt: String,
    /// Optional system instruction
    pub system: Option<String>,
    /// Response token cap (adapter default when unset)
    pub max_tokens: Option<u32>,
    /// Sampling temperature (adapter default when unset)
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    /// Create a request for `prompt`
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Set system instruction
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 1.0));
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Token accounting reported by a provider
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the request
    pub prompt_tokens: u32,
    /// Tokens in the reply
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Sum of both sides
    #[must_use]
    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Reply to a non-streaming request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResponse {
    /// Generated text
    pub content: String,
    /// Token accounting, if the provider reported it
    pub token_usage: Option<TokenUsage>,
    /// Model that produced the reply
    pub model_id: String,
    /// Adapter name
    pub provider: String,
}

// =============================================================================
// Streaming
// =============================================================================

/// Events produced by a streaming call
#[derive(Clone, Debug, PartialEq)]
pub enum StreamingToken {
    /// A text fragment
    Token(String),
    /// End of stream
    Complete {
        /// All fragments concatenated
        message: String,
    },
    /// Stream failed after it started
    Error(String),
}

/// Lazy, finite, non-restartable sequence of fragments from one provider
///
/// Dropping the stream (or calling [`TokenStream::cancel`]) fires its
/// cancellation token, which stops the reader task and releases the
/// upstream connection.
pub struct TokenStream {
    provider: String,
    rx: mpsc::Receiver<StreamingToken>,
    cancel: CancellationToken,
}

impl TokenStream {
    /// Wrap a channel fed by a reader task that watches `cancel`
    pub fn new(
        provider: impl Into<String>,
        rx: mpsc::Receiver<StreamingToken>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            provider: provider.into(),
            rx,
            cancel,
        }
    }

    /// Adapter producing the stream
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Next event, or `None` once the reader task has finished
    pub async fn next_token(&mut self) -> Option<StreamingToken> {
        self.rx.recv().await
    }

    /// Stop the stream early
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the stream has been cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drain the stream into the full message
    pub async fn collect_text(mut self) -> Result<String, UpstreamError> {
        let mut text = String::new();
        while let Some(token) = self.next_token().await {
            match token {
                StreamingToken::Token(t) => text.push_str(&t),
                StreamingToken::Complete { message } => return Ok(message),
                StreamingToken::Error(e) => return Err(UpstreamError::InvalidResponse(e)),
            }
        }
        Ok(text)
    }
}

impl Stream for TokenStream {
    type Item = StreamingToken;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for TokenStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for TokenStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStream")
            .field("provider", &self.provider)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

// =============================================================================
// Backend trait
// =============================================================================

/// Provider backend
///
/// Implementations only need the transport half (`complete`, `stream`);
/// scoring and enhancement come from the default methods.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Adapter name (unique within a registry)
    fn name(&self) -> &str;

    /// Provider family
    fn kind(&self) -> ProviderKind;

    /// Model identifier used for requests
    fn model_id(&self) -> &str;

    /// Whether a credential is present
    fn is_configured(&self) -> bool;

    /// Send a request and wait for the full reply
    async fn complete(&self, request: &CompletionRequest)
        -> Result<CompletionResponse, UpstreamError>;

    /// Send a request and stream the reply
    ///
    /// The reader task must stop when `cancel` fires or the receiver drops.
    async fn stream(
        &self,
        request: &CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream, UpstreamError>;

    /// Estimated USD cost of `tokens` tokens
    fn estimate_cost(&self, tokens: u64) -> f64 {
        self.kind().cost_per_1k_tokens(self.model_id()) * tokens as f64 / 1000.0
    }

    /// Grade a prompt
    ///
    /// Transport failures propagate; unparseable replies become
    /// [`ScoreOutcome::Defaulted`].
    async fn score_prompt_quality(
        &self,
        prompt: &str,
        context: Option<&Value>,
    ) -> Result<ScoreOutcome, UpstreamError> {
        let request = CompletionRequest::new(prompts::scoring_prompt(prompt, context))
            .with_system(prompts::SCORING_SYSTEM)
            .with_temperature(SCORING_TEMPERATURE);
        let response = self.complete(&request).await?;
        let outcome = parse_score_reply(&response.content);
        if !outcome.is_scored() {
            tracing::debug!(provider = %self.name(), "Scoring reply was not parseable, using neutral score");
        }
        Ok(outcome)
    }

    /// Rewrite a prompt; returns the base prompt unchanged on any failure
    async fn enhance_prompt(&self, base_prompt: &str, context: Option<&Value>) -> Enhancement {
        let request = CompletionRequest::new(prompts::enhancement_prompt(base_prompt, context))
            .with_system(prompts::ENHANCEMENT_SYSTEM)
            .with_temperature(DEFAULT_TEMPERATURE);
        match self.complete(&request).await {
            Ok(response) if !response.content.trim().is_empty() => {
                Enhancement::Enhanced(response.content.trim().to_string())
            }
            Ok(_) => Enhancement::Unchanged {
                text: base_prompt.to_string(),
                error: UpstreamError::InvalidResponse("empty enhancement".to_string()),
            },
            Err(error) => {
                tracing::warn!(provider = %self.name(), error = %error, "Enhancement failed, keeping base prompt");
                Enhancement::Unchanged {
                    text: base_prompt.to_string(),
                    error,
                }
            }
        }
    }
}
