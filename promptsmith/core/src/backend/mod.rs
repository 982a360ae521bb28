//! Provider Backend Integration
//!
//! Uniform access to the supported text-generation providers through the
//! [`LlmBackend`] trait.
//!
//! # Available Backends
//!
//! - **OpenAI** and **Groq**: [`OpenAiCompatibleBackend`]
//! - **Anthropic**: [`AnthropicBackend`]
//! - **Google**: [`GoogleBackend`]
//!
//! # Usage
//!
//! ```ignore
//! use promptsmith_core::backend::{create_backend, AdapterSettings, CompletionRequest, ProviderKind};
//!
//! let settings = AdapterSettings::defaults_for(ProviderKind::Anthropic);
//! let backend = create_backend(ProviderKind::Anthropic, api_key, settings)?;
//! let reply = backend.complete(&CompletionRequest::new("Hello!")).await?;
//! ```

mod anthropic;
mod google;
mod http;
mod kind;
mod openai;
pub mod prompts;
mod traits;

use std::sync::Arc;
use std::time::Duration;

pub use anthropic::AnthropicBackend;
pub use google::GoogleBackend;
pub use kind::{ProviderKind, UnknownProvider};
pub use openai::OpenAiCompatibleBackend;
pub use traits::{
    CompletionRequest, CompletionResponse, LlmBackend, StreamingToken, TokenStream, TokenUsage,
    DEFAULT_TEMPERATURE, SCORING_TEMPERATURE,
};

use crate::error::UpstreamError;

/// Longest silence tolerated on an open connection when none is configured
///
/// This bounds each read, not the whole response, so a long stream that
/// keeps producing fragments is never cut off.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Bound on establishing the TCP/TLS connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-provider connection settings
#[derive(Clone, Debug, PartialEq)]
pub struct AdapterSettings {
    /// Model identifier
    pub model: String,
    /// API root (no trailing path)
    pub base_url: String,
    /// Default response token cap
    pub max_tokens: u32,
    /// Default sampling temperature
    pub temperature: f32,
    /// Idle read timeout between response chunks
    pub timeout: Duration,
}

impl AdapterSettings {
    /// Built-in defaults for `kind`
    #[must_use]
    pub fn defaults_for(kind: ProviderKind) -> Self {
        Self {
            model: kind.default_model().to_string(),
            base_url: kind.default_base_url().to_string(),
            max_tokens: kind.default_max_tokens(),
            temperature: DEFAULT_TEMPERATURE,
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

/// Construct the adapter for `kind`
pub fn create_backend(
    kind: ProviderKind,
    api_key: impl Into<String>,
    settings: AdapterSettings,
) -> Result<Arc<dyn LlmBackend>, UpstreamError> {
    let backend: Arc<dyn LlmBackend> = match kind {
        ProviderKind::OpenAi | ProviderKind::Groq => {
            Arc::new(OpenAiCompatibleBackend::new(kind, api_key, settings)?)
        }
        ProviderKind::Anthropic => Arc::new(AnthropicBackend::new(api_key, settings)?),
        ProviderKind::Google => Arc::new(GoogleBackend::new(api_key, settings)?),
    };
    Ok(backend)
}
