//! Known provider set
//!
//! The engine talks to a closed set of providers. Everything that varies
//! per provider without needing a network call lives here: names, env vars,
//! default models, and the flat per-1K token rate adapters use for
//! `estimate_cost`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A supported provider
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI chat completions
    OpenAi,
    /// Anthropic messages API
    Anthropic,
    /// Google Generative Language API
    Google,
    /// Groq (OpenAI-compatible)
    Groq,
}

impl ProviderKind {
    /// Order in which credentials are probed; the first present one is primary
    pub const DISCOVERY_ORDER: [ProviderKind; 4] =
        [Self::OpenAi, Self::Anthropic, Self::Google, Self::Groq];

    /// Preference order for high-quality work
    pub const HIGH_QUALITY_PREFERENCE: [ProviderKind; 2] = [Self::Anthropic, Self::OpenAi];

    /// Canonical lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Groq => "groq",
        }
    }

    /// Environment variable holding the API key
    #[must_use]
    pub fn credential_env_var(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Google => "GOOGLE_AI_API_KEY",
            Self::Groq => "GROQ_API_KEY",
        }
    }

    /// Environment variable overriding the model
    #[must_use]
    pub fn model_env_var(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_MODEL",
            Self::Anthropic => "ANTHROPIC_MODEL",
            Self::Google => "GOOGLE_MODEL",
            Self::Groq => "GROQ_MODEL",
        }
    }

    /// Model used when none is configured
    #[must_use]
    pub fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4-turbo-preview",
            Self::Anthropic => "claude-3-opus-20240229",
            Self::Google => "gemini-pro",
            Self::Groq => "mixtral-8x7b-32768",
        }
    }

    /// Response token cap used when none is configured
    #[must_use]
    pub fn default_max_tokens(self) -> u32 {
        match self {
            Self::Groq => 1000,
            _ => 4000,
        }
    }

    /// API root
    #[must_use]
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Google => "https://generativelanguage.googleapis.com",
            Self::Groq => "https://api.groq.com/openai",
        }
    }

    /// Flat USD rate per 1K tokens for `model`
    ///
    /// Google bills per character; four characters per token gives
    /// `4 * (0.00025 + 0.0005)` per 1K tokens.
    #[must_use]
    pub fn cost_per_1k_tokens(self, model: &str) -> f64 {
        match self {
            Self::OpenAi if model.contains("gpt-4") => 0.03,
            Self::OpenAi => 0.002,
            Self::Anthropic => 0.015,
            Self::Google => 4.0 * (0.000_25 + 0.000_5),
            Self::Groq => 0.01,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown provider name
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "google" | "gemini" => Ok(Self::Google),
            "groq" => Ok(Self::Groq),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}
