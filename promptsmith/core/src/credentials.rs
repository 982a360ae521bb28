//! Credential lookup
//!
//! The engine never stores or decrypts keys itself; it asks a
//! [`CredentialStore`] by provider name. An absent or empty key means the
//! provider is not configured.

use std::collections::HashMap;

use crate::backend::ProviderKind;

/// Source of API keys, looked up by provider name
pub trait CredentialStore: Send + Sync {
    /// Key for `provider`, if one is present
    fn get_key(&self, provider: &str) -> Option<String>;

    /// Whether `provider` has a key
    fn has_key(&self, provider: &str) -> bool {
        self.get_key(provider).is_some()
    }
}

/// Reads keys from the provider environment variables
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvCredentialStore;

impl CredentialStore for EnvCredentialStore {
    fn get_key(&self, provider: &str) -> Option<String> {
        let kind: ProviderKind = provider.parse().ok()?;
        std::env::var(kind.credential_env_var())
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// In-memory keys
#[derive(Clone, Debug, Default)]
pub struct StaticCredentialStore {
    keys: HashMap<String, String>,
}

impl StaticCredentialStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key
    #[must_use]
    pub fn with_key(mut self, provider: impl Into<String>, key: impl Into<String>) -> Self {
        self.keys.insert(provider.into().to_ascii_lowercase(), key.into());
        self
    }
}

impl CredentialStore for StaticCredentialStore {
    fn get_key(&self, provider: &str) -> Option<String> {
        self.keys
            .get(&provider.to_ascii_lowercase())
            .filter(|k| !k.trim().is_empty())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_store_treats_blank_as_absent() {
        let store = StaticCredentialStore::new()
            .with_key("OpenAI", "sk-1")
            .with_key("groq", "   ");
        assert_eq!(store.get_key("openai").as_deref(), Some("sk-1"));
        assert!(store.has_key("OPENAI"));
        assert!(!store.has_key("groq"));
        assert!(!store.has_key("anthropic"));
    }

    #[test]
    fn test_env_store_ignores_unknown_providers() {
        assert!(EnvCredentialStore.get_key("not-a-provider").is_none());
    }
}
