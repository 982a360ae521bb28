//! Provider Registry
//!
//! Holds the configured adapters and their failover order. The first
//! configured provider is the primary; the rest form the fallback chain in
//! discovery order. A registry is immutable once built; credential changes
//! produce a new one (see `Orchestrator::reload`).

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{create_backend, AdapterSettings, LlmBackend, ProviderKind};
use crate::credentials::CredentialStore;
use crate::error::ConductorError;
use crate::task::Task;

/// Quality above which the high-quality preference applies
pub const DEFAULT_HIGH_QUALITY_THRESHOLD: u8 = 85;

// ============================================================================
// Fallback chain
// ============================================================================

/// Primary adapter name plus ordered fallbacks, never containing the primary
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FallbackChain {
    /// Primary adapter
    pub primary: Option<String>,
    /// Fallbacks in order
    pub fallbacks: Vec<String>,
}

impl FallbackChain {
    /// Names in attempt order
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.primary.iter().chain(self.fallbacks.iter())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Configured adapters keyed by name
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn LlmBackend>>,
    chain: FallbackChain,
    high_quality_threshold: u8,
}

impl ProviderRegistry {
    /// Registry with no adapters
    #[must_use]
    pub fn empty() -> Self {
        Self {
            high_quality_threshold: DEFAULT_HIGH_QUALITY_THRESHOLD,
            ..Self::default()
        }
    }

    /// Build adapters for every provider with a credential in `store`
    ///
    /// Providers are probed in [`ProviderKind::DISCOVERY_ORDER`]; missing
    /// entries in `settings` use the built-in defaults.
    pub fn from_credentials(
        store: &dyn CredentialStore,
        settings: &HashMap<ProviderKind, AdapterSettings>,
    ) -> Self {
        let mut adapters = Vec::new();
        for kind in ProviderKind::DISCOVERY_ORDER {
            let Some(key) = store.get_key(kind.as_str()) else {
                debug!(provider = %kind, "No credential, skipping provider");
                continue;
            };
            let adapter_settings = settings
                .get(&kind)
                .cloned()
                .unwrap_or_else(|| AdapterSettings::defaults_for(kind));
            match create_backend(kind, key, adapter_settings) {
                Ok(adapter) => adapters.push(adapter),
                Err(e) => warn!(provider = %kind, error = %e, "Failed to construct adapter"),
            }
        }
        Self::from_adapters(adapters)
    }

    /// Build from explicit adapters; the first configured one is primary
    ///
    /// Unconfigured adapters and duplicate names are skipped.
    pub fn from_adapters(adapters: impl IntoIterator<Item = Arc<dyn LlmBackend>>) -> Self {
        let mut registry = Self::empty();
        for adapter in adapters {
            let name = adapter.name().to_string();
            if !adapter.is_configured() {
                debug!(provider = %name, "Adapter not configured, skipping");
                continue;
            }
            if registry.adapters.contains_key(&name) {
                warn!(provider = %name, "Duplicate adapter name, keeping the first");
                continue;
            }
            if registry.chain.primary.is_none() {
                registry.chain.primary = Some(name.clone());
            } else {
                registry.chain.fallbacks.push(name.clone());
            }
            registry.adapters.insert(name, adapter);
        }
        info!(
            primary = ?registry.chain.primary,
            fallbacks = ?registry.chain.fallbacks,
            "Provider registry built"
        );
        registry
    }

    /// Override the high-quality threshold used by [`Self::select_for`]
    #[must_use]
    pub fn with_high_quality_threshold(mut self, threshold: u8) -> Self {
        self.high_quality_threshold = threshold.min(100);
        self
    }

    /// Whether no adapter is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Number of adapters
    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Adapter names in attempt order
    #[must_use]
    pub fn available_providers(&self) -> Vec<String> {
        self.chain.iter().cloned().collect()
    }

    /// Adapter by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn LlmBackend>> {
        self.adapters.get(name).cloned()
    }

    /// Primary adapter
    #[must_use]
    pub fn primary(&self) -> Option<Arc<dyn LlmBackend>> {
        self.chain.primary.as_deref().and_then(|n| self.get(n))
    }

    /// Fallback adapters in order
    #[must_use]
    pub fn fallbacks(&self) -> Vec<Arc<dyn LlmBackend>> {
        self.chain.fallbacks.iter().filter_map(|n| self.get(n)).collect()
    }

    /// Names of primary and fallbacks
    #[must_use]
    pub fn fallback_chain(&self) -> &FallbackChain {
        &self.chain
    }

    /// Every adapter in attempt order
    #[must_use]
    pub fn chain(&self) -> Vec<Arc<dyn LlmBackend>> {
        self.chain.iter().filter_map(|n| self.get(n)).collect()
    }

    /// Attempt order with `first` moved to the front when it is registered
    #[must_use]
    pub fn chain_starting_with(&self, first: Option<&str>) -> Vec<Arc<dyn LlmBackend>> {
        let mut chain = self.chain();
        if let Some(name) = first {
            match chain.iter().position(|a| a.name() == name) {
                Some(pos) => {
                    let preferred = chain.remove(pos);
                    chain.insert(0, preferred);
                }
                None => warn!(provider = %name, "Requested provider not configured, using default order"),
            }
        }
        chain
    }

    /// Adapter for `task`
    ///
    /// Tasks above the high-quality threshold prefer Anthropic, then
    /// OpenAI; everything else goes to the primary.
    pub fn select_for(&self, task: &Task) -> Result<Arc<dyn LlmBackend>, ConductorError> {
        let primary = self.primary().ok_or(ConductorError::NoProviderConfigured)?;

        if task.quality_required() > self.high_quality_threshold {
            let preferred = ProviderKind::HIGH_QUALITY_PREFERENCE.iter().find_map(|kind| {
                self.chain()
                    .into_iter()
                    .find(|adapter| adapter.kind() == *kind)
            });
            if let Some(adapter) = preferred {
                debug!(provider = %adapter.name(), "Selected high-quality provider");
                return Ok(adapter);
            }
        }

        Ok(primary)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("chain", &self.chain)
            .field("high_quality_threshold", &self.high_quality_threshold)
            .finish()
    }
}
