//! Orchestrator
//!
//! Composes the [`ProviderRegistry`], [`ResponseCache`], and cost model into
//! the operations the rest of the system calls: routing, ordered failover,
//! multi-provider scoring, and the closed-loop enhancement cycle.
//!
//! # Call lifecycle
//!
//! ```text
//! Idle -> Routing -> Executing -> Succeeded
//!                        |
//!                        +-> Retrying -> Executing ...
//!                        +-> Exhausted
//! ```
//!
//! Nothing about a call outlives it; the only shared state is the cache and
//! the registry. Every adapter call is bounded by
//! [`OrchestratorConfig::call_timeout`], and a timeout is handled like any
//! other adapter failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{
    AdapterSettings, CompletionRequest, CompletionResponse, LlmBackend, ProviderKind, TokenStream,
};
use crate::cache::{cache_key, CacheStats, OperationClass, ResponseCache};
use crate::cost::{self, SelectionPriorities, TracingUsageSink, UsageEvent, UsageSink};
use crate::credentials::CredentialStore;
use crate::error::{ConductorError, ProviderFailure, UpstreamError};
use crate::quality::{Enhancement, QualityScore, ScoreOutcome, NEUTRAL_SCORE};
use crate::registry::{ProviderRegistry, DEFAULT_HIGH_QUALITY_THRESHOLD};
use crate::task::{Task, TaskKind, TaskPayload};

/// Feedback attached to the score returned when nobody could score
pub const NO_PROVIDERS_FEEDBACK: &str =
    "AI providers not configured. Unable to provide detailed scoring.";

/// Quality target used when callers do not pass one
pub const DEFAULT_TARGET_QUALITY: f64 = 85.0;

// ============================================================================
// Configuration
// ============================================================================

/// Orchestrator tuning
#[derive(Clone, Debug, PartialEq)]
pub struct OrchestratorConfig {
    /// Upper bound on any single adapter call
    pub call_timeout: Duration,
    /// Attempts made by the failover helper for execute/stream
    pub max_failover_attempts: usize,
    /// Quality above which the high-quality preference applies
    pub high_quality_threshold: u8,
    /// Target used by callers that do not pass one
    pub default_target_quality: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
            max_failover_attempts: 3,
            high_quality_threshold: DEFAULT_HIGH_QUALITY_THRESHOLD,
            default_target_quality: DEFAULT_TARGET_QUALITY,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Per-call state, traced at debug level
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    /// Not started
    Idle,
    /// Choosing an adapter
    Routing,
    /// Waiting on an adapter
    Executing,
    /// Previous adapter failed, moving down the chain
    Retrying,
    /// An adapter answered
    Succeeded,
    /// Every adapter failed
    Exhausted,
}

/// Outcome of the enhancement loop
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizedPrompt {
    /// Prompt as given
    pub original: String,
    /// Best text found
    pub enhanced: String,
    /// Score of `enhanced`
    pub quality: QualityScore,
    /// Adapter that produced `enhanced`, `none` if nothing beat the baseline
    pub provider: String,
    /// Adapters consulted, in order
    pub providers_used: Vec<String>,
    /// Enhance-and-score rounds run
    pub iterations: u32,
    /// Whether `quality.overall` reached the target
    pub target_met: bool,
}

/// Reply to a plain execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResult {
    /// Generated text
    pub content: String,
    /// Adapter that answered
    pub provider: String,
    /// Model that answered
    pub model_id: String,
}

/// Result of [`Orchestrator::route`]
#[derive(Debug)]
pub enum TaskOutcome {
    /// Completion reply
    Completion(CompletionResponse),
    /// Live stream
    Stream(TokenStream),
    /// Enhanced text
    Enhancement {
        /// Adapter used
        provider: String,
        /// New text
        text: String,
    },
    /// Score
    Scoring {
        /// Adapter used
        provider: String,
        /// Real or defaulted score
        outcome: ScoreOutcome,
    },
}

/// Whether the engine can do AI work
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// At least one provider configured
    Operational,
    /// No provider configured
    NoProviders,
}

/// Provider section of [`SystemStatus`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    /// Number of configured adapters
    pub total: usize,
    /// Names in attempt order
    pub configured: Vec<String>,
    /// Primary adapter
    pub primary: Option<String>,
    /// Fallback adapters
    pub fallbacks: Vec<String>,
}

/// Engine health snapshot
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    /// Providers
    pub providers: ProviderStatus,
    /// Cache counters
    pub cache: CacheStats,
    /// Cost-saving advice from the usage sink
    pub recommendations: Vec<String>,
    /// Overall state
    pub status: ServiceState,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Routing, failover, scoring, and enhancement over a provider registry
pub struct Orchestrator {
    registry: RwLock<Arc<ProviderRegistry>>,
    cache: Arc<ResponseCache>,
    usage: Arc<dyn UsageSink>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Create with a fresh cache and the tracing usage sink
    #[must_use]
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry: RwLock::new(Arc::new(registry)),
            cache: Arc::new(ResponseCache::new()),
            usage: Arc::new(TracingUsageSink),
            config: OrchestratorConfig::default(),
        }
    }

    /// Share an existing cache
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Send usage events to `sink`
    #[must_use]
    pub fn with_usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage = sink;
        self
    }

    /// Replace tuning
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Current tuning
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Shared cache
    #[must_use]
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Snapshot of the current registry
    #[must_use]
    pub fn registry(&self) -> Arc<ProviderRegistry> {
        self.registry.read().clone()
    }

    /// Swap in a new registry
    pub fn replace_registry(&self, registry: ProviderRegistry) {
        *self.registry.write() = Arc::new(registry);
    }

    /// Rebuild the registry after a credential change
    pub fn reload(
        &self,
        store: &dyn CredentialStore,
        settings: &std::collections::HashMap<ProviderKind, AdapterSettings>,
    ) {
        let registry = ProviderRegistry::from_credentials(store, settings)
            .with_high_quality_threshold(self.config.high_quality_threshold);
        info!(providers = registry.len(), "Reloaded provider registry");
        self.replace_registry(registry);
    }

    /// Configured adapter names in attempt order
    #[must_use]
    pub fn available_providers(&self) -> Vec<String> {
        self.registry().available_providers()
    }

    // ------------------------------------------------------------------------
    // Bounded calls
    // ------------------------------------------------------------------------

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, UpstreamError>>,
    ) -> Result<T, UpstreamError> {
        tokio::time::timeout(self.config.call_timeout, call)
            .await
            .unwrap_or(Err(UpstreamError::Timeout))
    }

    async fn enhance_with(
        &self,
        adapter: &Arc<dyn LlmBackend>,
        text: &str,
        context: Option<&Value>,
    ) -> Enhancement {
        tokio::time::timeout(self.config.call_timeout, adapter.enhance_prompt(text, context))
            .await
            .unwrap_or_else(|_| Enhancement::Unchanged {
                text: text.to_string(),
                error: UpstreamError::Timeout,
            })
    }

    fn record_usage(&self, provider: &str, operation: TaskKind, text: &str) {
        let kind = self.registry().get(provider).map(|a| a.kind());
        let (tokens, cost) = match kind {
            Some(kind) => {
                let estimate = cost::estimate_prompt_cost(text, kind, operation);
                (estimate.tokens, estimate.cost)
            }
            None => (cost::estimate_tokens(text), 0.0),
        };
        let event = UsageEvent::new(provider, operation, tokens, cost);
        if let Err(e) = self.usage.record(&event) {
            warn!(provider, error = %e, "Failed to record usage");
        }
    }

    // ------------------------------------------------------------------------
    // Failover
    // ------------------------------------------------------------------------

    /// Run `operation` on the primary, then fallbacks, until one succeeds
    ///
    /// At most `min(max_retries, adapter count)` attempts are made. On
    /// exhaustion the error carries the last failure as its source and every
    /// failure in order.
    pub async fn execute_with_failover<T, F, Fut>(
        &self,
        max_retries: usize,
        operation: F,
    ) -> Result<(T, String), ConductorError>
    where
        F: Fn(Arc<dyn LlmBackend>) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let chain = self.registry().chain();
        self.failover_over(chain, max_retries, operation).await
    }

    async fn failover_over<T, F, Fut>(
        &self,
        chain: Vec<Arc<dyn LlmBackend>>,
        max_retries: usize,
        operation: F,
    ) -> Result<(T, String), ConductorError>
    where
        F: Fn(Arc<dyn LlmBackend>) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        if chain.is_empty() {
            return Err(ConductorError::NoProviderConfigured);
        }

        let limit = max_retries.max(1).min(chain.len());
        let mut attempts: Vec<ProviderFailure> = Vec::with_capacity(limit);

        for (attempt, adapter) in chain.into_iter().take(limit).enumerate() {
            let provider = adapter.name().to_string();
            let state = if attempt == 0 {
                CallState::Executing
            } else {
                CallState::Retrying
            };
            debug!(state = ?state, provider = %provider, attempt, "Dispatching");

            match self.bounded(operation(adapter)).await {
                Ok(value) => {
                    debug!(state = ?CallState::Succeeded, provider = %provider, attempt);
                    return Ok((value, provider));
                }
                Err(error) => {
                    warn!(provider = %provider, attempt, error = %error, "Provider failed");
                    attempts.push(ProviderFailure { provider, error });
                }
            }
        }

        debug!(state = ?CallState::Exhausted, attempts = attempts.len());
        let Some(last) = attempts.last().map(|f| f.error.clone()) else {
            return Err(ConductorError::NoProviderConfigured);
        };
        Err(ConductorError::AllProvidersFailed {
            source: last,
            attempts,
        })
    }

    // ------------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------------

    /// Dispatch `task` to its selected adapter, then the rest of the chain
    ///
    /// Enhancement that came back unchanged counts as a failure here; a
    /// defaulted score does not. When every adapter fails the error carries
    /// the first (original) failure.
    pub async fn route(&self, task: &Task) -> Result<TaskOutcome, ConductorError> {
        debug!(state = ?CallState::Routing, kind = %task.kind());
        let registry = self.registry();
        let selected = registry.select_for(task)?;

        let mut order = vec![selected.clone()];
        order.extend(
            registry
                .chain()
                .into_iter()
                .filter(|a| a.name() != selected.name()),
        );

        let mut attempts = Vec::new();
        for adapter in order {
            let provider = adapter.name().to_string();
            debug!(state = ?CallState::Executing, provider = %provider, kind = %task.kind());
            match self.dispatch(&adapter, task).await {
                Ok(outcome) => return Ok(outcome),
                Err(error) => {
                    warn!(provider = %provider, error = %error, "Routed task failed");
                    attempts.push(ProviderFailure { provider, error });
                }
            }
        }

        match attempts.first().map(|f| f.error.clone()) {
            Some(original) => Err(ConductorError::AllProvidersFailed {
                source: original,
                attempts,
            }),
            None => Err(ConductorError::NoProviderConfigured),
        }
    }

    async fn dispatch(
        &self,
        adapter: &Arc<dyn LlmBackend>,
        task: &Task,
    ) -> Result<TaskOutcome, UpstreamError> {
        let provider = adapter.name().to_string();
        match task.payload() {
            TaskPayload::Completion(request) => self
                .bounded(adapter.complete(request))
                .await
                .map(TaskOutcome::Completion),
            TaskPayload::Streaming(request) => self
                .bounded(adapter.stream(request, CancellationToken::new()))
                .await
                .map(TaskOutcome::Stream),
            TaskPayload::Enhancement { prompt, context } => {
                match self.enhance_with(adapter, prompt, context.as_ref()).await {
                    Enhancement::Enhanced(text) => Ok(TaskOutcome::Enhancement { provider, text }),
                    Enhancement::Unchanged { error, .. } => Err(error),
                }
            }
            TaskPayload::Scoring { prompt, context } => self
                .bounded(adapter.score_prompt_quality(prompt, context.as_ref()))
                .await
                .map(|outcome| TaskOutcome::Scoring { provider, outcome }),
        }
    }

    /// Cheapest/fastest/strongest configured provider for `task`
    #[must_use]
    pub fn recommend_provider(&self, task: &Task) -> Option<String> {
        let registry = self.registry();
        let chain = registry.chain();
        let kinds: Vec<ProviderKind> = chain.iter().map(|a| a.kind()).collect();
        let priorities = SelectionPriorities::for_task(task, self.config.high_quality_threshold);
        let kind = cost::select_optimal_provider(priorities, &kinds)?;
        chain
            .iter()
            .find(|a| a.kind() == kind)
            .map(|a| a.name().to_string())
    }

    // ------------------------------------------------------------------------
    // Enhancement loop
    // ------------------------------------------------------------------------

    /// Enhance `base_prompt` until a score reaches `target_quality`
    ///
    /// The primary goes first; each fallback then refines the current
    /// working text. The best score seen never decreases. Returns the best
    /// result even when the target is missed; fails only when every scoring
    /// call raised, carrying the first failure.
    pub async fn optimize_prompt(
        &self,
        base_prompt: &str,
        context: &Value,
        target_quality: f64,
    ) -> Result<OptimizedPrompt, ConductorError> {
        let registry = self.registry();
        if registry.is_empty() {
            return Err(ConductorError::NoProviderConfigured);
        }

        let cache_params = json!({
            "basePrompt": base_prompt,
            "context": context,
            "targetQuality": target_quality,
        });
        let key = cache_key(OperationClass::Enhancement, &cache_params)?;
        if let Some(hit) = self.cache.get_by_key::<OptimizedPrompt>(&key) {
            debug!(provider = %hit.provider, "Enhancement served from cache");
            return Ok(hit);
        }

        let mut best_text = base_prompt.to_string();
        let mut best_quality = QualityScore::zero();
        let mut best_provider = String::from("none");
        let mut working = base_prompt.to_string();
        let mut providers_used = Vec::new();
        let mut failures: Vec<ProviderFailure> = Vec::new();
        let mut iterations = 0u32;

        for (index, adapter) in registry.chain().into_iter().enumerate() {
            let provider = adapter.name().to_string();
            iterations += 1;
            providers_used.push(provider.clone());

            let enhancement = self.enhance_with(&adapter, &working, Some(context)).await;
            if let Some(error) = enhancement.error() {
                debug!(provider = %provider, error = %error, "Enhancement unchanged");
            }
            let mut candidate = enhancement.into_text();
            if candidate.trim().is_empty() {
                candidate.clone_from(&working);
            }
            if index == 0 {
                working.clone_from(&candidate);
            }

            match self
                .bounded(adapter.score_prompt_quality(&candidate, Some(context)))
                .await
            {
                Ok(outcome) => {
                    let score = outcome.into_score();
                    self.record_usage(&provider, TaskKind::Enhancement, base_prompt);
                    debug!(provider = %provider, overall = score.overall, best = best_quality.overall, "Scored candidate");
                    if score.overall > best_quality.overall {
                        best_quality = score;
                        best_text.clone_from(&candidate);
                        best_provider.clone_from(&provider);
                        working = candidate;
                    }
                }
                Err(error) => {
                    warn!(provider = %provider, error = %error, "Scoring failed during enhancement");
                    failures.push(ProviderFailure { provider, error });
                }
            }

            if best_quality.overall >= target_quality {
                break;
            }
        }

        if failures.len() == providers_used.len() {
            if let Some(first) = failures.first().map(|f| f.error.clone()) {
                return Err(ConductorError::AllProvidersFailed {
                    source: first,
                    attempts: failures,
                });
            }
        }

        let target_met = best_quality.overall >= target_quality;
        let result = OptimizedPrompt {
            original: base_prompt.to_string(),
            enhanced: best_text,
            quality: best_quality,
            provider: best_provider,
            providers_used,
            iterations,
            target_met,
        };

        if target_met {
            if let Err(e) =
                self.cache
                    .set_by_key(&key, OperationClass::Enhancement, &result, None)
            {
                warn!(error = %e, "Enhancement not cached");
            }
        }

        info!(
            provider = %result.provider,
            overall = result.quality.overall,
            iterations = result.iterations,
            target_met,
            "Prompt optimized"
        );
        Ok(result)
    }

    // ------------------------------------------------------------------------
    // Scoring
    // ------------------------------------------------------------------------

    /// Average score across every adapter that answers; never fails
    pub async fn score_prompt_quality(&self, prompt: &str, context: Option<&Value>) -> QualityScore {
        self.score_outcome(prompt, context).await.into_score()
    }

    /// Like [`Self::score_prompt_quality`], tagged with whether any adapter
    /// produced a real score
    ///
    /// Adapters that raise are skipped rather than defaulted in. With no
    /// responders the result is a [`ScoreOutcome::Defaulted`] neutral score.
    pub async fn score_outcome(&self, prompt: &str, context: Option<&Value>) -> ScoreOutcome {
        let cache_params = json!({"prompt": prompt, "context": context});
        if let Ok(Some(hit)) = self
            .cache
            .get::<_, QualityScore>(OperationClass::Scoring, &cache_params)
        {
            return ScoreOutcome::Scored(hit);
        }

        let chain = self.registry().chain();
        let calls = chain.iter().map(|adapter| async move {
            let result = self
                .bounded(adapter.score_prompt_quality(prompt, context))
                .await;
            (adapter.name().to_string(), result)
        });

        let mut scores = Vec::new();
        let mut any_scored = false;
        for (provider, result) in join_all(calls).await {
            match result {
                Ok(outcome) => {
                    any_scored |= outcome.is_scored();
                    self.record_usage(&provider, TaskKind::Scoring, prompt);
                    scores.push(outcome.into_score());
                }
                Err(error) => warn!(provider = %provider, error = %error, "Scoring failed, skipping"),
            }
        }

        match QualityScore::average(&scores) {
            Some(average) if any_scored => {
                if let Err(e) = self
                    .cache
                    .set(OperationClass::Scoring, &cache_params, &average, None)
                {
                    warn!(error = %e, "Score not cached");
                }
                ScoreOutcome::Scored(average)
            }
            Some(average) => ScoreOutcome::Defaulted(average),
            None => ScoreOutcome::Defaulted(QualityScore::uniform(
                NEUTRAL_SCORE,
                vec![NO_PROVIDERS_FEEDBACK.to_string()],
            )),
        }
    }

    // ------------------------------------------------------------------------
    // Caller-facing execution
    // ------------------------------------------------------------------------

    /// Run a completion, starting with `provider` when it is configured
    pub async fn execute(
        &self,
        request: &CompletionRequest,
        provider: Option<&str>,
    ) -> Result<ExecuteResult, ConductorError> {
        let chain = self.registry().chain_starting_with(provider);
        let (response, provider) = self
            .failover_over(chain, self.config.max_failover_attempts, |adapter| async move {
                adapter.complete(request).await
            })
            .await?;
        self.record_usage(&provider, TaskKind::Completion, &request.prompt);
        Ok(ExecuteResult {
            content: response.content,
            provider,
            model_id: response.model_id,
        })
    }

    /// Open a stream, starting with `provider` when it is configured
    ///
    /// Failover applies until a stream is established; errors after that
    /// arrive in-band as [`crate::backend::StreamingToken::Error`]. Firing
    /// `cancel` (or dropping the stream) stops the upstream read.
    pub async fn stream(
        &self,
        request: &CompletionRequest,
        provider: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<TokenStream, ConductorError> {
        let chain = self.registry().chain_starting_with(provider);
        let (stream, provider) = self
            .failover_over(chain, self.config.max_failover_attempts, |adapter| {
                let cancel = cancel.child_token();
                async move { adapter.stream(request, cancel).await }
            })
            .await?;
        self.record_usage(&provider, TaskKind::Streaming, &request.prompt);
        Ok(stream)
    }

    /// Estimated cost of sending `prompt` to `provider` (or the primary)
    ///
    /// Zero when no adapter is configured.
    #[must_use]
    pub fn estimate_cost(&self, prompt: &str, provider: Option<&str>) -> f64 {
        let registry = self.registry();
        let adapter = provider
            .and_then(|name| registry.get(name))
            .or_else(|| registry.primary());
        adapter.map_or(0.0, |a| a.estimate_cost(cost::estimate_tokens(prompt)))
    }

    /// Providers, cache counters, cost advice, and overall state
    #[must_use]
    pub fn status(&self) -> SystemStatus {
        let registry = self.registry();
        let chain = registry.fallback_chain();
        SystemStatus {
            providers: ProviderStatus {
                total: registry.len(),
                configured: registry.available_providers(),
                primary: chain.primary.clone(),
                fallbacks: chain.fallbacks.clone(),
            },
            cache: self.cache.stats(),
            recommendations: self.usage.recommendations(Utc::now()),
            status: if registry.is_empty() {
                ServiceState::NoProviders
            } else {
                ServiceState::Operational
            },
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &*self.registry.read())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StreamingToken;
    use crate::cost::UsageLedger;
    use crate::credentials::StaticCredentialStore;
    use crate::test_utils::{MockBackend, MockCallKind};
    use pretty_assertions::assert_eq;

    fn orchestrator(adapters: &[&MockBackend]) -> Orchestrator {
        Orchestrator::new(ProviderRegistry::from_adapters(
            adapters.iter().map(|a| a.shared()),
        ))
    }

    // ------------------------------------------------------------------------
    // optimize_prompt
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_primary_meets_target_then_cache_hit() {
        let primary = MockBackend::new("primary")
            .with_enhancement("T")
            .with_score(90.0);
        let orch = orchestrator(&[&primary]);

        let first = orch
            .optimize_prompt("Build a login form", &json!({}), 85.0)
            .await
            .unwrap();
        assert_eq!(first.enhanced, "T");
        assert_eq!(first.quality.overall, 90.0);
        assert_eq!(first.provider, "primary");
        assert!(first.target_met);

        let calls_after_first = primary.total_calls();
        let second = orch
            .optimize_prompt("Build a login form", &json!({}), 85.0)
            .await
            .unwrap();
        assert_eq!(second, first);
        assert_eq!(primary.total_calls(), calls_after_first);
        assert_eq!(orch.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn test_fallback_reaches_target() {
        let primary = MockBackend::new("primary").with_score(60.0);
        let fallback = MockBackend::new("fallback").with_score(88.0);
        let orch = orchestrator(&[&primary, &fallback]);

        let result = orch
            .optimize_prompt("Build a login form", &json!({}), 85.0)
            .await
            .unwrap();
        assert_eq!(result.provider, "fallback");
        assert_eq!(result.quality.overall, 88.0);
        assert_eq!(result.providers_used, vec!["primary", "fallback"]);
        assert_eq!(result.iterations, 2);
    }

    #[tokio::test]
    async fn test_fallback_refines_working_text() {
        let primary = MockBackend::new("primary")
            .with_enhancement("draft one")
            .with_score(50.0);
        let fallback = MockBackend::new("fallback").with_score(70.0);
        let orch = orchestrator(&[&primary, &fallback]);

        let result = orch.optimize_prompt("base", &json!({}), 95.0).await.unwrap();
        let enhance_calls: Vec<_> = fallback
            .calls()
            .into_iter()
            .filter(|c| c.kind == MockCallKind::Enhance)
            .collect();
        assert_eq!(enhance_calls[0].prompt, "draft one");
        assert!(result.enhanced.starts_with("draft one"));
        assert!(!result.target_met);
    }

    #[tokio::test]
    async fn test_best_quality_never_decreases() {
        let a = MockBackend::new("a").with_score(70.0);
        let b = MockBackend::new("b").with_score(40.0);
        let c = MockBackend::new("c").with_score(65.0);
        let orch = orchestrator(&[&a, &b, &c]);

        let result = orch.optimize_prompt("base", &json!({}), 99.0).await.unwrap();
        assert_eq!(result.provider, "a");
        assert_eq!(result.quality.overall, 70.0);
        assert_eq!(result.iterations, 3);
        // Missed targets are not cached
        assert!(orch.cache().is_empty());
    }

    #[tokio::test]
    async fn test_all_scoring_failures_carry_first_error() {
        let a = MockBackend::new("a").failing();
        let b = MockBackend::new("b").failing();
        let orch = orchestrator(&[&a, &b]);

        let err = orch
            .optimize_prompt("base", &json!({}), 85.0)
            .await
            .unwrap_err();
        match err {
            ConductorError::AllProvidersFailed { source, attempts } => {
                assert_eq!(source, UpstreamError::ConnectionFailed("a is down".into()));
                assert_eq!(attempts.len(), 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_optimize_without_providers() {
        let orch = Orchestrator::new(ProviderRegistry::empty());
        assert!(matches!(
            orch.optimize_prompt("x", &json!({}), 85.0).await,
            Err(ConductorError::NoProviderConfigured)
        ));
    }

    #[tokio::test]
    async fn test_usage_recorded_for_each_scored_round() {
        let ledger = Arc::new(UsageLedger::new());
        let primary = MockBackend::new("primary").with_score(60.0);
        let fallback = MockBackend::new("fallback").with_score(90.0);
        let orch = orchestrator(&[&primary, &fallback]).with_usage_sink(ledger.clone());

        orch.optimize_prompt("base prompt", &json!({}), 85.0)
            .await
            .unwrap();
        let events = ledger.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].provider, "fallback");
        assert_eq!(events[1].operation, TaskKind::Enhancement);
        assert_eq!(events[1].tokens, 3);
    }

    // ------------------------------------------------------------------------
    // score_prompt_quality
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_scoring_skips_failed_adapters() {
        let a = MockBackend::new("a").with_quality(QualityScore::new(
            80.0,
            80.0,
            80.0,
            80.0,
            80.0,
            vec!["a1".into(), "a2".into()],
        ));
        let b = MockBackend::new("b").failing();
        let c = MockBackend::new("c").with_quality(QualityScore::new(
            60.0,
            70.0,
            60.0,
            60.0,
            60.0,
            vec!["c1".into()],
        ));
        let orch = orchestrator(&[&a, &b, &c]);

        let score = orch.score_prompt_quality("prompt", None).await;
        assert_eq!(score.overall, 70.0);
        assert_eq!(score.clarity, 75.0);
        assert_eq!(score.feedback, vec!["a1", "a2", "c1"]);
    }

    #[tokio::test]
    async fn test_scoring_without_responders_is_neutral() {
        let orch = orchestrator(&[&MockBackend::new("down").failing()]);
        let outcome = orch.score_outcome("prompt", None).await;
        assert!(!outcome.is_scored());
        assert_eq!(outcome.score().overall, 70.0);
        assert_eq!(outcome.score().feedback, vec![NO_PROVIDERS_FEEDBACK]);

        let empty = Orchestrator::new(ProviderRegistry::empty());
        assert_eq!(empty.score_prompt_quality("p", None).await.overall, 70.0);
    }

    #[tokio::test]
    async fn test_scores_are_cached() {
        let a = MockBackend::new("a").with_score(77.0);
        let orch = orchestrator(&[&a]);
        orch.score_prompt_quality("prompt", None).await;
        orch.score_prompt_quality("  PROMPT ", None).await;
        assert_eq!(a.call_count(MockCallKind::Score), 1);
    }

    #[tokio::test]
    async fn test_defaulted_scores_are_tagged_and_not_cached() {
        let a = MockBackend::new("a").with_score(75.0).with_defaulted_score();
        let orch = orchestrator(&[&a]);
        assert!(!orch.score_outcome("prompt", None).await.is_scored());
        assert!(orch.cache().is_empty());
    }

    // ------------------------------------------------------------------------
    // Failover
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_failover_exhaustion_after_n_attempts() {
        let adapters: Vec<MockBackend> = (0..3)
            .map(|i| MockBackend::new(format!("p{i}")).failing())
            .collect();
        let refs: Vec<&MockBackend> = adapters.iter().collect();
        let orch = orchestrator(&refs);

        let err = orch
            .execute_with_failover(10, |adapter| async move {
                adapter.complete(&CompletionRequest::new("x")).await
            })
            .await
            .unwrap_err();

        for adapter in &adapters {
            assert_eq!(adapter.call_count(MockCallKind::Complete), 1);
        }
        match err {
            ConductorError::AllProvidersFailed { source, attempts } => {
                assert_eq!(source, UpstreamError::ConnectionFailed("p2 is down".into()));
                let order: Vec<_> = attempts.iter().map(|f| f.provider.as_str()).collect();
                assert_eq!(order, vec!["p0", "p1", "p2"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failover_respects_max_retries() {
        let a = MockBackend::new("a").failing();
        let b = MockBackend::new("b").failing();
        let c = MockBackend::new("c");
        let orch = orchestrator(&[&a, &b, &c]);

        let err = orch
            .execute_with_failover(2, |adapter| async move {
                adapter.complete(&CompletionRequest::new("x")).await
            })
            .await
            .unwrap_err();
        assert_eq!(err.attempts().len(), 2);
        assert_eq!(c.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_execute_fails_over_and_names_provider() {
        let a = MockBackend::new("a").failing();
        let b = MockBackend::new("b").with_reply("from b");
        let orch = orchestrator(&[&a, &b]);

        let result = orch
            .execute(&CompletionRequest::new("hello"), None)
            .await
            .unwrap();
        assert_eq!(result.content, "from b");
        assert_eq!(result.provider, "b");
    }

    #[tokio::test]
    async fn test_execute_prefers_requested_provider() {
        let a = MockBackend::new("a");
        let b = MockBackend::new("b");
        let orch = orchestrator(&[&a, &b]);

        let result = orch
            .execute(&CompletionRequest::new("hello"), Some("b"))
            .await
            .unwrap();
        assert_eq!(result.provider, "b");
        assert_eq!(a.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_execute_without_providers() {
        let orch = Orchestrator::new(ProviderRegistry::empty());
        let err = orch
            .execute(&CompletionRequest::new("hello"), None)
            .await
            .unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_triggers_failover() {
        let slow = MockBackend::new("slow").with_latency(Duration::from_secs(30));
        let fast = MockBackend::new("fast").with_reply("quick");
        let orch = orchestrator(&[&slow, &fast]).with_config(OrchestratorConfig {
            call_timeout: Duration::from_secs(1),
            ..OrchestratorConfig::default()
        });

        let result = orch
            .execute(&CompletionRequest::new("hello"), None)
            .await
            .unwrap();
        assert_eq!(result.provider, "fast");
    }

    // ------------------------------------------------------------------------
    // Streaming
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_stream_fails_over_and_ends_with_sentinel() {
        let a = MockBackend::new("a").failing();
        let b = MockBackend::new("b").with_stream_tokens(&["x", "y"]);
        let orch = orchestrator(&[&a, &b]);

        let mut stream = orch
            .stream(&CompletionRequest::new("hi"), None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stream.provider(), "b");

        let mut tokens = Vec::new();
        while let Some(token) = stream.next_token().await {
            tokens.push(token);
        }
        assert_eq!(
            tokens,
            vec![
                StreamingToken::Token("x".into()),
                StreamingToken::Token("y".into()),
                StreamingToken::Complete {
                    message: "xy".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_parent_cancel_reaches_stream() {
        let a = MockBackend::new("a");
        let orch = orchestrator(&[&a]);
        let cancel = CancellationToken::new();
        let stream = orch
            .stream(&CompletionRequest::new("hi"), None, cancel.clone())
            .await
            .unwrap();
        cancel.cancel();
        assert!(stream.is_cancelled());
    }

    // ------------------------------------------------------------------------
    // route
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_route_reraises_original_error() {
        let a = MockBackend::new("a").failing();
        let b = MockBackend::new("b").failing();
        let orch = orchestrator(&[&a, &b]);

        let err = orch
            .route(&Task::completion(CompletionRequest::new("x")))
            .await
            .unwrap_err();
        match err {
            ConductorError::AllProvidersFailed { source, .. } => {
                assert_eq!(source, UpstreamError::ConnectionFailed("a is down".into()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_route_enhancement_skips_unchanged_results() {
        let a = MockBackend::new("a").failing();
        let b = MockBackend::new("b").with_enhancement("improved");
        let orch = orchestrator(&[&a, &b]);

        match orch.route(&Task::enhancement("x", None)).await.unwrap() {
            TaskOutcome::Enhancement { provider, text } => {
                assert_eq!(provider, "b");
                assert_eq!(text, "improved");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_route_high_quality_task_prefers_anthropic() {
        let groq = MockBackend::new("groq").with_kind(ProviderKind::Groq);
        let anthropic = MockBackend::new("anthropic").with_kind(ProviderKind::Anthropic);
        let orch = orchestrator(&[&groq, &anthropic]);

        let task = Task::scoring("x", None).with_quality_required(95);
        match orch.route(&task).await.unwrap() {
            TaskOutcome::Scoring { provider, outcome } => {
                assert_eq!(provider, "anthropic");
                assert!(outcome.is_scored());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(groq.total_calls(), 0);
    }

    // ------------------------------------------------------------------------
    // Misc surface
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_status_and_reload() {
        let orch = Orchestrator::new(ProviderRegistry::empty());
        let status = orch.status();
        assert_eq!(status.status, ServiceState::NoProviders);
        assert_eq!(status.providers.total, 0);

        let store = StaticCredentialStore::new()
            .with_key("openai", "sk")
            .with_key("groq", "gk");
        orch.reload(&store, &std::collections::HashMap::new());
        let status = orch.status();
        assert_eq!(status.status, ServiceState::Operational);
        assert_eq!(status.providers.primary.as_deref(), Some("openai"));
        assert_eq!(status.providers.fallbacks, vec!["groq"]);
        assert_eq!(orch.available_providers(), vec!["openai", "groq"]);
    }

    #[tokio::test]
    async fn test_status_includes_cost_recommendations() {
        let orch = orchestrator(&[&MockBackend::new("openai")]);
        assert_eq!(
            orch.status().recommendations,
            crate::cost::general_recommendations()
        );

        let ledger = Arc::new(crate::cost::UsageLedger::new());
        let orch = orchestrator(&[&MockBackend::new("openai")]).with_usage_sink(ledger.clone());
        orch.execute(&CompletionRequest::new("x".repeat(400)), None)
            .await
            .unwrap();
        let status = orch.status();
        assert!(status.recommendations[0].starts_with("openai accounts"));

        let payload = serde_json::to_value(&status).unwrap();
        assert!(payload["recommendations"].as_array().is_some_and(|r| !r.is_empty()));
    }

    #[test]
    fn test_estimate_cost_uses_named_or_primary() {
        let orch = orchestrator(&[
            &MockBackend::new("openai").with_kind(ProviderKind::OpenAi),
            &MockBackend::new("anthropic").with_kind(ProviderKind::Anthropic),
        ]);
        let prompt = "x".repeat(4000);
        // Mock model id is not gpt-4, so OpenAI bills at 0.002 / 1K
        assert!((orch.estimate_cost(&prompt, None) - 0.002).abs() < 1e-12);
        assert!((orch.estimate_cost(&prompt, Some("anthropic")) - 0.015).abs() < 1e-12);
        assert_eq!(
            Orchestrator::new(ProviderRegistry::empty()).estimate_cost(&prompt, None),
            0.0
        );
    }

    #[test]
    fn test_recommend_provider_for_cost_sensitive_task() {
        let orch = orchestrator(&[
            &MockBackend::new("openai").with_kind(ProviderKind::OpenAi),
            &MockBackend::new("google").with_kind(ProviderKind::Google),
        ]);
        let task = Task::completion(CompletionRequest::new("x")).cost_sensitive(true);
        assert_eq!(orch.recommend_provider(&task).as_deref(), Some("google"));
    }
}
