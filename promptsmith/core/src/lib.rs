//! Promptsmith Core - Provider Orchestration and Prompt Enhancement
//!
//! This crate hides several text-generation providers behind one capability
//! contract, routes work to the best available one, fails over through an
//! ordered chain, memoizes idempotent work, and drives a closed-loop
//! quality-improvement cycle over prompts.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                    EnhancementPipeline                         │
//! │   context analysis -> best practices -> AI -> format -> score  │
//! └───────────────────────────────┬───────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┴───────────────────────────────┐
//! │                        Orchestrator                            │
//! │  ┌──────────────┐  ┌───────────────┐  ┌─────────────────────┐  │
//! │  │   Provider   │  │    Response   │  │     Cost Model /    │  │
//! │  │   Registry   │  │     Cache     │  │     UsageSink       │  │
//! │  └──────┬───────┘  └───────────────┘  └─────────────────────┘  │
//! └─────────┼─────────────────────────────────────────────────────┘
//!           │ Arc<dyn LlmBackend>
//!   ┌───────┴──────┬──────────────┬──────────────┐
//!   │   OpenAI     │  Anthropic   │   Google     │  Groq
//!   └──────────────┴──────────────┴──────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use promptsmith_core::{
//!     config::load_config, EnhancementPipeline, EnvCredentialStore, Orchestrator,
//!     ProviderRegistry,
//! };
//!
//! let config = load_config()?;
//! let registry = ProviderRegistry::from_credentials(&EnvCredentialStore, &config.providers);
//! let orchestrator = Arc::new(Orchestrator::new(registry).with_config(config.orchestrator));
//! let pipeline = EnhancementPipeline::new(orchestrator);
//!
//! let result = pipeline.enhance("Build a REST API", &answers, None).await;
//! println!("{} ({})", result.enhanced, result.quality.overall);
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: The `LlmBackend` trait and the HTTP adapters
//! - [`registry`]: Configured adapters, primary and fallback chain
//! - [`cache`]: Fingerprint-keyed TTL cache
//! - [`cost`]: Rate tables, provider selection heuristic, usage accounting
//! - [`orchestrator`]: Routing, failover, scoring, enhancement loop
//! - [`pipeline`]: End-to-end prompt enhancement
//! - [`config`]: TOML/env configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod cache;
pub mod config;
pub mod cost;
pub mod credentials;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod quality;
pub mod registry;
pub mod task;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenience
pub use backend::{
    create_backend, AdapterSettings, CompletionRequest, CompletionResponse, LlmBackend,
    ProviderKind, StreamingToken, TokenStream, TokenUsage,
};
pub use cache::{CacheStats, CacheTtls, OperationClass, ResponseCache};
pub use config::{ConfigError, ConfigOverrides, ConfigSource, PromptsmithConfig};
pub use cost::{CostLimits, TracingUsageSink, UsageEvent, UsageLedger, UsageSink};
pub use credentials::{CredentialStore, EnvCredentialStore, StaticCredentialStore};
pub use error::{ConductorError, ProviderFailure, UpstreamError};
pub use orchestrator::{
    ExecuteResult, OptimizedPrompt, Orchestrator, OrchestratorConfig, SystemStatus, TaskOutcome,
};
pub use pipeline::{EnhancementPipeline, EnhancementResult, FollowUpQuestion, ValidationReport};
pub use quality::{Enhancement, QualityScore, ScoreOutcome};
pub use registry::{FallbackChain, ProviderRegistry};
pub use task::{Task, TaskKind, TaskPriority};
