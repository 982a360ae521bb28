//! Cost Model
//!
//! Static per-provider rate tables, a priority-weighted provider heuristic,
//! and usage accounting.
//!
//! The numeric constants are illustrative defaults, not billing-grade
//! figures. Usage is accumulated in-process by [`UsageLedger`]; nothing here
//! is persisted.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::backend::ProviderKind;
use crate::task::{Task, TaskKind, TaskPriority};

// ============================================================================
// Rates and estimates
// ============================================================================

/// USD per 1K tokens for `operation` on `provider`
///
/// Streaming and completion are output-heavy and priced higher.
#[must_use]
pub fn rate_per_1k(provider: ProviderKind, operation: TaskKind) -> f64 {
    let output_heavy = matches!(operation, TaskKind::Streaming | TaskKind::Completion);
    match (provider, output_heavy) {
        (ProviderKind::OpenAi, false) => 0.03,
        (ProviderKind::OpenAi, true) => 0.06,
        (ProviderKind::Anthropic, false) => 0.045,
        (ProviderKind::Anthropic, true) => 0.09,
        (ProviderKind::Google, false) => 0.001,
        (ProviderKind::Google, true) => 0.002,
        (ProviderKind::Groq, _) => 0.0002,
    }
}

/// Rough token count: one token per four characters, rounded up
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Derived cost of one operation
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimate {
    /// Estimated tokens
    pub tokens: u64,
    /// Rate applied
    pub rate_per_1k: f64,
    /// tokens × rate / 1000
    pub cost: f64,
}

/// Estimate the cost of sending `prompt` to `provider` for `operation`
#[must_use]
pub fn estimate_prompt_cost(prompt: &str, provider: ProviderKind, operation: TaskKind) -> CostEstimate {
    let tokens = estimate_tokens(prompt);
    let rate = rate_per_1k(provider, operation);
    CostEstimate {
        tokens,
        rate_per_1k: rate,
        cost: tokens as f64 / 1000.0 * rate,
    }
}

// ============================================================================
// Selection heuristic
// ============================================================================

/// Relative provider strengths on a 0–10 scale
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProviderTraits {
    /// Latency
    pub speed: f64,
    /// Cheapness
    pub cost: f64,
    /// Output quality
    pub quality: f64,
}

/// Trait table, in tie-breaking order
pub const PROVIDER_TRAITS: [(ProviderKind, ProviderTraits); 4] = [
    (ProviderKind::Groq, ProviderTraits { speed: 10.0, cost: 10.0, quality: 7.0 }),
    (ProviderKind::Google, ProviderTraits { speed: 8.0, cost: 9.0, quality: 8.0 }),
    (ProviderKind::OpenAi, ProviderTraits { speed: 6.0, cost: 5.0, quality: 10.0 }),
    (ProviderKind::Anthropic, ProviderTraits { speed: 7.0, cost: 4.0, quality: 9.0 }),
];

const SPEED_WEIGHT: f64 = 0.5;
const COST_WEIGHT: f64 = 0.4;
const QUALITY_WEIGHT: f64 = 0.3;

/// What the caller cares about
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionPriorities {
    /// Favor fast providers
    pub speed: bool,
    /// Favor cheap providers
    pub cost: bool,
    /// Favor strong providers
    pub quality: bool,
}

impl SelectionPriorities {
    /// Derive priorities from a task
    #[must_use]
    pub fn for_task(task: &Task, high_quality_threshold: u8) -> Self {
        Self {
            speed: task.priority() == TaskPriority::High,
            cost: task.is_cost_sensitive(),
            quality: task.quality_required() > high_quality_threshold,
        }
    }

    fn is_balanced(self) -> bool {
        !self.speed && !self.cost && !self.quality
    }

    /// Weighted score for one provider
    #[must_use]
    pub fn score(self, traits: &ProviderTraits) -> f64 {
        if self.is_balanced() {
            return traits.speed * 0.3 + traits.cost * 0.3 + traits.quality * 0.4;
        }
        let mut score = 0.0;
        if self.speed {
            score += traits.speed * SPEED_WEIGHT;
        }
        if self.cost {
            score += traits.cost * COST_WEIGHT;
        }
        if self.quality {
            score += traits.quality * QUALITY_WEIGHT;
        }
        score
    }
}

/// Best provider among `candidates` for `priorities`
///
/// Ties keep trait-table order. Returns `None` when no candidate is given.
#[must_use]
pub fn select_optimal_provider(
    priorities: SelectionPriorities,
    candidates: &[ProviderKind],
) -> Option<ProviderKind> {
    let mut best: Option<(ProviderKind, f64)> = None;
    for (kind, traits) in &PROVIDER_TRAITS {
        if !candidates.contains(kind) {
            continue;
        }
        let score = priorities.score(traits);
        if best.map_or(true, |(_, b)| score > b) {
            best = Some((*kind, score));
        }
    }
    best.map(|(kind, _)| kind)
}

// ============================================================================
// Usage accounting
// ============================================================================

/// One billable operation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    /// Event id
    pub id: Uuid,
    /// Adapter name
    pub provider: String,
    /// Operation class
    pub operation: TaskKind,
    /// Estimated tokens
    pub tokens: u64,
    /// Estimated USD
    pub estimated_cost: f64,
    /// Caller, if known
    pub user_id: Option<String>,
    /// When it happened
    pub recorded_at: DateTime<Utc>,
}

impl UsageEvent {
    /// New event stamped now
    pub fn new(provider: impl Into<String>, operation: TaskKind, tokens: u64, estimated_cost: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider: provider.into(),
            operation,
            tokens,
            estimated_cost,
            user_id: None,
            recorded_at: Utc::now(),
        }
    }

    /// Attribute to a user
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Destination for usage events
///
/// Recording is best-effort: callers log and drop any error.
pub trait UsageSink: Send + Sync {
    /// Record one event without blocking
    fn record(&self, event: &UsageEvent) -> anyhow::Result<()>;

    /// Cost-saving advice as of `now`
    ///
    /// Sinks that keep no history can only offer the general tips.
    fn recommendations(&self, _now: DateTime<Utc>) -> Vec<String> {
        general_recommendations()
    }
}

/// Routing advice that holds regardless of recorded usage
#[must_use]
pub fn general_recommendations() -> Vec<String> {
    [
        "Use Groq for quick validations and real-time suggestions",
        "Use Google Gemini for cost-effective general operations",
        "Reserve OpenAI GPT-4 for complex reasoning tasks",
        "Use Claude for final quality validation",
        "Keep caching enabled to avoid repeated provider calls",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Logs usage events through `tracing`
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingUsageSink;

impl UsageSink for TracingUsageSink {
    fn record(&self, event: &UsageEvent) -> anyhow::Result<()> {
        info!(
            target: "promptsmith::usage",
            provider = %event.provider,
            operation = %event.operation,
            tokens = event.tokens,
            estimated_cost = event.estimated_cost,
            "Usage recorded"
        );
        Ok(())
    }
}

/// Spending limits in USD
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostLimits {
    /// Per calendar day (UTC)
    pub daily: f64,
    /// Per calendar month (UTC)
    pub monthly: f64,
    /// Per user per calendar month
    pub per_user: f64,
}

impl Default for CostLimits {
    fn default() -> Self {
        Self {
            daily: 50.0,
            monthly: 1000.0,
            per_user: 100.0,
        }
    }
}

/// Which limit was exceeded
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LimitKind {
    /// Daily limit
    Daily,
    /// Monthly limit
    Monthly,
    /// Per-user limit
    PerUser,
}

/// Usage measured against the limits
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitCheck {
    /// No limit exceeded
    pub within_limits: bool,
    /// Spend today
    pub daily_usage: f64,
    /// Spend this month
    pub monthly_usage: f64,
    /// Spend this month by the given user
    pub user_usage: f64,
    /// Exceeded limits
    pub breached: Vec<LimitKind>,
    /// Limits applied
    pub limits: CostLimits,
}

/// Aggregated usage
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    /// Total USD
    pub total_cost: f64,
    /// Total tokens
    pub total_tokens: u64,
    /// Event count
    pub events: usize,
    /// USD by adapter name
    pub cost_by_provider: BTreeMap<String, f64>,
    /// USD by operation class
    pub cost_by_operation: BTreeMap<String, f64>,
}

/// Summary window
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UsagePeriod {
    /// Last 24 hours
    Day,
    /// Last 30 days
    Month,
    /// Everything still retained
    All,
}

/// Days of history a [`UsageLedger`] keeps
///
/// Covers both the rolling 30-day summary and the longest calendar month.
pub const USAGE_RETENTION_DAYS: i64 = 31;

/// In-process usage accumulator
///
/// Events older than [`USAGE_RETENTION_DAYS`] relative to the newest
/// recorded one are pruned on each write.
#[derive(Debug, Default)]
pub struct UsageLedger {
    events: Mutex<Vec<UsageEvent>>,
    limits: CostLimits,
}

impl UsageLedger {
    /// Ledger with default limits
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger with custom limits
    #[must_use]
    pub fn with_limits(limits: CostLimits) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            limits,
        }
    }

    /// Limits applied by [`Self::check_limits`]
    #[must_use]
    pub fn limits(&self) -> CostLimits {
        self.limits
    }

    /// Recorded events, oldest first
    #[must_use]
    pub fn events(&self) -> Vec<UsageEvent> {
        self.events.lock().clone()
    }

    /// Aggregate events in `period` ending at `now`
    #[must_use]
    pub fn summary(&self, period: UsagePeriod, now: DateTime<Utc>) -> UsageSummary {
        let since = match period {
            UsagePeriod::Day => Some(now - ChronoDuration::hours(24)),
            UsagePeriod::Month => Some(now - ChronoDuration::days(30)),
            UsagePeriod::All => None,
        };

        let events = self.events.lock();
        let mut summary = UsageSummary::default();
        for event in events
            .iter()
            .filter(|e| since.map_or(true, |s| e.recorded_at >= s))
        {
            summary.total_cost += event.estimated_cost;
            summary.total_tokens = summary.total_tokens.saturating_add(event.tokens);
            summary.events += 1;
            *summary
                .cost_by_provider
                .entry(event.provider.clone())
                .or_default() += event.estimated_cost;
            *summary
                .cost_by_operation
                .entry(event.operation.as_str().to_string())
                .or_default() += event.estimated_cost;
        }
        summary
    }

    /// Compare calendar-day and calendar-month spend against the limits
    #[must_use]
    pub fn check_limits(&self, user_id: Option<&str>, now: DateTime<Utc>) -> LimitCheck {
        let events = self.events.lock();
        let same_month = |e: &UsageEvent| {
            e.recorded_at.year() == now.year() && e.recorded_at.month() == now.month()
        };

        let daily_usage: f64 = events
            .iter()
            .filter(|e| e.recorded_at.date_naive() == now.date_naive())
            .map(|e| e.estimated_cost)
            .sum();
        let monthly_usage: f64 = events
            .iter()
            .filter(|e| same_month(*e))
            .map(|e| e.estimated_cost)
            .sum();
        let user_usage: f64 = user_id.map_or(0.0, |user| {
            events
                .iter()
                .filter(|e| same_month(*e) && e.user_id.as_deref() == Some(user))
                .map(|e| e.estimated_cost)
                .sum()
        });

        let mut breached = Vec::new();
        if daily_usage > self.limits.daily {
            breached.push(LimitKind::Daily);
        }
        if monthly_usage > self.limits.monthly {
            breached.push(LimitKind::Monthly);
        }
        if user_usage > self.limits.per_user {
            breached.push(LimitKind::PerUser);
        }

        LimitCheck {
            within_limits: breached.is_empty(),
            daily_usage,
            monthly_usage,
            user_usage,
            breached,
            limits: self.limits,
        }
    }

    /// Cost-saving advice based on recorded usage
    #[must_use]
    pub fn recommendations(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut tips = Vec::new();
        let check = self.check_limits(None, now);
        if check.daily_usage > self.limits.daily * 0.8 {
            tips.push(format!(
                "Daily spend ${:.2} is above 80% of the ${:.2} limit",
                check.daily_usage, self.limits.daily
            ));
        }

        let summary = self.summary(UsagePeriod::Month, now);
        if let Some((provider, cost)) = summary
            .cost_by_provider
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
        {
            if summary.total_cost > 0.0 && *cost / summary.total_cost > 0.5 {
                tips.push(format!(
                    "{provider} accounts for most spend this month; route quick checks to groq or google"
                ));
            }
        }

        tips.extend(general_recommendations());
        tips
    }
}

impl UsageSink for UsageLedger {
    /// Append `event`, dropping events too old for any summary or limit window
    fn record(&self, event: &UsageEvent) -> anyhow::Result<()> {
        let cutoff = event.recorded_at - ChronoDuration::days(USAGE_RETENTION_DAYS);
        let mut events = self.events.lock();
        events.retain(|e| e.recorded_at >= cutoff);
        events.push(event.clone());
        Ok(())
    }

    fn recommendations(&self, now: DateTime<Utc>) -> Vec<String> {
        UsageLedger::recommendations(self, now)
    }
}
