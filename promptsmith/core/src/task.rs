//! Units of work routed by the orchestrator
//!
//! A [`Task`] is built per call and never mutated afterwards; the payload
//! variant decides which adapter operation runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::CompletionRequest;

/// Operation class of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Plain completion
    Completion,
    /// Prompt rewrite
    Enhancement,
    /// Prompt grading
    Scoring,
    /// Streamed completion
    Streaming,
}

impl TaskKind {
    /// Lowercase label used in logs and usage events
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completion => "completion",
            Self::Enhancement => "enhancement",
            Self::Scoring => "scoring",
            Self::Streaming => "streaming",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Background work
    Low,
    /// Default
    #[default]
    Normal,
    /// Interactive work where latency matters
    High,
}

/// What the task carries
#[derive(Clone, Debug, PartialEq)]
pub enum TaskPayload {
    /// Completion request
    Completion(CompletionRequest),
    /// Streaming request
    Streaming(CompletionRequest),
    /// Prompt to enhance
    Enhancement {
        /// Base prompt
        prompt: String,
        /// Optional project context
        context: Option<Value>,
    },
    /// Prompt to score
    Scoring {
        /// Prompt under review
        prompt: String,
        /// Optional project context
        context: Option<Value>,
    },
}

/// A routed unit of work
#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    priority: TaskPriority,
    cost_sensitive: bool,
    quality_required: u8,
    payload: TaskPayload,
}

impl Task {
    fn new(payload: TaskPayload) -> Self {
        Self {
            priority: TaskPriority::Normal,
            cost_sensitive: false,
            quality_required: 0,
            payload,
        }
    }

    /// Completion task
    #[must_use]
    pub fn completion(request: CompletionRequest) -> Self {
        Self::new(TaskPayload::Completion(request))
    }

    /// Streaming task
    #[must_use]
    pub fn streaming(request: CompletionRequest) -> Self {
        Self::new(TaskPayload::Streaming(request))
    }

    /// Enhancement task
    pub fn enhancement(prompt: impl Into<String>, context: Option<Value>) -> Self {
        Self::new(TaskPayload::Enhancement {
            prompt: prompt.into(),
            context,
        })
    }

    /// Scoring task
    pub fn scoring(prompt: impl Into<String>, context: Option<Value>) -> Self {
        Self::new(TaskPayload::Scoring {
            prompt: prompt.into(),
            context,
        })
    }

    /// Set priority
    #[must_use]
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Mark as cost sensitive
    #[must_use]
    pub fn cost_sensitive(mut self, cost_sensitive: bool) -> Self {
        self.cost_sensitive = cost_sensitive;
        self
    }

    /// Required quality, clamped to 100
    #[must_use]
    pub fn with_quality_required(mut self, quality: u8) -> Self {
        self.quality_required = quality.min(100);
        self
    }

    /// Operation class
    #[must_use]
    pub fn kind(&self) -> TaskKind {
        match self.payload {
            TaskPayload::Completion(_) => TaskKind::Completion,
            TaskPayload::Streaming(_) => TaskKind::Streaming,
            TaskPayload::Enhancement { .. } => TaskKind::Enhancement,
            TaskPayload::Scoring { .. } => TaskKind::Scoring,
        }
    }

    /// Priority
    #[must_use]
    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    /// Whether cost should weigh in selection
    #[must_use]
    pub fn is_cost_sensitive(&self) -> bool {
        self.cost_sensitive
    }

    /// Required quality, 0–100
    #[must_use]
    pub fn quality_required(&self) -> u8 {
        self.quality_required
    }

    /// Payload
    #[must_use]
    pub fn payload(&self) -> &TaskPayload {
        &self.payload
    }
}
