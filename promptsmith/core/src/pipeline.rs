//! Enhancement Pipeline
//!
//! Turns a raw prompt plus the user's free-form answers into a finished
//! prompt:
//!
//! 1. Context analysis ([`analyze_context`])
//! 2. Best-practice injection ([`inject_best_practices`])
//! 3. AI enhancement through [`Orchestrator::optimize_prompt`]
//! 4. Target formatting ([`format_for_target`])
//! 5. Final validation re-score
//! 6. Improvement diffing ([`identify_improvements`])
//!
//! The pipeline works with zero adapters; every AI stage degrades to a
//! neutral result instead of failing.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::backend::{prompts, CompletionRequest};
use crate::cache::OperationClass;
use crate::orchestrator::Orchestrator;
use crate::quality::{QualityScore, NEUTRAL_SCORE};

/// Minimum score for [`EnhancementPipeline::validate_quality`] to pass
pub const VALIDATION_THRESHOLD: f64 = 75.0;

/// Feedback on the degraded result when AI enhancement is unavailable
pub const AI_UNAVAILABLE_FEEDBACK: &str = "AI enhancement not available";

/// Provider reported on the degraded result
pub const NO_PROVIDER: &str = "none";

const MAX_IMPROVEMENTS: usize = 10;
const MAX_FOLLOW_UPS: usize = 3;
const LENGTH_GROWTH_FACTOR: f64 = 1.2;
const STRENGTH_THRESHOLD: f64 = 80.0;

// ============================================================================
// Context analysis
// ============================================================================

/// Project facts extracted from the answers
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancementContext {
    /// `projectType` answer, `general` when absent
    pub project_type: String,
    /// Frameworks, databases, extra tech
    pub technologies: Vec<String>,
    /// Timeline, budget, performance
    pub constraints: Vec<String>,
    /// Practices for the project type
    pub best_practices: Vec<String>,
    /// Auth and compliance
    pub security_requirements: Vec<String>,
}

/// Answer keys copied into `technologies`
const TECHNOLOGY_KEYS: [&str; 2] = ["framework", "database"];

/// Answer key holding a list of extra technologies
const ADDITIONAL_TECH_KEY: &str = "additionalTech";

/// Answer key and label for each constraint
const CONSTRAINT_RULES: [(&str, &str); 3] = [
    ("timeline", "Timeline"),
    ("budget", "Budget"),
    ("performanceTarget", "Performance"),
];

/// Answer key and label for each security requirement
const SECURITY_RULES: [(&str, &str); 2] = [("authentication", "Auth"), ("compliance", "Compliance")];

const REST_API_PRACTICES: [&str; 4] = [
    "Follow RESTful conventions",
    "Implement proper error handling",
    "Use pagination for list endpoints",
    "Include request/response validation",
];

const ECOMMERCE_PRACTICES: [&str; 4] = [
    "Implement secure payment processing",
    "Follow PCI DSS compliance",
    "Optimize for mobile devices",
    "Implement proper SEO structure",
];

/// Best practices for a project type; empty for unknown types
#[must_use]
pub fn best_practices_for(project_type: &str) -> &'static [&'static str] {
    match project_type {
        "REST API" => &REST_API_PRACTICES,
        "E-commerce Website" => &ECOMMERCE_PRACTICES,
        _ => &[],
    }
}

/// Render a scalar answer; blanks, nulls, and `false` count as absent
fn answer_text(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Extract project facts from a free-form answer map
///
/// Non-object answers are treated as empty.
#[must_use]
pub fn analyze_context(answers: &Value) -> EnhancementContext {
    let empty = Map::new();
    let answers = answers.as_object().unwrap_or(&empty);
    let text = |key: &str| answers.get(key).and_then(answer_text);

    let project_type = text("projectType").unwrap_or_else(|| "general".to_string());

    let mut technologies: Vec<String> = TECHNOLOGY_KEYS.iter().filter_map(|k| text(*k)).collect();
    match answers.get(ADDITIONAL_TECH_KEY) {
        Some(Value::Array(items)) => technologies.extend(items.iter().filter_map(answer_text)),
        Some(other) => technologies.extend(answer_text(other)),
        None => {}
    }

    let labelled = |rules: &[(&str, &str)]| -> Vec<String> {
        rules
            .iter()
            .filter_map(|(key, label)| text(*key).map(|v| format!("{label}: {v}")))
            .collect()
    };

    EnhancementContext {
        best_practices: best_practices_for(&project_type)
            .iter()
            .map(|p| (*p).to_string())
            .collect(),
        project_type,
        technologies,
        constraints: labelled(&CONSTRAINT_RULES),
        security_requirements: labelled(&SECURITY_RULES),
    }
}

// ============================================================================
// Text stages
// ============================================================================

fn bullet_section(heading: &str, items: &[String]) -> String {
    let bullets: Vec<String> = items.iter().map(|i| format!("- {i}")).collect();
    format!("\n\n## {heading}\n{}", bullets.join("\n"))
}

/// Append best-practice and security sections the prompt does not already have
#[must_use]
pub fn inject_best_practices(prompt: &str, context: &EnhancementContext) -> String {
    let mut out = prompt.to_string();
    if !context.best_practices.is_empty() && !prompt.contains("Best Practices") {
        out.push_str(&bullet_section("Best Practices to Follow", &context.best_practices));
    }
    if !context.security_requirements.is_empty() && !prompt.contains("Security Requirements") {
        out.push_str(&bullet_section(
            "Security Requirements",
            &context.security_requirements,
        ));
    }
    out
}

/// Wrap a prompt in the style the target model responds to best
///
/// `claude` gets a `<task>` block, `gpt-4` an expert-role preamble; anything
/// else is returned unchanged.
#[must_use]
pub fn format_for_target(prompt: &str, target: Option<&str>) -> String {
    match target {
        Some("claude") => format!(
            "<task>\n{prompt}\n</task>\n\n\
             Please provide a comprehensive solution following all requirements above."
        ),
        Some("gpt-4") => format!(
            "You are an expert software architect and developer.\n\n\
             {prompt}\n\n\
             Provide a detailed, production-ready implementation."
        ),
        _ => prompt.to_string(),
    }
}

/// Headers whose first appearance is reported as an added section
const TRACKED_SECTIONS: [&str; 5] = [
    "Requirements",
    "Best Practices",
    "Constraints",
    "Security",
    "Performance",
];

/// Strength reported for each dimension scoring above 80
const STRENGTHS: [(&str, &str); 4] = [
    ("clarity", "Improved clarity and specificity"),
    ("completeness", "Ensured comprehensive coverage"),
    ("technicalAccuracy", "Enhanced technical accuracy"),
    ("bestPractices", "Incorporated industry best practices"),
];

/// Describe what changed between `original` and `enhanced`
///
/// At most ten entries.
#[must_use]
pub fn identify_improvements(original: &str, enhanced: &str, score: &QualityScore) -> Vec<String> {
    let mut improvements = Vec::new();

    let original_len = original.chars().count() as f64;
    if enhanced.chars().count() as f64 > original_len * LENGTH_GROWTH_FACTOR {
        improvements.push("Added more detail and context".to_string());
    }

    for section in TRACKED_SECTIONS {
        if !original.contains(section) && enhanced.contains(section) {
            improvements.push(format!("Added {section} section"));
        }
    }

    improvements.extend(score.feedback.iter().take(3).cloned());

    for (label, value) in score.dimensions() {
        if value > STRENGTH_THRESHOLD {
            if let Some((_, strength)) = STRENGTHS.iter().find(|(l, _)| *l == label) {
                improvements.push((*strength).to_string());
            }
        }
    }

    improvements.truncate(MAX_IMPROVEMENTS);
    improvements
}

// ============================================================================
// Results
// ============================================================================

/// Timing and provenance of an enhancement
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancementMetadata {
    /// Wall-clock time of the whole pipeline
    pub enhancement_time_ms: u64,
    /// Adapters consulted
    pub providers_used: Vec<String>,
    /// Estimated cost of sending the final prompt
    pub cost_estimate: f64,
}

/// Output of [`EnhancementPipeline::enhance`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancementResult {
    /// Prompt as given
    pub original: String,
    /// Final prompt
    pub enhanced: String,
    /// Final score
    pub quality: QualityScore,
    /// Adapter credited with the enhancement, `none` when degraded
    pub provider: String,
    /// Human-readable list of changes
    pub improvements: Vec<String>,
    /// Timing and provenance
    pub metadata: EnhancementMetadata,
}

/// Output of [`EnhancementPipeline::validate_quality`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// Whether `score.overall` reaches the threshold
    pub is_valid: bool,
    /// Score
    pub score: QualityScore,
    /// Suggestions for weak dimensions, then the score's feedback
    pub suggestions: Vec<String>,
}

/// Kind of answer a follow-up question expects
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuestionType {
    /// Free text
    #[default]
    Text,
    /// Pick from options
    Select,
    /// Yes/no
    Boolean,
}

/// A question to ask the user next
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpQuestion {
    /// Question
    pub question_text: String,
    /// Expected answer kind
    #[serde(default)]
    pub question_type: QuestionType,
    /// Hint shown under the question
    #[serde(default)]
    pub help_text: String,
}

impl FollowUpQuestion {
    fn text(question: &str, help: &str) -> Self {
        Self {
            question_text: question.to_string(),
            question_type: QuestionType::Text,
            help_text: help.to_string(),
        }
    }
}

/// Questions used when no backend can suggest any
#[must_use]
pub fn default_follow_up_questions() -> Vec<FollowUpQuestion> {
    vec![
        FollowUpQuestion::text(
            "What are the performance requirements for this project?",
            "Specify any performance targets or constraints",
        ),
        FollowUpQuestion::text(
            "Are there any specific security requirements?",
            "List any security considerations or compliance needs",
        ),
        FollowUpQuestion::text(
            "What is the expected timeline for this project?",
            "Provide the project timeline or deadline",
        ),
    ]
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SuggestedQuestion {
    Plain(String),
    Full(FollowUpQuestion),
}

/// Pull up to three questions out of a model reply
///
/// Accepts a JSON array of strings or of question objects, located between
/// the first `[` and the last `]`.
fn parse_follow_ups(reply: &str) -> Option<Vec<FollowUpQuestion>> {
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    if end < start {
        return None;
    }
    let parsed: Vec<SuggestedQuestion> = serde_json::from_str(&reply[start..=end]).ok()?;
    let questions: Vec<FollowUpQuestion> = parsed
        .into_iter()
        .map(|q| match q {
            SuggestedQuestion::Plain(text) => FollowUpQuestion::text(&text, ""),
            SuggestedQuestion::Full(question) => question,
        })
        .filter(|q| !q.question_text.trim().is_empty())
        .take(MAX_FOLLOW_UPS)
        .collect();
    (!questions.is_empty()).then_some(questions)
}

// ============================================================================
// Pipeline
// ============================================================================

/// Context analysis, AI enhancement, and validation over an [`Orchestrator`]
#[derive(Clone, Debug)]
pub struct EnhancementPipeline {
    orchestrator: Arc<Orchestrator>,
}

impl EnhancementPipeline {
    /// Create over a shared orchestrator
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Underlying orchestrator
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Run every stage; never fails
    ///
    /// `target_quality` defaults to the orchestrator's configured target.
    /// The `targetAI` answer selects target formatting.
    pub async fn enhance(
        &self,
        base_prompt: &str,
        answers: &Value,
        target_quality: Option<f64>,
    ) -> EnhancementResult {
        let started = Instant::now();
        let target =
            target_quality.unwrap_or(self.orchestrator.config().default_target_quality);

        let context = analyze_context(answers);
        let context_value = serde_json::to_value(&context).unwrap_or(Value::Null);
        let injected = inject_best_practices(base_prompt, &context);
        debug!(
            project_type = %context.project_type,
            technologies = context.technologies.len(),
            "Context analyzed"
        );

        let (mut enhanced, step_quality, provider, providers_used) = match self
            .orchestrator
            .optimize_prompt(&injected, &context_value, target)
            .await
        {
            Ok(optimized) => (
                optimized.enhanced,
                optimized.quality,
                optimized.provider,
                optimized.providers_used,
            ),
            Err(e) => {
                warn!(error = %e, "AI enhancement skipped");
                (
                    injected,
                    QualityScore::uniform(NEUTRAL_SCORE, vec![AI_UNAVAILABLE_FEEDBACK.to_string()]),
                    NO_PROVIDER.to_string(),
                    self.orchestrator.available_providers(),
                )
            }
        };

        let target_ai = answers.get("targetAI").and_then(Value::as_str);
        enhanced = format_for_target(&enhanced, target_ai);

        let outcome = self
            .orchestrator
            .score_outcome(&enhanced, Some(&context_value))
            .await;
        let quality = if outcome.is_scored() {
            outcome.into_score()
        } else {
            debug!("Final validation defaulted, keeping enhancement score");
            step_quality
        };

        let improvements = identify_improvements(base_prompt, &enhanced, &quality);
        let cost_estimate = self.orchestrator.estimate_cost(&enhanced, None);
        let enhancement_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            provider = %provider,
            overall = quality.overall,
            improvements = improvements.len(),
            elapsed_ms = enhancement_time_ms,
            "Enhancement complete"
        );

        EnhancementResult {
            original: base_prompt.to_string(),
            enhanced,
            quality,
            provider,
            improvements,
            metadata: EnhancementMetadata {
                enhancement_time_ms,
                providers_used,
                cost_estimate,
            },
        }
    }

    /// Score a prompt and suggest fixes for weak dimensions
    pub async fn validate_quality(&self, prompt: &str, context: Option<&Value>) -> ValidationReport {
        let score = self.orchestrator.score_prompt_quality(prompt, context).await;

        let mut suggestions: Vec<String> = [
            (score.clarity, "Improve clarity by being more specific about requirements"),
            (
                score.completeness,
                "Add missing information about architecture, testing, or deployment",
            ),
            (score.technical_accuracy, "Review technical specifications for accuracy"),
            (score.best_practices, "Include more industry best practices and standards"),
        ]
        .into_iter()
        .filter(|(value, _)| *value < VALIDATION_THRESHOLD)
        .map(|(_, suggestion)| suggestion.to_string())
        .collect();
        suggestions.extend(score.feedback.iter().cloned());

        ValidationReport {
            is_valid: score.overall >= VALIDATION_THRESHOLD,
            score,
            suggestions,
        }
    }

    /// Ask a backend for up to three questions that would sharpen the prompt
    ///
    /// Falls back to [`default_follow_up_questions`] when no backend is
    /// configured or the reply cannot be parsed. Suggestions are cached.
    pub async fn follow_up_questions(
        &self,
        answers: &Value,
        current_prompt: &str,
    ) -> Vec<FollowUpQuestion> {
        if self.orchestrator.available_providers().is_empty() {
            warn!("No AI providers configured, returning default follow-up questions");
            return default_follow_up_questions();
        }

        let cache = self.orchestrator.cache();
        let params = json!({"answers": answers, "currentPrompt": current_prompt});
        if let Ok(Some(hit)) = cache.get::<_, Vec<FollowUpQuestion>>(OperationClass::Suggestions, &params) {
            return hit;
        }

        let request = CompletionRequest::new(prompts::follow_up_prompt(answers, current_prompt));
        let reply = match self.orchestrator.execute(&request, None).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Follow-up generation failed, using defaults");
                return default_follow_up_questions();
            }
        };

        match parse_follow_ups(&reply.content) {
            Some(questions) => {
                if let Err(e) = cache.set(OperationClass::Suggestions, &params, &questions, None) {
                    warn!(error = %e, "Follow-up questions not cached");
                }
                questions
            }
            None => {
                warn!(provider = %reply.provider, "Follow-up reply was not a question list, using defaults");
                default_follow_up_questions()
            }
        }
    }
}
