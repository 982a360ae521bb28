//! Quality scores and advisory outcomes
//!
//! Scoring and enhancement are advisory: a provider that answers with
//! something unparseable still yields a usable value. Both outcomes are
//! tagged so callers can tell a real result from a default.

use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::UpstreamError;

/// Neutral score used when a provider reply cannot be parsed
pub const UNPARSEABLE_SCORE: f64 = 75.0;

/// Default for a dimension the provider left out, and for scoring with no responders
pub const NEUTRAL_SCORE: f64 = 70.0;

/// Five-dimension quality assessment, each dimension in `[0, 100]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityScore {
    /// Overall score
    pub overall: f64,
    /// How unambiguous the prompt is
    pub clarity: f64,
    /// Whether all needed information is present
    pub completeness: f64,
    /// Technical correctness
    pub technical_accuracy: f64,
    /// Adherence to industry practice
    pub best_practices: f64,
    /// Free-text remarks, in the order produced
    pub feedback: Vec<String>,
}

impl QualityScore {
    /// Build a score, clamping every dimension to `[0, 100]`
    #[must_use]
    pub fn new(
        overall: f64,
        clarity: f64,
        completeness: f64,
        technical_accuracy: f64,
        best_practices: f64,
        feedback: Vec<String>,
    ) -> Self {
        Self {
            overall: clamp_dimension(overall),
            clarity: clamp_dimension(clarity),
            completeness: clamp_dimension(completeness),
            technical_accuracy: clamp_dimension(technical_accuracy),
            best_practices: clamp_dimension(best_practices),
            feedback,
        }
    }

    /// Same value in every dimension
    #[must_use]
    pub fn uniform(value: f64, feedback: Vec<String>) -> Self {
        Self::new(value, value, value, value, value, feedback)
    }

    /// Zero baseline that any real score beats
    #[must_use]
    pub fn zero() -> Self {
        Self::uniform(0.0, Vec::new())
    }

    /// Average each dimension across `scores`, concatenating feedback
    ///
    /// Returns `None` for an empty slice.
    #[must_use]
    pub fn average(scores: &[QualityScore]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }
        let n = scores.len() as f64;
        let mean = |f: fn(&QualityScore) -> f64| scores.iter().map(f).sum::<f64>() / n;
        Some(Self::new(
            mean(|s| s.overall),
            mean(|s| s.clarity),
            mean(|s| s.completeness),
            mean(|s| s.technical_accuracy),
            mean(|s| s.best_practices),
            scores.iter().flat_map(|s| s.feedback.clone()).collect(),
        ))
    }

    /// Dimensions other than `overall`, with display labels
    #[must_use]
    pub fn dimensions(&self) -> [(&'static str, f64); 4] {
        [
            ("clarity", self.clarity),
            ("completeness", self.completeness),
            ("technicalAccuracy", self.technical_accuracy),
            ("bestPractices", self.best_practices),
        ]
    }
}

fn clamp_dimension(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

// =============================================================================
// Tagged outcomes
// =============================================================================

/// Result of asking one provider to score a prompt
#[derive(Clone, Debug, PartialEq)]
pub enum ScoreOutcome {
    /// The provider returned parseable structured output
    Scored(QualityScore),
    /// Output was unusable; a neutral default stands in
    Defaulted(QualityScore),
}

impl ScoreOutcome {
    /// The score regardless of how it was obtained
    #[must_use]
    pub fn score(&self) -> &QualityScore {
        match self {
            Self::Scored(s) | Self::Defaulted(s) => s,
        }
    }

    /// Consume into the score
    #[must_use]
    pub fn into_score(self) -> QualityScore {
        match self {
            Self::Scored(s) | Self::Defaulted(s) => s,
        }
    }

    /// Whether this is a real score
    #[must_use]
    pub fn is_scored(&self) -> bool {
        matches!(self, Self::Scored(_))
    }
}

/// Result of asking one provider to enhance a prompt
#[derive(Clone, Debug, PartialEq)]
pub enum Enhancement {
    /// Rewritten prompt
    Enhanced(String),
    /// The base prompt, returned because the provider call failed
    Unchanged {
        /// Base prompt
        text: String,
        /// Why enhancement did not happen
        error: UpstreamError,
    },
}

impl Enhancement {
    /// Text to continue with
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Enhanced(t) | Self::Unchanged { text: t, .. } => t,
        }
    }

    /// Consume into the text
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Enhanced(t) | Self::Unchanged { text: t, .. } => t,
        }
    }

    /// The failure behind an unchanged result
    #[must_use]
    pub fn error(&self) -> Option<&UpstreamError> {
        match self {
            Self::Enhanced(_) => None,
            Self::Unchanged { error, .. } => Some(error),
        }
    }
}

// =============================================================================
// Reply parsing
// =============================================================================

/// Scoring reply as providers actually send it
///
/// Dimensions may arrive as numbers or numeric strings, and `feedback` as
/// an array, a lone string, or `null`. Anything unusable falls back per
/// field instead of failing the whole reply.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScore {
    #[serde(default, deserialize_with = "lenient_number")]
    overall: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    clarity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    completeness: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    technical_accuracy: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    best_practices: Option<f64>,
    #[serde(default, deserialize_with = "lenient_feedback")]
    feedback: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
    Other(IgnoredAny),
}

fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(n) => Some(n),
        NumberOrText::Text(text) => text
            .trim()
            .trim_end_matches('%')
            .trim_end()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite()),
        NumberOrText::Other(_) => None,
    })
}

fn lenient_feedback<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Value::String(text) if !text.trim().is_empty() => vec![text],
        _ => Vec::new(),
    })
}

/// Parse a provider's scoring reply
///
/// The JSON object is taken from the first `{` to the last `}` so replies
/// wrapped in prose or code fences still parse. Missing dimensions default
/// to [`NEUTRAL_SCORE`].
#[must_use]
pub fn parse_score_reply(reply: &str) -> ScoreOutcome {
    let parsed = extract_json_object(reply).and_then(|s| serde_json::from_str::<RawScore>(s).ok());
    match parsed {
        Some(raw) => ScoreOutcome::Scored(QualityScore::new(
            raw.overall.unwrap_or(NEUTRAL_SCORE),
            raw.clarity.unwrap_or(NEUTRAL_SCORE),
            raw.completeness.unwrap_or(NEUTRAL_SCORE),
            raw.technical_accuracy.unwrap_or(NEUTRAL_SCORE),
            raw.best_practices.unwrap_or(NEUTRAL_SCORE),
            raw.feedback,
        )),
        None => ScoreOutcome::Defaulted(QualityScore::uniform(
            UNPARSEABLE_SCORE,
            vec!["Unable to parse detailed scoring".to_string()],
        )),
    }
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
