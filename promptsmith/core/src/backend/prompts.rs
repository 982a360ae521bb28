//! Instruction templates shared by every adapter's scoring and enhancement calls

use serde_json::Value;

/// System message for enhancement calls
pub const ENHANCEMENT_SYSTEM: &str =
    "You are an expert at creating highly effective prompts for AI coding assistants.";

/// System message for scoring calls
pub const SCORING_SYSTEM: &str =
    "You are a strict reviewer of prompts for AI coding assistants. Reply with JSON only.";

/// Build the request that asks a model to rewrite `base_prompt`
#[must_use]
pub fn enhancement_prompt(base_prompt: &str, context: Option<&Value>) -> String {
    let context_line = render_context(context)
        .map(|c| format!("Additional context: {c}\n\n"))
        .unwrap_or_default();
    format!(
        "I need you to enhance this prompt to make it exceptional:\n\n\
         \"\"\"\n{base_prompt}\n\"\"\"\n\n\
         {context_line}\
         Please enhance this prompt by:\n\
         1. Adding precise technical specifications\n\
         2. Clarifying ambiguous requirements\n\
         3. Including relevant constraints and edge cases\n\
         4. Specifying the expected output format and structure\n\
         5. Adding security and performance considerations\n\
         6. Ensuring it follows best practices for the technology stack\n\n\
         Return ONLY the enhanced prompt text, without any explanation or commentary."
    )
}

/// Build the request that asks a model to grade `prompt`
#[must_use]
pub fn scoring_prompt(prompt: &str, context: Option<&Value>) -> String {
    let context_line = render_context(context)
        .map(|c| format!("Project context: {c}\n\n"))
        .unwrap_or_default();
    format!(
        "Please analyze this prompt for an AI coding assistant and provide a detailed quality assessment.\n\n\
         Prompt to analyze:\n\"\"\"\n{prompt}\n\"\"\"\n\n\
         {context_line}\
         Evaluate the prompt on these criteria (0-100 each):\n\
         1. Clarity: Is the prompt clear, specific, and unambiguous?\n\
         2. Completeness: Does it include all necessary information and context?\n\
         3. Technical Accuracy: Are technical requirements and terminology correct?\n\
         4. Best Practices: Does it encourage secure, maintainable, and efficient code?\n\n\
         Provide your response in JSON format:\n\
         {{\n  \"overall\": <weighted average 0-100>,\n  \"clarity\": <0-100>,\n  \
         \"completeness\": <0-100>,\n  \"technicalAccuracy\": <0-100>,\n  \
         \"bestPractices\": <0-100>,\n  \"feedback\": [\"<specific actionable improvement>\", ...]\n}}"
    )
}

/// Build the request for follow-up questions about a project
#[must_use]
pub fn follow_up_prompt(answers: &Value, current_prompt: &str) -> String {
    format!(
        "Based on these project answers:\n{answers}\n\n\
         And this current prompt:\n{current_prompt}\n\n\
         Generate 3 follow-up questions that would help clarify requirements or fill gaps.\n\
         Focus on technical details, edge cases, and implementation specifics.\n\n\
         Return as JSON array of strings."
    )
}

fn render_context(context: Option<&Value>) -> Option<String> {
    match context? {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_enhancement_prompt_embeds_context() {
        let text = enhancement_prompt("Build a login form", Some(&json!({"framework": "React"})));
        assert!(text.contains("Build a login form"));
        assert!(text.contains(r#"Additional context: {"framework":"React"}"#));
    }

    #[test]
    fn test_empty_context_is_omitted() {
        let text = enhancement_prompt("x", Some(&json!({})));
        assert!(!text.contains("Additional context"));
        let text = scoring_prompt("x", None);
        assert!(!text.contains("Project context"));
        assert!(text.contains("\"technicalAccuracy\""));
    }
}
