//! Clarification and terminal-answer formulation.
//!
//! Clarification must never itself hard-fail: when the provider pool is
//! unavailable the operation falls back to deterministic templated text.

use serde_json::{Map, Value};

use atlas_providers::GenerationOptions;

use crate::plan::StepResult;
use crate::tasks::{generate, TaskContext};

const MAX_SUGGESTIONS: usize = 3;

/// Build either a clarification question or, with
/// `provide_final_answer`, a terminal explanatory message plus whatever
/// data is available. Output: `{message, suggestions, is_final_answer,
/// available_data}`.
pub async fn clarify_with_user(
    ctx: &TaskContext,
    entity_issues: &[Value],
    corrected_entities: &[Value],
    conversation_state: Option<Value>,
    provide_final_answer: bool,
    available_data: Option<Value>,
) -> StepResult {
    let suggestions = collect_suggestions(entity_issues, corrected_entities);
    let template = if provide_final_answer {
        final_answer_template(entity_issues, &suggestions)
    } else {
        clarification_template(entity_issues, &suggestions)
    };

    // Generation improves the wording; the template is the guarantee.
    let message = polish_message(ctx, &template, conversation_state.as_ref())
        .await
        .unwrap_or(template);

    let mut output = Map::new();
    output.insert("message".to_string(), Value::String(message));
    output.insert(
        "suggestions".to_string(),
        Value::Array(suggestions.into_iter().map(Value::String).collect()),
    );
    output.insert("is_final_answer".to_string(), Value::Bool(provide_final_answer));
    output.insert("available_data".to_string(), available_data.unwrap_or(Value::Null));
    if !provide_final_answer {
        output.insert("needs_clarification".to_string(), Value::Bool(true));
    }
    StepResult::ok(output)
}

async fn polish_message(
    ctx: &TaskContext,
    template: &str,
    conversation_state: Option<&Value>,
) -> Option<String> {
    let mut prompt = format!(
        "Rewrite this assistant message so it reads naturally, without changing its meaning \
         or dropping any suggestion:\n{template}\n"
    );
    if let Some(state) = conversation_state {
        if !state.is_null() {
            prompt.push_str(&format!("Conversation so far: {state}\n"));
        }
    }

    // Cancellation still must not fail clarification; keep the template.
    match generate(ctx, &prompt, &GenerationOptions::default()).await {
        Ok(Ok(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    }
}

fn collect_suggestions(entity_issues: &[Value], corrected_entities: &[Value]) -> Vec<String> {
    let mut suggestions: Vec<String> = Vec::new();
    let mut push = |candidate: &str| {
        let trimmed = candidate.trim();
        if !trimmed.is_empty() && !suggestions.iter().any(|seen| seen == trimmed) {
            suggestions.push(trimmed.to_string());
        }
    };

    for corrected in corrected_entities {
        match corrected {
            Value::String(name) => push(name),
            Value::Object(map) => {
                if let Some(Value::String(name)) = map.get("name") {
                    push(name);
                }
            }
            _ => {}
        }
    }
    for issue in entity_issues {
        if let Some(Value::Array(names)) = issue.get("suggested_entities") {
            for name in names {
                if let Value::String(name) = name {
                    push(name);
                }
            }
        }
    }

    suggestions.truncate(MAX_SUGGESTIONS);
    suggestions
}

fn issue_names(entity_issues: &[Value]) -> Vec<String> {
    entity_issues
        .iter()
        .filter_map(|issue| {
            issue
                .get("entity_name")
                .or_else(|| issue.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .collect()
}

fn clarification_template(entity_issues: &[Value], suggestions: &[String]) -> String {
    let names = issue_names(entity_issues);
    let mut message = if names.is_empty() {
        "I could not match part of your question to the catalog.".to_string()
    } else {
        format!("I could not find {} in the catalog.", quote_list(&names))
    };
    if suggestions.is_empty() {
        message.push_str(" Could you rephrase or name the industry or sector you mean?");
    } else {
        message.push_str(&format!(" Did you mean {}?", quote_list(suggestions)));
    }
    message
}

fn final_answer_template(entity_issues: &[Value], suggestions: &[String]) -> String {
    let names = issue_names(entity_issues);
    let mut message = if names.is_empty() {
        "I was unable to resolve your request against the catalog.".to_string()
    } else {
        format!(
            "I was unable to find {} in the catalog after checking the closest candidates.",
            quote_list(&names)
        )
    };
    if suggestions.is_empty() {
        message.push_str(" Here is the closest information available instead.");
    } else {
        message.push_str(&format!(
            " The closest catalog entries are {}; I have included what is known about them.",
            quote_list(suggestions)
        ));
    }
    message
}

fn quote_list(names: &[String]) -> String {
    names.iter().map(|name| format!("'{name}'")).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use atlas_graph::MemoryGraphStore;
    use atlas_providers::{
        ErrorCategory, MockProvider, PoolConfig, ProviderError, ProviderPool,
    };
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn failing_ctx() -> TaskContext {
        // The provider never recovers, so every message falls back to the
        // deterministic template.
        let provider = Arc::new(MockProvider::with_responses(
            "mock",
            std::iter::repeat_with(|| {
                Err(ProviderError::new("mock", ErrorCategory::Unknown, "down"))
            })
            .take(16),
        ));
        TaskContext {
            graph: Arc::new(MemoryGraphStore::seeded()),
            pool: Arc::new(ProviderPool::new(vec![provider], PoolConfig::default())),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn clarification_carries_at_most_three_suggestions() {
        let ctx = failing_ctx();
        let issues = vec![json!({
            "entity_name": "Bnking",
            "suggested_entities": ["Banking", "Retail Banking", "Corporate Banking", "Payments"]
        })];

        let result = clarify_with_user(&ctx, &issues, &[], None, false, None).await;

        assert!(result.success);
        let output = result.output.unwrap();
        assert_eq!(output["needs_clarification"], json!(true));
        assert_eq!(output["is_final_answer"], json!(false));
        let suggestions = output["suggestions"].as_array().unwrap();
        assert_eq!(suggestions.len(), 3);
        assert_eq!(suggestions[0], json!("Banking"));
        assert!(output["message"].as_str().unwrap().contains("'Bnking'"));
    }

    #[tokio::test]
    async fn final_answer_is_terminal_and_keeps_available_data() {
        let ctx = failing_ctx();
        let issues = vec![json!({"entity_name": "Quantum Bank", "suggested_entities": ["Banking"]})];
        let data = json!({"nodes": [], "edges": []});

        let result = clarify_with_user(&ctx, &issues, &[], None, true, Some(data.clone())).await;

        let output = result.output.unwrap();
        assert_eq!(output["is_final_answer"], json!(true));
        assert!(output.get("needs_clarification").is_none());
        assert_eq!(output["available_data"], data);
        assert!(output["message"].as_str().unwrap().contains("'Banking'"));
    }

    #[tokio::test]
    async fn corrected_entities_take_precedence_in_suggestions() {
        let ctx = failing_ctx();
        let corrected = vec![json!("Insurance"), json!({"name": "Banking"})];
        let issues = vec![json!({"suggested_entities": ["Retail"]})];

        let result = clarify_with_user(&ctx, &issues, &corrected, None, false, None).await;

        let output = result.output.unwrap();
        assert_eq!(output["suggestions"], json!(["Insurance", "Banking", "Retail"]));
    }
}
