//! Provider-backed analysis and creative-text operations.

use serde_json::{Map, Value};

use atlas_providers::GenerationOptions;

use crate::plan::StepResult;
use crate::tasks::{generate, has_business_context, TaskContext, TaskFault};

/// Natural-language summary of retrieved graph data, scoped to the
/// goal. Output: `{analysis}`.
pub async fn analyze_and_summarize(
    ctx: &TaskContext,
    graph_data: &Value,
    goal: &str,
) -> Result<StepResult, TaskFault> {
    if graph_data.is_null() {
        return Ok(StepResult::fail("graph_data is missing or resolved to null"));
    }

    let rendered = render_graph_data(graph_data);
    if rendered.is_empty() {
        return Ok(StepResult::fail("graph_data contains no nodes to analyze"));
    }

    let prompt = format!(
        "Summarize and compare the following business-catalog data for this goal.\n\
         Goal: {goal}\n\
         Data:\n{rendered}\n\
         Keep the summary short and concrete."
    );

    match generate(ctx, &prompt, &GenerationOptions::default()).await? {
        Ok(analysis) => {
            let mut output = Map::new();
            output.insert("analysis".to_string(), Value::String(analysis.trim().to_string()));
            Ok(StepResult::ok(output))
        }
        Err(error) => Ok(StepResult::fail(format!("analysis generation failed: {error}"))),
    }
}

/// Open-ended suggestion text. Output: `{creative_content, suggestions}`.
pub async fn generate_creative_text(
    ctx: &TaskContext,
    prompt: &str,
    context: &Map<String, Value>,
) -> Result<StepResult, TaskFault> {
    let mut full_prompt = String::from(
        "Offer creative, concrete AI project suggestions for a business catalog assistant.\n",
    );
    full_prompt.push_str(&format!("Request: {prompt}\n"));
    for (key, value) in context {
        full_prompt.push_str(&format!("Context {key}: {value}\n"));
    }

    let mut options = GenerationOptions::default();
    options.temperature = 0.9;
    if has_business_context(context) {
        options = options.business();
    }

    match generate(ctx, &full_prompt, &options).await? {
        Ok(content) => {
            let suggestions: Vec<Value> = bullet_lines(&content)
                .into_iter()
                .take(5)
                .map(Value::String)
                .collect();
            let mut output = Map::new();
            output.insert("creative_content".to_string(), Value::String(content.trim().to_string()));
            output.insert("suggestions".to_string(), Value::Array(suggestions));
            Ok(StepResult::ok(output))
        }
        Err(error) => Ok(StepResult::fail(format!("creative generation failed: {error}"))),
    }
}

/// Compact, prompt-friendly rendering of `{nodes, edges}` graph data.
fn render_graph_data(graph_data: &Value) -> String {
    let mut lines = Vec::new();

    if let Some(nodes) = graph_data.get("nodes").and_then(Value::as_array) {
        for node in nodes {
            let kind = node.get("kind").and_then(Value::as_str).unwrap_or("node");
            let name = node.get("name").and_then(Value::as_str).unwrap_or("?");
            lines.push(format!("- {kind}: {name}"));
        }
    }
    if let Some(edges) = graph_data.get("edges").and_then(Value::as_array) {
        for edge in edges {
            let from = edge.get("from").and_then(Value::as_str).unwrap_or("?");
            let to = edge.get("to").and_then(Value::as_str).unwrap_or("?");
            let relationship = edge.get("relationship").and_then(Value::as_str).unwrap_or("?");
            lines.push(format!("- {from} -{relationship}-> {to}"));
        }
    }

    lines.join("\n")
}

fn bullet_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            let stripped = trimmed
                .strip_prefix("- ")
                .or_else(|| trimmed.strip_prefix("* "))
                .or_else(|| {
                    trimmed
                        .split_once(". ")
                        .filter(|(number, _)| number.chars().all(|ch| ch.is_ascii_digit()))
                        .map(|(_, rest)| rest)
                })?;
            let stripped = stripped.trim();
            (!stripped.is_empty()).then(|| stripped.to_string())
        })
        .collect()
}
