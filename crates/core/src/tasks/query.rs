//! Query synthesis and execution.

use serde_json::{Map, Value};
use tracing::debug;

use atlas_graph::{GraphError, GraphStore};
use atlas_providers::GenerationOptions;

use crate::plan::StepResult;
use crate::tasks::{generate, has_business_context, string_param, TaskContext, TaskFault};

/// Prompt the provider pool to synthesize one read query from a
/// natural-language goal and entity hints. Output: `{query, params}`.
pub async fn generate_query(
    ctx: &TaskContext,
    goal: &str,
    entities: &[Value],
    context: &Map<String, Value>,
) -> Result<StepResult, TaskFault> {
    let hints: Vec<String> = entities
        .iter()
        .filter_map(string_param)
        .collect();

    let mut prompt = String::from(
        "Write a single read-only graph query over a business catalog with node labels \
         Industry, Sector, Department, PainPoint, AiProject and relationships HAS_SECTOR, \
         HAS_DEPARTMENT, FACES, ADDRESSED_BY.\n",
    );
    prompt.push_str(&format!("Goal: {goal}\n"));
    if !hints.is_empty() {
        prompt.push_str(&format!("Entities of interest: {}\n", hints.join(", ")));
    }
    for (key, value) in context {
        prompt.push_str(&format!("Context {key}: {value}\n"));
    }
    prompt.push_str("Respond with the query text only.");

    let mut options = GenerationOptions::default();
    if has_business_context(context) {
        options = options.business();
    }

    let generated = match generate(ctx, &prompt, &options).await? {
        Ok(text) => text,
        Err(error) => return Ok(StepResult::fail(format!("query generation failed: {error}"))),
    };

    let query = strip_code_fences(&generated);
    if query.is_empty() {
        return Ok(StepResult::fail("query generation returned empty text"));
    }

    let mut output = Map::new();
    output.insert("query".to_string(), Value::String(query));
    output.insert("params".to_string(), Value::Object(Map::new()));
    Ok(StepResult::ok(output))
}

/// Run a query against the graph store. Output: `{graph_data,
/// node_count, edge_count, filtered_entities}`.
///
/// A failed query that still has multiple clauses gets one automatic
/// simplification retry (trailing clauses dropped) before surfacing an
/// execution error.
pub async fn execute_query(
    graph: &dyn GraphStore,
    query: &Value,
    query_params: Option<Value>,
) -> Result<StepResult, TaskFault> {
    let Some(query) = string_param(query) else {
        return Ok(StepResult::fail("query is missing or resolved to null"));
    };
    let params = match query_params {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };

    let outcome = match graph.run_query(&query, &params).await {
        Ok(outcome) => outcome,
        Err(GraphError::QueryFailed(reason)) => {
            let Some(simplified) = simplify_query(&query) else {
                return Ok(StepResult::fail(format!("execution_error: {reason}")));
            };
            debug!(
                event_name = "tasks.execute_query.simplified_retry",
                "query failed, retrying a simplified form"
            );
            match graph.run_query(&simplified, &params).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    return Ok(StepResult::fail(format!("execution_error: {error}")));
                }
            }
        }
        Err(error) => return Ok(StepResult::fail(format!("execution_error: {error}"))),
    };

    let graph_data = serde_json::to_value(&outcome.data)
        .map_err(|error| TaskFault::Internal(format!("could not serialize graph data: {error}")))?;

    let mut output = Map::new();
    output.insert("graph_data".to_string(), graph_data);
    output.insert("node_count".to_string(), Value::from(outcome.data.node_count()));
    output.insert("edge_count".to_string(), Value::from(outcome.data.edge_count()));
    output.insert(
        "filtered_entities".to_string(),
        Value::Array(outcome.filtered_entities.into_iter().map(Value::String).collect()),
    );
    Ok(StepResult::ok(output))
}

/// Drop trailing clauses from a multi-clause query; `None` when there is
/// nothing left to simplify.
fn simplify_query(query: &str) -> Option<String> {
    for separator in [" AND ", " and ", " WHERE ", " where "] {
        if let Some(position) = query.find(separator) {
            let simplified = query[..position].trim();
            if !simplified.is_empty() && simplified != query.trim() {
                return Some(simplified.to_string());
            }
        }
    }
    None
}

/// Strip markdown code fences and an optional language tag from
/// generated query text.
pub(crate) fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };

    let rest = rest.strip_suffix("```").unwrap_or(rest);
    let mut lines = rest.lines();
    let first = lines.next().unwrap_or_default();
    // A bare language tag on the fence line is not part of the query.
    let keep_first = first.contains(' ') || first.contains('(');
    let mut kept: Vec<&str> = Vec::new();
    if keep_first && !first.trim().is_empty() {
        kept.push(first);
    }
    kept.extend(lines);
    kept.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_graph::MemoryGraphStore;
    use serde_json::json;

    #[tokio::test]
    async fn execute_query_reports_counts_and_filtered_names() {
        let graph = MemoryGraphStore::seeded();
        let result = execute_query(
            &graph,
            &json!("MATCH (i:Industry {name: 'Banking'})-->(s) RETURN i, s"),
            None,
        )
        .await
        .unwrap();

        assert!(result.success);
        let output = result.output.unwrap();
        assert!(output["node_count"].as_u64().unwrap() >= 2);
        assert_eq!(output["filtered_entities"], json!(["Banking"]));
    }

    #[tokio::test]
    async fn zero_match_query_succeeds_with_empty_data() {
        let graph = MemoryGraphStore::seeded();
        let result = execute_query(
            &graph,
            &json!("MATCH (i:Industry {name: 'Quantum Bank'}) RETURN i"),
            None,
        )
        .await
        .unwrap();

        assert!(result.success);
        let output = result.output.unwrap();
        assert_eq!(output["node_count"], json!(0));
        assert_eq!(output["filtered_entities"], json!(["Quantum Bank"]));
    }

    #[tokio::test]
    async fn malformed_query_gets_one_simplification_retry() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        use atlas_graph::{matching::NodeMatch, EntityKind, GraphPath, QueryOutcome};

        struct FlakyStore {
            calls: AtomicUsize,
        }

        #[async_trait::async_trait]
        impl GraphStore for FlakyStore {
            async fn lookup_nodes(
                &self,
                _kind: EntityKind,
                _fragment: &str,
            ) -> Result<Vec<NodeMatch>, GraphError> {
                Ok(Vec::new())
            }
            async fn run_query(
                &self,
                query: &str,
                _params: &Map<String, Value>,
            ) -> Result<QueryOutcome, GraphError> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(GraphError::QueryFailed("unbalanced clause".to_string()));
                }
                assert!(!query.contains("WHERE"), "retry should drop trailing clauses");
                Ok(QueryOutcome::default())
            }
            async fn shortest_paths(
                &self,
                _from: &str,
                _to: &str,
                _max_depth: u32,
            ) -> Result<Vec<GraphPath>, GraphError> {
                Ok(Vec::new())
            }
        }

        let graph = FlakyStore { calls: AtomicUsize::new(0) };
        let result = execute_query(
            &graph,
            &json!("MATCH (p:PainPoint) RETURN p WHERE wibble wobble ??"),
            None,
        )
        .await
        .unwrap();

        assert!(result.success, "simplified retry should salvage the query");
        assert_eq!(graph.calls.load(Ordering::SeqCst), 2, "exactly one retry");
    }

    #[tokio::test]
    async fn hopeless_query_surfaces_an_execution_error() {
        let graph = MemoryGraphStore::seeded();
        let result = execute_query(&graph, &json!("gibberish"), None).await.unwrap();

        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("execution_error:"));
    }

    #[tokio::test]
    async fn null_query_is_tolerated_as_failure() {
        let graph = MemoryGraphStore::seeded();
        let result = execute_query(&graph, &Value::Null, None).await.unwrap();

        assert!(!result.success);
    }

    #[test]
    fn code_fences_and_language_tags_are_stripped() {
        let fenced = "```cypher\nMATCH (n:Industry) RETURN n\n```";
        assert_eq!(strip_code_fences(fenced), "MATCH (n:Industry) RETURN n");

        let bare = "MATCH (n:Industry) RETURN n";
        assert_eq!(strip_code_fences(bare), bare);

        let single_line = "```MATCH (n:Industry) RETURN n```";
        assert_eq!(strip_code_fences(single_line), "MATCH (n:Industry) RETURN n");
    }
}
