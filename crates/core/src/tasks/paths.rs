//! Shortest-path discovery between two named catalog nodes.

use serde_json::{Map, Value};

use atlas_graph::GraphStore;

use crate::plan::StepResult;
use crate::tasks::{string_param, TaskFault};

pub async fn find_connection_paths(
    graph: &dyn GraphStore,
    from_entity: &Value,
    to_entity: &Value,
    max_depth: u32,
) -> Result<StepResult, TaskFault> {
    let Some(from) = string_param(from_entity) else {
        return Ok(StepResult::fail("from_entity is missing or resolved to null"));
    };
    let Some(to) = string_param(to_entity) else {
        return Ok(StepResult::fail("to_entity is missing or resolved to null"));
    };

    let paths = match graph.shortest_paths(&from, &to, max_depth).await {
        Ok(paths) => paths,
        Err(error) => return Ok(StepResult::fail(format!("path search failed: {error}"))),
    };

    if paths.is_empty() {
        return Ok(StepResult::fail(format!(
            "no connection between `{from}` and `{to}` within {max_depth} hops"
        )));
    }

    let paths_value = serde_json::to_value(&paths)
        .map_err(|error| TaskFault::Internal(format!("could not serialize paths: {error}")))?;

    let mut output = Map::new();
    output.insert("paths".to_string(), paths_value);
    output.insert("path_count".to_string(), Value::from(paths.len()));
    output.insert(
        "shortest_hops".to_string(),
        Value::from(paths.iter().map(|path| path.hops()).min().unwrap_or(0)),
    );
    Ok(StepResult::ok(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_graph::MemoryGraphStore;
    use serde_json::json;

    #[tokio::test]
    async fn connected_entities_yield_an_ordered_path() {
        let graph = MemoryGraphStore::seeded();
        let result = find_connection_paths(
            &graph,
            &json!("Banking"),
            &json!("Support Deflection Chatbot"),
            6,
        )
        .await
        .unwrap();

        assert!(result.success);
        let output = result.output.unwrap();
        assert_eq!(output["shortest_hops"], json!(4));
        assert!(output["path_count"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn unreachable_within_depth_fails_as_data() {
        let graph = MemoryGraphStore::seeded();
        let result =
            find_connection_paths(&graph, &json!("Banking"), &json!("Support Deflection Chatbot"), 2)
                .await
                .unwrap();

        assert!(!result.success);
        assert!(result.error.unwrap().contains("within 2 hops"));
    }

    #[tokio::test]
    async fn unknown_endpoint_fails_as_data() {
        let graph = MemoryGraphStore::seeded();
        let result =
            find_connection_paths(&graph, &json!("Quantum Bank"), &json!("Banking"), 4).await.unwrap();

        assert!(!result.success);
    }

    #[tokio::test]
    async fn null_endpoints_are_tolerated() {
        let graph = MemoryGraphStore::seeded();
        let result = find_connection_paths(&graph, &Value::Null, &json!("Banking"), 4).await.unwrap();

        assert!(!result.success);
        assert!(result.error.unwrap().contains("from_entity"));
    }
}
