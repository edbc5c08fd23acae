//! Entity validation against the catalog graph.

use serde_json::{Map, Value};

use atlas_graph::{EntityKind, GraphStore};

use crate::plan::StepResult;
use crate::tasks::string_param;

/// Names at or above this similarity count as a direct catalog hit.
const VALID_THRESHOLD: f64 = 0.8;
const MAX_SUGGESTIONS: usize = 5;

/// Fuzzy lookup of `entity_name` among nodes of `entity_type`.
///
/// Output: `{valid, confidence, entity_type, entity_name,
/// matched_name?, suggested_entities}`. Confidence 0.0 means no
/// plausible match anywhere in the kind.
pub async fn validate_entity(
    graph: &dyn GraphStore,
    entity_type: EntityKind,
    entity_name: &Value,
) -> StepResult {
    let Some(name) = string_param(entity_name) else {
        return StepResult::fail("entity_name is missing or resolved to null");
    };

    let matches = match graph.lookup_nodes(entity_type, &name).await {
        Ok(matches) => matches,
        Err(error) => return StepResult::fail(format!("entity lookup failed: {error}")),
    };

    let confidence = matches.first().map(|best| best.confidence).unwrap_or(0.0);
    let valid = confidence >= VALID_THRESHOLD;
    let suggested: Vec<Value> = matches
        .iter()
        .take(MAX_SUGGESTIONS)
        .map(|candidate| Value::String(candidate.node.name.clone()))
        .collect();

    let mut output = Map::new();
    output.insert("valid".to_string(), Value::Bool(valid));
    output.insert("confidence".to_string(), confidence.into());
    output.insert("entity_type".to_string(), Value::String(entity_type.label().to_string()));
    output.insert("entity_name".to_string(), Value::String(name));
    if valid {
        if let Some(best) = matches.first() {
            output.insert("matched_name".to_string(), Value::String(best.node.name.clone()));
        }
    }
    output.insert("suggested_entities".to_string(), Value::Array(suggested));

    StepResult::ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_graph::MemoryGraphStore;
    use serde_json::json;

    #[tokio::test]
    async fn exact_name_validates_with_full_confidence() {
        let graph = MemoryGraphStore::seeded();
        let result = validate_entity(&graph, EntityKind::Industry, &json!("Banking")).await;

        assert!(result.success);
        let output = result.output.unwrap();
        assert_eq!(output["valid"], json!(true));
        assert_eq!(output["confidence"], json!(1.0));
        assert_eq!(output["matched_name"], json!("Banking"));
    }

    #[tokio::test]
    async fn near_miss_is_invalid_but_suggests_the_real_entity() {
        let graph = MemoryGraphStore::seeded();
        let result = validate_entity(&graph, EntityKind::Industry, &json!("Bnking")).await;

        assert!(result.success);
        let output = result.output.unwrap();
        assert_eq!(output["valid"], json!(false));
        let confidence = output["confidence"].as_f64().unwrap();
        assert!(confidence > 0.0 && confidence < 1.0);
        let suggestions = output["suggested_entities"].as_array().unwrap();
        assert!(suggestions.contains(&json!("Banking")));
    }

    #[tokio::test]
    async fn hopeless_name_scores_zero_confidence() {
        let graph = MemoryGraphStore::seeded();
        let result =
            validate_entity(&graph, EntityKind::Industry, &json!("Xylophone Repair Cooperative"))
                .await;

        let output = result.output.unwrap();
        assert_eq!(output["valid"], json!(false));
        assert_eq!(output["confidence"], json!(0.0));
        assert!(output["suggested_entities"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn null_name_fails_as_data() {
        let graph = MemoryGraphStore::seeded();
        let result = validate_entity(&graph, EntityKind::Industry, &Value::Null).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("entity_name"));
    }
}
