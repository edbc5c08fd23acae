//! Caller-visible execution results.
//!
//! The orchestrator terminates every plan in exactly one of three
//! shapes: success with an optional typed query result, a clarification
//! request, or a failure pinned to the step that caused it. All three
//! carry the full execution log.

use serde::Serialize;
use serde_json::Value;

use crate::plan::ExecutionLogEntry;

/// What kind of result a successful execution produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Query,
    Exploration,
    Analysis,
    Creative,
    FinalAnswer,
    BusinessContextRecovery,
    EmptyResultHandled,
    Generic,
}

/// The data payload of a successful execution. Which fields are present
/// depends on [`ResultKind`]; absent fields are skipped on the wire.
#[derive(Clone, Debug, Serialize)]
pub struct QueryResult {
    #[serde(rename = "type")]
    pub kind: ResultKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creative_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_context: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_data: Option<Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub needs_visualization_confirmation: bool,
}

impl QueryResult {
    pub fn new(kind: ResultKind) -> Self {
        Self {
            kind,
            graph_data: None,
            node_count: None,
            edge_count: None,
            analysis: None,
            creative_content: None,
            message: None,
            suggestions: Vec::new(),
            business_context: None,
            available_data: None,
            needs_visualization_confirmation: false,
        }
    }
}

/// Terminal outcome of one plan execution.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum ExecutionOutcome {
    Success {
        success: bool,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        query_result: Option<QueryResult>,
        reasoning_steps: Vec<String>,
        execution_log: Vec<ExecutionLogEntry>,
    },
    NeedsClarification {
        success: bool,
        needs_clarification: bool,
        message: String,
        suggestions: Vec<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        entity_issues: Vec<Value>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        corrected_entities: Vec<Value>,
        execution_log: Vec<ExecutionLogEntry>,
    },
    Failure {
        success: bool,
        error: String,
        failed_at: usize,
        execution_log: Vec<ExecutionLogEntry>,
    },
}

impl ExecutionOutcome {
    pub fn success(
        message: impl Into<String>,
        query_result: Option<QueryResult>,
        reasoning_steps: Vec<String>,
        execution_log: Vec<ExecutionLogEntry>,
    ) -> Self {
        ExecutionOutcome::Success {
            success: true,
            message: message.into(),
            query_result,
            reasoning_steps,
            execution_log,
        }
    }

    pub fn needs_clarification(
        message: impl Into<String>,
        suggestions: Vec<String>,
        entity_issues: Vec<Value>,
        corrected_entities: Vec<Value>,
        execution_log: Vec<ExecutionLogEntry>,
    ) -> Self {
        ExecutionOutcome::NeedsClarification {
            success: false,
            needs_clarification: true,
            message: message.into(),
            suggestions,
            entity_issues,
            corrected_entities,
            execution_log,
        }
    }

    pub fn failure(
        error: impl Into<String>,
        failed_at: usize,
        execution_log: Vec<ExecutionLogEntry>,
    ) -> Self {
        ExecutionOutcome::Failure {
            success: false,
            error: error.into(),
            failed_at,
            execution_log,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    pub fn execution_log(&self) -> &[ExecutionLogEntry] {
        match self {
            ExecutionOutcome::Success { execution_log, .. }
            | ExecutionOutcome::NeedsClarification { execution_log, .. }
            | ExecutionOutcome::Failure { execution_log, .. } => execution_log,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_envelope_skips_absent_fields() {
        let mut result = QueryResult::new(ResultKind::Query);
        result.node_count = Some(3);
        let outcome = ExecutionOutcome::success("done", Some(result), vec![], vec![]);

        let wire = serde_json::to_value(&outcome).expect("serialize");
        assert_eq!(wire["success"], json!(true));
        assert_eq!(wire["query_result"]["type"], json!("query"));
        assert_eq!(wire["query_result"]["node_count"], json!(3));
        assert!(wire["query_result"].get("analysis").is_none());
        assert!(wire["query_result"].get("needs_visualization_confirmation").is_none());
    }

    #[test]
    fn clarification_envelope_is_flagged() {
        let outcome = ExecutionOutcome::needs_clarification(
            "did you mean Banking?",
            vec!["Banking".to_string()],
            vec![json!({"entity_name": "Bnking"})],
            vec![],
            vec![],
        );

        let wire = serde_json::to_value(&outcome).expect("serialize");
        assert_eq!(wire["success"], json!(false));
        assert_eq!(wire["needs_clarification"], json!(true));
        assert_eq!(wire["suggestions"], json!(["Banking"]));
        assert!(wire.get("corrected_entities").is_none());
    }

    #[test]
    fn failure_envelope_names_the_step() {
        let outcome = ExecutionOutcome::failure("no such entity", 2, vec![]);
        let wire = serde_json::to_value(&outcome).expect("serialize");
        assert_eq!(wire["failed_at"], json!(2));
        assert_eq!(wire["error"], json!("no such entity"));
    }
}
