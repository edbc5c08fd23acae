use std::sync::Arc;

use atlas_core::orchestrator::Orchestrator;
use atlas_core::plan::ExecutionPlan;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone)]
pub struct AssistantState {
    pub orchestrator: Arc<Orchestrator>,
    /// Server-wide token; each request runs under a child so shutdown
    /// halts in-flight plans.
    pub shutdown: CancellationToken,
}

pub fn router(state: AssistantState) -> Router {
    Router::new().route("/assistant/execute", post(execute)).with_state(state)
}

/// Execute a plan document shaped as `{"plan": [...]}`. Plan validation
/// failures are the caller's fault and come back as 400; everything
/// after validation is reported inside the outcome envelope.
pub async fn execute(
    State(state): State<AssistantState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let plan = match ExecutionPlan::from_value(body) {
        Ok(plan) => plan,
        Err(error) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": error.to_string(),
                    "error_class": "plan_validation",
                })),
            );
        }
    };

    info!(
        event_name = "assistant.execute.received",
        steps = plan.len(),
        "received execution plan"
    );

    let outcome = state.orchestrator.execute_plan(plan, state.shutdown.child_token()).await;
    info!(
        event_name = "assistant.execute.finished",
        success = outcome.is_success(),
        "execution plan finished"
    );

    let payload = serde_json::to_value(&outcome).unwrap_or_else(|error| {
        json!({
            "success": false,
            "error": format!("could not serialize execution outcome: {error}"),
        })
    });
    (StatusCode::OK, Json(payload))
}
