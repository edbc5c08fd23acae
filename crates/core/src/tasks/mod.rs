//! Task library: the fixed catalog of operations a plan step can name.
//!
//! Every operation is a function of (graph store, provider pool,
//! resolved params) returning a [`StepResult`]; expected failures are
//! error-as-data, never panics. Only truly unexpected internal faults
//! surface as [`TaskFault`] for the orchestrator's per-step catch-all.
//! No operation mutates cross-step state; the orchestrator owns that.

pub mod analysis;
pub mod clarify;
pub mod entity;
pub mod paths;
pub mod query;

use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use atlas_graph::GraphStore;
use atlas_providers::{GenerationOptions, PoolError, ProviderPool};

use crate::plan::{resolve_arg, ArgValue, ExecutionState, StepResult, TaskSpec};

/// Shared handles every task operation may need.
#[derive(Clone)]
pub struct TaskContext {
    pub graph: Arc<dyn GraphStore>,
    pub pool: Arc<ProviderPool>,
    pub cancel: CancellationToken,
}

/// A fault the task library could not express as a failed [`StepResult`].
#[derive(Debug, Error)]
pub enum TaskFault {
    #[error("execution was cancelled")]
    Cancelled,
    #[error("internal task fault: {0}")]
    Internal(String),
}

/// Resolve a step's parameters and invoke the named operation.
///
/// Returns the resolved parameter map (for the execution log) alongside
/// the operation's result. Parameter references are interpreted here and
/// nowhere else downstream; operations only ever see concrete values.
pub async fn dispatch(
    ctx: &TaskContext,
    task: &TaskSpec,
    state: &ExecutionState,
) -> (Map<String, Value>, Result<StepResult, TaskFault>) {
    let mut params = Map::new();
    let mut resolve = |key: &str, arg: &ArgValue| -> Value {
        let value = resolve_arg(arg, state);
        params.insert(key.to_string(), value.clone());
        value
    };

    match task {
        TaskSpec::ValidateEntity { entity_type, entity_name } => {
            let name = resolve("entity_name", entity_name);
            params.insert("entity_type".to_string(), Value::String(entity_type.label().to_string()));
            let result = entity::validate_entity(ctx.graph.as_ref(), *entity_type, &name).await;
            (params, Ok(result))
        }
        TaskSpec::FindConnectionPaths { from_entity, to_entity, max_depth } => {
            let from = resolve("from_entity", from_entity);
            let to = resolve("to_entity", to_entity);
            params.insert("max_depth".to_string(), Value::from(*max_depth));
            let result =
                paths::find_connection_paths(ctx.graph.as_ref(), &from, &to, *max_depth).await;
            (params, result)
        }
        TaskSpec::GenerateQuery { goal, entities, context } => {
            let entities: Vec<Value> =
                entities.iter().map(|entity| resolve_arg(entity, state)).collect();
            params.insert("goal".to_string(), Value::String(goal.clone()));
            params.insert("entities".to_string(), Value::Array(entities.clone()));
            params.insert("context".to_string(), Value::Object(context.clone()));
            let result = query::generate_query(ctx, goal, &entities, context).await;
            (params, result)
        }
        TaskSpec::ExecuteQuery { query, query_params } => {
            let query_value = resolve("query", query);
            let params_value = query_params.as_ref().map(|arg| resolve("query_params", arg));
            let result = query::execute_query(ctx.graph.as_ref(), &query_value, params_value).await;
            (params, result)
        }
        TaskSpec::AnalyzeAndSummarize { graph_data, goal } => {
            let data = resolve("graph_data", graph_data);
            params.insert("goal".to_string(), Value::String(goal.clone()));
            let result = analysis::analyze_and_summarize(ctx, &data, goal).await;
            (params, result)
        }
        TaskSpec::GenerateCreativeText { prompt, context } => {
            params.insert("prompt".to_string(), Value::String(prompt.clone()));
            params.insert("context".to_string(), Value::Object(context.clone()));
            let result = analysis::generate_creative_text(ctx, prompt, context).await;
            (params, result)
        }
        TaskSpec::ClarifyWithUser {
            entity_issues,
            corrected_entities,
            conversation_state,
            provide_final_answer,
        } => {
            let conversation =
                conversation_state.as_ref().map(|arg| resolve("conversation_state", arg));
            params.insert("entity_issues".to_string(), Value::Array(entity_issues.clone()));
            params
                .insert("corrected_entities".to_string(), Value::Array(corrected_entities.clone()));
            params.insert("provide_final_answer".to_string(), Value::Bool(*provide_final_answer));
            let result = clarify::clarify_with_user(
                ctx,
                entity_issues,
                corrected_entities,
                conversation,
                *provide_final_answer,
                None,
            )
            .await;
            (params, Ok(result))
        }
    }
}

/// Extract a usable string from a resolved parameter, tolerating null.
pub(crate) fn string_param(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    }
}

/// Run one pool generation, mapping cancellation to a fault and every
/// other pool error to error-as-data for the caller to wrap.
pub(crate) async fn generate(
    ctx: &TaskContext,
    prompt: &str,
    options: &GenerationOptions,
) -> Result<Result<String, String>, TaskFault> {
    match ctx.pool.generate_text(prompt, options, &ctx.cancel).await {
        Ok(text) => Ok(Ok(text)),
        Err(PoolError::Cancelled) => Err(TaskFault::Cancelled),
        Err(error) => Ok(Err(error.to_string())),
    }
}

/// True when the step's own context carries multi-turn business framing.
pub(crate) fn has_business_context(context: &Map<String, Value>) -> bool {
    const KEYS: [&str; 4] = ["business_context", "company", "proxy_sectors", "business_impact"];
    KEYS.iter().any(|key| context.get(*key).is_some_and(|value| !value.is_null()))
}
