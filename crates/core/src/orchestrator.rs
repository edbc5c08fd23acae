//! Plan interpreter.
//!
//! Executes steps strictly in order against one [`ExecutionState`],
//! applies the per-step failure policy, controls the clarification loop
//! for repeatedly invalid entities, and shapes the terminal
//! [`ExecutionOutcome`]. Pool state is shared across executions; the
//! per-plan state here is owned by exactly one run.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use atlas_graph::{EntityKind, GraphStore};
use atlas_providers::ProviderPool;

use crate::plan::{
    ExecutionLogEntry, ExecutionPlan, ExecutionState, FailurePolicy, Step, StepResult, TaskSpec,
};
use crate::response::{ExecutionOutcome, QueryResult, ResultKind};
use crate::tasks::{self, clarify, has_business_context, TaskContext};

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Invalid entity validations tolerated before the clarification
    /// loop is cut short with a final answer.
    pub max_validation_failures: usize,
    /// Node count above which the caller must confirm visualization.
    pub visualization_node_limit: u64,
    /// Cap on suggestions attached to clarification and recovery
    /// responses.
    pub max_suggestions: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { max_validation_failures: 2, visualization_node_limit: 100, max_suggestions: 3 }
    }
}

pub struct Orchestrator {
    graph: Arc<dyn GraphStore>,
    pool: Arc<ProviderPool>,
    config: OrchestratorConfig,
}

/// What a successful step's output shape means for the rest of the run.
enum Flow {
    Continue,
    Finish(ExecutionOutcome),
}

/// Mutable state of one plan execution.
struct Run {
    state: ExecutionState,
    log: Vec<ExecutionLogEntry>,
    validation_failures: usize,
    business_context: Option<Map<String, Value>>,
    /// Best result so far; later analysis may still attach to it.
    pending: Option<QueryResult>,
    /// Oversized query result awaiting visualization confirmation.
    /// Kept apart from `pending` so later small queries cannot clear
    /// the confirmation request.
    visualization: Option<QueryResult>,
}

impl Orchestrator {
    pub fn new(graph: Arc<dyn GraphStore>, pool: Arc<ProviderPool>) -> Self {
        Self::with_config(graph, pool, OrchestratorConfig::default())
    }

    pub fn with_config(
        graph: Arc<dyn GraphStore>,
        pool: Arc<ProviderPool>,
        config: OrchestratorConfig,
    ) -> Self {
        Self { graph, pool, config }
    }

    /// Execute a validated plan to one terminal outcome. A cancelled
    /// token halts the plan as a failure at the current step.
    pub async fn execute_plan(
        &self,
        plan: ExecutionPlan,
        cancel: CancellationToken,
    ) -> ExecutionOutcome {
        let execution_id = Uuid::new_v4();
        info!(
            event_name = "orchestrator.execution.start",
            execution_id = %execution_id,
            steps = plan.len(),
            "executing plan"
        );

        let outcome = self.run(&plan, execution_id, cancel).await;
        info!(
            event_name = "orchestrator.execution.finished",
            execution_id = %execution_id,
            success = outcome.is_success(),
            logged_steps = outcome.execution_log().len(),
            "plan execution finished"
        );
        outcome
    }

    async fn run(
        &self,
        plan: &ExecutionPlan,
        execution_id: Uuid,
        cancel: CancellationToken,
    ) -> ExecutionOutcome {
        let ctx = TaskContext {
            graph: Arc::clone(&self.graph),
            pool: Arc::clone(&self.pool),
            cancel: cancel.clone(),
        };
        let mut run = Run {
            state: ExecutionState::new(),
            log: Vec::new(),
            validation_failures: 0,
            business_context: None,
            pending: None,
            visualization: None,
        };
        let mut retried = vec![false; plan.len()];

        let mut index = 0;
        while index < plan.steps.len() {
            let step_number = index + 1;
            let step = &plan.steps[index];

            if cancel.is_cancelled() {
                warn!(
                    event_name = "orchestrator.execution.cancelled",
                    execution_id = %execution_id,
                    step = step_number,
                    "execution cancelled between steps"
                );
                return ExecutionOutcome::failure("execution was cancelled", step_number, run.log);
            }

            let started = Instant::now();
            let (params, dispatched) = tasks::dispatch(&ctx, &step.task, &run.state).await;
            run.capture_business_context(&params);

            let result = match dispatched {
                Ok(result) => result,
                Err(fault) => {
                    warn!(
                        event_name = "orchestrator.step.fault",
                        execution_id = %execution_id,
                        step = step_number,
                        task = step.task.kind(),
                        error = %fault,
                        "step raised an unexpected fault"
                    );
                    let message = fault.to_string();
                    run.append_log(step_number, step, params, StepResult::fail(message.clone()), started);
                    return ExecutionOutcome::failure(message, step_number, run.log);
                }
            };

            run.state.record(step_number, result.clone());
            run.append_log(step_number, step, params, result.clone(), started);

            if result.success {
                info!(
                    event_name = "orchestrator.step.completed",
                    execution_id = %execution_id,
                    step = step_number,
                    task = step.task.kind(),
                    "step completed"
                );
                match self.inspect_success(&ctx, &mut run, step, &result).await {
                    Flow::Continue => {
                        index += 1;
                        continue;
                    }
                    Flow::Finish(outcome) => return outcome,
                }
            }

            let error = result.error.clone().unwrap_or_else(|| "step failed".to_string());
            warn!(
                event_name = "orchestrator.step.failed",
                execution_id = %execution_id,
                step = step_number,
                task = step.task.kind(),
                policy = ?step.on_failure,
                error = %error,
                "step failed"
            );

            // Business framing takes precedence over the step's own
            // failure policy: the caller gets proxy-sector guidance
            // instead of a dead end.
            if let Some(recovery) = self.recover_business_context(&run).await {
                info!(
                    event_name = "orchestrator.business_context.recovered",
                    execution_id = %execution_id,
                    step = step_number,
                    "failure converted to business-context recovery"
                );
                let message = recovery
                    .message
                    .clone()
                    .unwrap_or_else(|| "Recovered with business-context guidance.".to_string());
                let (reasoning, log) = run.finish_parts();
                return ExecutionOutcome::success(message, Some(recovery), reasoning, log);
            }

            match step.on_failure {
                FailurePolicy::Halt => {
                    return ExecutionOutcome::failure(error, step_number, run.log);
                }
                FailurePolicy::ClarifyAndHalt => {
                    let message = format!(
                        "Step {step_number} could not complete: {error}. Please adjust the request and try again."
                    );
                    return ExecutionOutcome::needs_clarification(
                        message,
                        Vec::new(),
                        Vec::new(),
                        Vec::new(),
                        run.log,
                    );
                }
                FailurePolicy::Continue => {
                    index += 1;
                }
                FailurePolicy::Retry => {
                    if retried[index] {
                        return ExecutionOutcome::failure(error, step_number, run.log);
                    }
                    retried[index] = true;
                    info!(
                        event_name = "orchestrator.step.retry",
                        execution_id = %execution_id,
                        step = step_number,
                        "retrying failed step once"
                    );
                }
            }
        }

        self.conclude(run).await
    }

    /// Inspect a successful step's output shapes in priority order.
    async fn inspect_success(
        &self,
        ctx: &TaskContext,
        run: &mut Run,
        step: &Step,
        result: &StepResult,
    ) -> Flow {
        let Some(output) = result.output.as_ref() else {
            return Flow::Continue;
        };

        // (a) An explicit clarification request terminates the run.
        if output.get("needs_clarification").and_then(Value::as_bool).unwrap_or(false) {
            let message = output
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("I need clarification to continue.")
                .to_string();
            let suggestions = string_list(output.get("suggestions"));
            let (entity_issues, corrected_entities) = match &step.task {
                TaskSpec::ClarifyWithUser { entity_issues, corrected_entities, .. } => {
                    (entity_issues.clone(), corrected_entities.clone())
                }
                _ => (Vec::new(), Vec::new()),
            };
            let (_, log) = run.finish_parts();
            return Flow::Finish(ExecutionOutcome::needs_clarification(
                message,
                suggestions,
                entity_issues,
                corrected_entities,
                log,
            ));
        }

        // (b) Invalid entity: cap the clarification loop, then offer a
        // single correction when the name is a plausible near miss.
        if matches!(step.task, TaskSpec::ValidateEntity { .. })
            && !output.get("valid").and_then(Value::as_bool).unwrap_or(true)
        {
            let confidence = output.get("confidence").and_then(Value::as_f64).unwrap_or(0.0);
            let prior_failures = run.validation_failures;
            run.validation_failures += 1;

            let issue = Value::Object(output.clone());
            if prior_failures >= self.config.max_validation_failures || confidence == 0.0 {
                return Flow::Finish(self.final_answer(ctx, run, vec![issue]).await);
            }

            let suggestions = string_list(output.get("suggested_entities"));
            if confidence < 0.5 && !suggestions.is_empty() {
                let clarification =
                    clarify::clarify_with_user(ctx, &[issue.clone()], &[], None, false, None)
                        .await;
                let clarified = clarification.output.unwrap_or_default();
                let message = clarified
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Did you mean one of the suggested entities?")
                    .to_string();
                let suggestions = string_list(clarified.get("suggestions"));
                let (_, log) = run.finish_parts();
                return Flow::Finish(ExecutionOutcome::needs_clarification(
                    message,
                    suggestions,
                    vec![issue],
                    Vec::new(),
                    log,
                ));
            }
            return Flow::Continue;
        }

        // (c) Query results branch on node count.
        if matches!(step.task, TaskSpec::ExecuteQuery { .. }) {
            if let Some(graph_data) = output.get("graph_data") {
                let node_count = output.get("node_count").and_then(Value::as_u64).unwrap_or(0);
                let edge_count = output.get("edge_count").and_then(Value::as_u64).unwrap_or(0);

                if node_count > self.config.visualization_node_limit {
                    let mut oversized = QueryResult::new(ResultKind::Query);
                    oversized.graph_data = Some(graph_data.clone());
                    oversized.node_count = Some(node_count);
                    oversized.edge_count = Some(edge_count);
                    oversized.needs_visualization_confirmation = true;
                    run.visualization = Some(oversized);
                    return Flow::Continue;
                }
                if node_count > 0 {
                    let mut pending = QueryResult::new(ResultKind::Query);
                    pending.graph_data = Some(graph_data.clone());
                    pending.node_count = Some(node_count);
                    pending.edge_count = Some(edge_count);
                    run.pending = Some(pending);
                    return Flow::Continue;
                }

                // Zero nodes with known filter names: answer about the
                // names instead of returning an empty success.
                let filtered = string_list(output.get("filtered_entities"));
                if !filtered.is_empty() {
                    let mut issues = Vec::with_capacity(filtered.len());
                    for name in &filtered {
                        let suggested = catalog_suggestions(
                            self.graph.as_ref(),
                            std::slice::from_ref(name),
                            self.config.max_suggestions,
                        )
                        .await;
                        issues.push(json!({
                            "entity_name": name,
                            "suggested_entities": suggested,
                        }));
                    }
                    return Flow::Finish(self.final_answer(ctx, run, issues).await);
                }
                return Flow::Continue;
            }
        }

        // (d) Exploration-mode steps wrap whatever they found.
        if step.exploration {
            let mut pending = QueryResult::new(ResultKind::Exploration);
            pending.graph_data = output.get("graph_data").cloned();
            pending.node_count = output.get("node_count").and_then(Value::as_u64);
            pending.edge_count = output.get("edge_count").and_then(Value::as_u64);
            pending.available_data = Some(Value::Object(output.clone()));
            run.pending = Some(pending);
            return Flow::Continue;
        }

        // (e) Analysis attaches to the query result it describes, or
        // stands alone.
        if let Some(analysis) = output.get("analysis").and_then(Value::as_str) {
            if let Some(pending) = run.pending.as_mut() {
                pending.analysis = Some(analysis.to_string());
            } else if let Some(oversized) = run.visualization.as_mut() {
                oversized.analysis = Some(analysis.to_string());
            } else {
                let mut pending = QueryResult::new(ResultKind::Analysis);
                pending.analysis = Some(analysis.to_string());
                run.pending = Some(pending);
            }
            return Flow::Continue;
        }

        // (f) Creative content.
        if let Some(content) = output.get("creative_content").and_then(Value::as_str) {
            let mut pending = QueryResult::new(ResultKind::Creative);
            pending.creative_content = Some(content.to_string());
            pending.suggestions = string_list(output.get("suggestions"));
            run.pending = Some(pending);
            return Flow::Continue;
        }

        Flow::Continue
    }

    /// Terminal explanatory answer built through `clarify_with_user`,
    /// carrying whatever graph data the run accumulated.
    async fn final_answer(
        &self,
        ctx: &TaskContext,
        run: &mut Run,
        entity_issues: Vec<Value>,
    ) -> ExecutionOutcome {
        let available_data = run.accumulated_graph_data();
        let clarified =
            clarify::clarify_with_user(ctx, &entity_issues, &[], None, true, available_data).await;
        let output = clarified.output.unwrap_or_default();

        let message = output
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("No matching catalog data was found.")
            .to_string();
        let mut result = QueryResult::new(ResultKind::FinalAnswer);
        result.message = Some(message.clone());
        result.suggestions = string_list(output.get("suggestions"));
        result.available_data = output.get("available_data").filter(|v| !v.is_null()).cloned();

        let (reasoning, log) = run.finish_parts();
        ExecutionOutcome::success(message, Some(result), reasoning, log)
    }

    /// When any step carried business framing, a failure becomes a
    /// success that echoes the framing with proxy-sector guidance.
    async fn recover_business_context(&self, run: &Run) -> Option<QueryResult> {
        let context = run.business_context.as_ref()?;
        let company =
            context.get("company").and_then(Value::as_str).unwrap_or("the company").to_string();
        let proxy_sectors = string_list(context.get("proxy_sectors"));

        let mut suggestions = catalog_suggestions(
            self.graph.as_ref(),
            &proxy_sectors,
            self.config.max_suggestions,
        )
        .await;
        if suggestions.is_empty() {
            suggestions =
                catalog_suggestions(self.graph.as_ref(), std::slice::from_ref(&company), self.config.max_suggestions).await;
        }

        let mut result = QueryResult::new(ResultKind::BusinessContextRecovery);
        result.business_context = Some(json!({
            "company": context.get("company").cloned().unwrap_or(Value::Null),
            "proxy_sectors": context.get("proxy_sectors").cloned().unwrap_or(Value::Null),
            "business_impact": context.get("business_impact").cloned().unwrap_or(Value::Null),
        }));
        result.message = Some(format!(
            "The catalog has no direct data for {company}, so the answer falls back to the proxy sectors provided."
        ));
        result.suggestions = suggestions;
        Some(result)
    }

    /// Shape the outcome once every step has run.
    async fn conclude(&self, mut run: Run) -> ExecutionOutcome {
        // An unconfirmed oversized result outranks whatever later steps
        // produced: the user must answer before anything is rendered.
        if let Some(oversized) = run.visualization.take() {
            let message = format!(
                "The query matched {} nodes. Confirm visualization before the full graph is rendered.",
                oversized.node_count.unwrap_or(0)
            );
            let (reasoning, log) = run.finish_parts();
            return ExecutionOutcome::success(message, Some(oversized), reasoning, log);
        }

        if let Some(pending) = run.pending.take() {
            let message = success_message(&pending);
            let (reasoning, log) = run.finish_parts();
            return ExecutionOutcome::success(message, Some(pending), reasoning, log);
        }

        if run.has_meaningful_result() {
            let (reasoning, log) = run.finish_parts();
            return ExecutionOutcome::success(
                "Plan completed.",
                Some(QueryResult::new(ResultKind::Generic)),
                reasoning,
                log,
            );
        }

        // Nothing useful anywhere in the log: answer about what was
        // attempted instead of returning an empty success.
        let filtered = run.filtered_entity_names();
        let suggestions =
            catalog_suggestions(self.graph.as_ref(), &filtered, self.config.max_suggestions).await;
        let mut message = if filtered.is_empty() {
            "The plan finished without finding matching catalog data.".to_string()
        } else {
            format!("No catalog data matched {}.", quote_list(&filtered))
        };
        if !suggestions.is_empty() {
            message.push_str(&format!(" Closest catalog entries: {}.", quote_list(&suggestions)));
        }

        let mut result = QueryResult::new(ResultKind::EmptyResultHandled);
        result.message = Some(message.clone());
        result.suggestions = suggestions;
        let (reasoning, log) = run.finish_parts();
        ExecutionOutcome::success(message, Some(result), reasoning, log)
    }
}

impl Run {
    fn append_log(
        &mut self,
        step_number: usize,
        step: &Step,
        resolved_params: Map<String, Value>,
        result: StepResult,
        started: Instant,
    ) {
        self.log.push(ExecutionLogEntry {
            step_number,
            task_type: step.task.kind().to_string(),
            resolved_params,
            success: result.success,
            result,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
            reasoning: step.reasoning.clone(),
        });
    }

    /// Remember the latest business framing seen in any step's context.
    fn capture_business_context(&mut self, params: &Map<String, Value>) {
        if let Some(Value::Object(context)) = params.get("context") {
            if has_business_context(context) {
                self.business_context = Some(context.clone());
            }
        }
    }

    /// Human-readable narration derived 1:1 from the log.
    fn reasoning_steps(&self) -> Vec<String> {
        self.log
            .iter()
            .map(|entry| {
                if entry.success {
                    if entry.reasoning.is_empty() {
                        format!("Step {}: {} completed", entry.step_number, entry.task_type)
                    } else {
                        format!(
                            "Step {}: {} completed ({})",
                            entry.step_number, entry.task_type, entry.reasoning
                        )
                    }
                } else {
                    format!(
                        "Step {}: {} failed: {}",
                        entry.step_number,
                        entry.task_type,
                        entry.result.error.as_deref().unwrap_or("unknown error")
                    )
                }
            })
            .collect()
    }

    fn finish_parts(&mut self) -> (Vec<String>, Vec<ExecutionLogEntry>) {
        let reasoning = self.reasoning_steps();
        (reasoning, std::mem::take(&mut self.log))
    }

    /// Latest non-empty graph data recorded by any step.
    fn accumulated_graph_data(&self) -> Option<Value> {
        self.log.iter().rev().find_map(|entry| {
            let output = entry.result.output.as_ref()?;
            let node_count = output.get("node_count").and_then(Value::as_u64).unwrap_or(0);
            if node_count == 0 {
                return None;
            }
            output.get("graph_data").cloned()
        })
    }

    fn has_meaningful_result(&self) -> bool {
        self.log.iter().any(|entry| {
            let Some(output) = entry.result.output.as_ref() else {
                return false;
            };
            output.get("node_count").and_then(Value::as_u64).unwrap_or(0) > 0
                || output.get("analysis").is_some()
                || output.get("creative_content").is_some()
        })
    }

    /// Every entity name any executed query filtered on, in order.
    fn filtered_entity_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for entry in &self.log {
            let Some(output) = entry.result.output.as_ref() else { continue };
            for name in string_list(output.get("filtered_entities")) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }
}

fn success_message(result: &QueryResult) -> String {
    match result.kind {
        ResultKind::Query => format!(
            "Found {} catalog nodes and {} relationships.",
            result.node_count.unwrap_or(0),
            result.edge_count.unwrap_or(0)
        ),
        ResultKind::Exploration => "Exploration of the catalog is complete.".to_string(),
        ResultKind::Analysis => "Analysis complete.".to_string(),
        ResultKind::Creative => "Generated creative suggestions.".to_string(),
        _ => "Plan completed.".to_string(),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items.iter().filter_map(Value::as_str).map(str::to_string).collect()
        })
        .unwrap_or_default()
}

fn quote_list(names: &[String]) -> String {
    names.iter().map(|name| format!("'{name}'")).collect::<Vec<_>>().join(", ")
}

/// Real catalog names closest to the given ones, matching whole names
/// first and then individual words, so "Quantum Bank" still surfaces
/// "Banking".
async fn catalog_suggestions(graph: &dyn GraphStore, names: &[String], cap: usize) -> Vec<String> {
    let mut suggestions: Vec<String> = Vec::new();
    for name in names {
        let mut fragments: Vec<String> = vec![name.clone()];
        fragments.extend(
            name.split_whitespace().filter(|word| word.len() >= 4).map(str::to_string),
        );
        for fragment in fragments {
            for kind in EntityKind::ALL {
                let Ok(matches) = graph.lookup_nodes(kind, &fragment).await else { continue };
                for candidate in matches.into_iter().take(2) {
                    if !suggestions.contains(&candidate.node.name) {
                        suggestions.push(candidate.node.name);
                    }
                }
            }
        }
    }
    suggestions.truncate(cap);
    suggestions
}
