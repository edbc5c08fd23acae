//! Execution plan model.
//!
//! Plans arrive as JSON `{"plan": [...]}` from an upstream planner. Each
//! step names one of the seven task kinds with its own typed parameter
//! record; unknown task kinds are rejected when the plan is loaded, not
//! when it is dispatched. Parameter values may be reference tokens
//! (`"step N output[.path]"`) pointing at a prior step's output; those
//! are parsed once into [`StepRef`] here, and [`resolve_arg`] is the
//! only place a reference is ever interpreted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use atlas_graph::EntityKind;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("could not parse execution plan: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("plan contains no steps")]
    Empty,
    #[error("step {step} references step 0; step references are 1-based")]
    ZeroReference { step: usize },
    #[error("step {step} references step {referenced}, which does not execute before it")]
    ForwardReference { step: usize, referenced: usize },
}

/// A literal parameter value or a tagged reference to a prior step's
/// output.
#[derive(Clone, Debug, PartialEq)]
pub enum ArgValue {
    Literal(Value),
    Ref(StepRef),
}

impl ArgValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        ArgValue::Literal(value.into())
    }

    pub fn reference(step: usize, path: &[&str]) -> Self {
        ArgValue::Ref(StepRef { step, path: path.iter().map(|s| s.to_string()).collect() })
    }

    fn step_ref(&self) -> Option<&StepRef> {
        match self {
            ArgValue::Ref(step_ref) => Some(step_ref),
            ArgValue::Literal(_) => None,
        }
    }
}

impl Default for ArgValue {
    fn default() -> Self {
        ArgValue::Literal(Value::Null)
    }
}

/// Reference to a prior step's output, optionally descending into a
/// nested field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepRef {
    /// 1-based step index.
    pub step: usize,
    pub path: Vec<String>,
}

impl StepRef {
    /// The planner wire token for this reference.
    pub fn token(&self) -> String {
        let mut token = format!("step {} output", self.step);
        for segment in &self.path {
            token.push('.');
            token.push_str(segment);
        }
        token
    }
}

/// Parse a planner reference token. Two spellings are accepted:
/// `step N output[.path]` and `$stepN.output[.path]`.
pub fn parse_step_ref(raw: &str) -> Option<StepRef> {
    let trimmed = raw.trim();

    let remainder = if let Some(rest) = trimmed.strip_prefix("step ") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("$step") {
        rest
    } else {
        return None;
    };

    let (digits, tail): (String, &str) = {
        let split = remainder.find(|ch: char| !ch.is_ascii_digit()).unwrap_or(remainder.len());
        (remainder[..split].to_string(), &remainder[split..])
    };
    if digits.is_empty() {
        return None;
    }
    let step: usize = digits.parse().ok()?;

    let tail = tail.trim_start_matches([' ', '.']);
    let mut segments = tail.split('.');
    if segments.next() != Some("output") {
        return None;
    }
    let path: Vec<String> = segments
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();

    Some(StepRef { step, path })
}

impl Serialize for ArgValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ArgValue::Literal(value) => value.serialize(serializer),
            ArgValue::Ref(step_ref) => serializer.serialize_str(&step_ref.token()),
        }
    }
}

impl<'de> Deserialize<'de> for ArgValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if let Value::String(text) = &value {
            if let Some(step_ref) = parse_step_ref(text) {
                return Ok(ArgValue::Ref(step_ref));
            }
        }
        Ok(ArgValue::Literal(value))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    Halt,
    ClarifyAndHalt,
    Continue,
    Retry,
}

/// The seven task kinds with their typed parameter records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task_type", content = "params", rename_all = "snake_case")]
pub enum TaskSpec {
    ValidateEntity {
        entity_type: EntityKind,
        entity_name: ArgValue,
    },
    FindConnectionPaths {
        from_entity: ArgValue,
        to_entity: ArgValue,
        #[serde(default = "default_max_depth")]
        max_depth: u32,
    },
    GenerateQuery {
        goal: String,
        #[serde(default)]
        entities: Vec<ArgValue>,
        #[serde(default)]
        context: Map<String, Value>,
    },
    ExecuteQuery {
        query: ArgValue,
        #[serde(default)]
        query_params: Option<ArgValue>,
    },
    AnalyzeAndSummarize {
        graph_data: ArgValue,
        goal: String,
    },
    GenerateCreativeText {
        prompt: String,
        #[serde(default)]
        context: Map<String, Value>,
    },
    ClarifyWithUser {
        #[serde(default)]
        entity_issues: Vec<Value>,
        #[serde(default)]
        corrected_entities: Vec<Value>,
        #[serde(default)]
        conversation_state: Option<ArgValue>,
        #[serde(default)]
        provide_final_answer: bool,
    },
}

fn default_max_depth() -> u32 {
    4
}

impl TaskSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskSpec::ValidateEntity { .. } => "validate_entity",
            TaskSpec::FindConnectionPaths { .. } => "find_connection_paths",
            TaskSpec::GenerateQuery { .. } => "generate_query",
            TaskSpec::ExecuteQuery { .. } => "execute_query",
            TaskSpec::AnalyzeAndSummarize { .. } => "analyze_and_summarize",
            TaskSpec::GenerateCreativeText { .. } => "generate_creative_text",
            TaskSpec::ClarifyWithUser { .. } => "clarify_with_user",
        }
    }

    fn references(&self) -> Vec<&StepRef> {
        let args: Vec<&ArgValue> = match self {
            TaskSpec::ValidateEntity { entity_name, .. } => vec![entity_name],
            TaskSpec::FindConnectionPaths { from_entity, to_entity, .. } => {
                vec![from_entity, to_entity]
            }
            TaskSpec::GenerateQuery { entities, .. } => entities.iter().collect(),
            TaskSpec::ExecuteQuery { query, query_params } => {
                let mut args = vec![query];
                args.extend(query_params.iter());
                args
            }
            TaskSpec::AnalyzeAndSummarize { graph_data, .. } => vec![graph_data],
            TaskSpec::GenerateCreativeText { .. } => Vec::new(),
            TaskSpec::ClarifyWithUser { conversation_state, .. } => {
                conversation_state.iter().collect()
            }
        };
        args.into_iter().filter_map(ArgValue::step_ref).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub task: TaskSpec,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    /// Exploration-mode steps get their output wrapped as an
    /// exploration result instead of a plain query result.
    #[serde(default)]
    pub exploration: bool,
}

impl Step {
    pub fn new(task: TaskSpec) -> Self {
        Self { task, reasoning: String::new(), on_failure: FailurePolicy::default(), exploration: false }
    }

    pub fn with_policy(mut self, on_failure: FailurePolicy) -> Self {
        self.on_failure = on_failure;
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }
}

/// An ordered, validated sequence of steps. Immutable once handed to
/// the orchestrator; consumed by one execution.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExecutionPlan {
    pub steps: Vec<Step>,
}

#[derive(Deserialize)]
struct PlanDocument {
    plan: Vec<Step>,
}

impl ExecutionPlan {
    pub fn new(steps: Vec<Step>) -> Result<Self, PlanError> {
        let plan = Self { steps };
        plan.validate()?;
        Ok(plan)
    }

    /// Parse and validate the planner wire format `{"plan": [...]}`.
    pub fn from_value(value: Value) -> Result<Self, PlanError> {
        let document: PlanDocument = serde_json::from_value(value)?;
        Self::new(document.plan)
    }

    pub fn from_json(raw: &str) -> Result<Self, PlanError> {
        Self::from_value(serde_json::from_str(raw)?)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn validate(&self) -> Result<(), PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }

        for (index, step) in self.steps.iter().enumerate() {
            let step_number = index + 1;
            for reference in step.task.references() {
                if reference.step == 0 {
                    return Err(PlanError::ZeroReference { step: step_number });
                }
                if reference.step >= step_number {
                    return Err(PlanError::ForwardReference {
                        step: step_number,
                        referenced: reference.step,
                    });
                }
            }
        }

        Ok(())
    }
}

/// Uniform task-library return value. `success` implies an output and
/// no error; failure implies an error and no output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub output: Option<Map<String, Value>>,
    pub error: Option<String>,
}

impl StepResult {
    pub fn ok(output: Map<String, Value>) -> Self {
        Self { success: true, output: Some(output), error: None }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self { success: false, output: None, error: Some(error.into()) }
    }

    pub fn output_field(&self, key: &str) -> Option<&Value> {
        self.output.as_ref().and_then(|output| output.get(key))
    }
}

/// Append-only record of one executed step, returned in full to the
/// caller.
#[derive(Clone, Debug, Serialize)]
pub struct ExecutionLogEntry {
    pub step_number: usize,
    pub task_type: String,
    pub resolved_params: Map<String, Value>,
    pub result: StepResult,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub reasoning: String,
    pub success: bool,
}

/// Per-execution map of step index → result. Owned by exactly one
/// orchestrator run; written once per step (overwritten on retry).
#[derive(Debug, Default)]
pub struct ExecutionState {
    results: HashMap<usize, StepResult>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step: usize, result: StepResult) {
        self.results.insert(step, result);
    }

    pub fn get(&self, step: usize) -> Option<&StepResult> {
        self.results.get(&step)
    }
}

/// Resolve a parameter against prior step outputs. References to
/// missing or failed steps, and dead paths, resolve to `Value::Null`
/// with a logged warning, never an error; resolving the same reference
/// twice against unmodified state yields identical values.
pub fn resolve_arg(arg: &ArgValue, state: &ExecutionState) -> Value {
    match arg {
        ArgValue::Literal(value) => value.clone(),
        ArgValue::Ref(step_ref) => resolve_ref(step_ref, state),
    }
}

fn resolve_ref(step_ref: &StepRef, state: &ExecutionState) -> Value {
    let Some(result) = state.get(step_ref.step) else {
        warn!(
            event_name = "plan.reference.unresolved",
            token = %step_ref.token(),
            "reference points at a step with no recorded result"
        );
        return Value::Null;
    };
    let Some(output) = &result.output else {
        warn!(
            event_name = "plan.reference.failed_step",
            token = %step_ref.token(),
            "reference points at a failed step"
        );
        return Value::Null;
    };

    let mut current = Value::Object(output.clone());
    for segment in &step_ref.path {
        match current {
            Value::Object(mut map) => match map.remove(segment) {
                Some(next) => current = next,
                None => {
                    warn!(
                        event_name = "plan.reference.dead_path",
                        token = %step_ref.token(),
                        segment = %segment,
                        "reference path segment not present in step output"
                    );
                    return Value::Null;
                }
            },
            _ => {
                warn!(
                    event_name = "plan.reference.dead_path",
                    token = %step_ref.token(),
                    segment = %segment,
                    "reference path descends into a non-object value"
                );
                return Value::Null;
            }
        }
    }

    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_plan_json() -> Value {
        json!({
            "plan": [
                {
                    "task_type": "generate_query",
                    "params": {"goal": "pain points for Banking", "entities": ["Banking"]},
                    "reasoning": "synthesize a catalog query",
                    "on_failure": "halt"
                },
                {
                    "task_type": "execute_query",
                    "params": {"query": "step 1 output.query"},
                    "reasoning": "run it",
                    "on_failure": "clarify_and_halt"
                },
                {
                    "task_type": "analyze_and_summarize",
                    "params": {"graph_data": "step 2 output.graph_data", "goal": "summarize"},
                    "on_failure": "continue"
                }
            ]
        })
    }

    #[test]
    fn wire_plan_parses_with_typed_tasks_and_references() {
        let plan = ExecutionPlan::from_value(sample_plan_json()).expect("plan should parse");

        assert_eq!(plan.len(), 3);
        assert_eq!(plan.steps[0].task.kind(), "generate_query");
        assert_eq!(plan.steps[1].on_failure, FailurePolicy::ClarifyAndHalt);

        let TaskSpec::ExecuteQuery { query, .. } = &plan.steps[1].task else {
            panic!("second step should be execute_query");
        };
        assert_eq!(
            query,
            &ArgValue::Ref(StepRef { step: 1, path: vec!["query".to_string()] })
        );
    }

    #[test]
    fn unknown_task_kind_is_rejected_at_load_time() {
        let raw = json!({
            "plan": [{"task_type": "summon_dragons", "params": {}}]
        });
        assert!(matches!(ExecutionPlan::from_value(raw), Err(PlanError::Parse(_))));
    }

    #[test]
    fn empty_plan_is_rejected() {
        assert!(matches!(ExecutionPlan::from_value(json!({"plan": []})), Err(PlanError::Empty)));
    }

    #[test]
    fn forward_and_self_references_are_structural_errors() {
        let forward = json!({
            "plan": [
                {"task_type": "execute_query", "params": {"query": "step 2 output.query"}},
                {"task_type": "generate_query", "params": {"goal": "g"}}
            ]
        });
        assert!(matches!(
            ExecutionPlan::from_value(forward),
            Err(PlanError::ForwardReference { step: 1, referenced: 2 })
        ));

        let zero = json!({
            "plan": [{"task_type": "execute_query", "params": {"query": "step 0 output"}}]
        });
        assert!(matches!(ExecutionPlan::from_value(zero), Err(PlanError::ZeroReference { step: 1 })));
    }

    #[test]
    fn both_reference_spellings_parse_to_the_same_ref() {
        let spaced = parse_step_ref("step 3 output.query").expect("spaced form");
        let dollar = parse_step_ref("$step3.output.query").expect("dollar form");
        assert_eq!(spaced, dollar);
        assert_eq!(spaced.step, 3);
        assert_eq!(spaced.path, vec!["query"]);
    }

    #[test]
    fn non_reference_strings_stay_literal() {
        assert!(parse_step_ref("stepwise output").is_none());
        assert!(parse_step_ref("Banking").is_none());
        assert!(parse_step_ref("step one output").is_none());
        assert!(parse_step_ref("step 2 result").is_none());
    }

    #[test]
    fn resolution_walks_nested_paths() {
        let mut state = ExecutionState::new();
        let mut output = Map::new();
        output.insert("graph_data".to_string(), json!({"nodes": [{"name": "Banking"}]}));
        state.record(1, StepResult::ok(output));

        let arg = ArgValue::reference(1, &["graph_data", "nodes"]);
        assert_eq!(resolve_arg(&arg, &state), json!([{"name": "Banking"}]));
    }

    #[test]
    fn resolution_is_idempotent_against_unmodified_state() {
        let mut state = ExecutionState::new();
        let mut output = Map::new();
        output.insert("query".to_string(), json!("MATCH (n) RETURN n"));
        state.record(1, StepResult::ok(output));

        let arg = ArgValue::reference(1, &["query"]);
        let first = resolve_arg(&arg, &state);
        let second = resolve_arg(&arg, &state);
        assert_eq!(first, second);
        assert_eq!(first, json!("MATCH (n) RETURN n"));
    }

    #[test]
    fn missing_failed_and_dead_references_resolve_to_null() {
        let mut state = ExecutionState::new();
        state.record(2, StepResult::fail("boom"));

        assert_eq!(resolve_arg(&ArgValue::reference(1, &[]), &state), Value::Null);
        assert_eq!(resolve_arg(&ArgValue::reference(2, &["query"]), &state), Value::Null);

        let mut output = Map::new();
        output.insert("query".to_string(), json!("q"));
        state.record(3, StepResult::ok(output));
        assert_eq!(resolve_arg(&ArgValue::reference(3, &["missing"]), &state), Value::Null);
    }

    #[test]
    fn step_result_constructors_uphold_the_invariant() {
        let ok = StepResult::ok(Map::new());
        assert!(ok.success && ok.error.is_none() && ok.output.is_some());

        let failed = StepResult::fail("no such entity");
        assert!(!failed.success && failed.output.is_none());
        assert_eq!(failed.error.as_deref(), Some("no such entity"));
    }

    #[test]
    fn reference_round_trips_through_serialization() {
        let step = Step::new(TaskSpec::ExecuteQuery {
            query: ArgValue::reference(1, &["query"]),
            query_params: None,
        });
        let serialized = serde_json::to_value(&step).expect("serialize");
        assert_eq!(serialized["params"]["query"], json!("step 1 output.query"));

        let parsed: Step = serde_json::from_value(serialized).expect("deserialize");
        assert_eq!(parsed.task, step.task);
    }
}
