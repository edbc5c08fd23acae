use std::fs;
use std::path::Path;
use std::sync::Arc;

use atlas_core::config::{AppConfig, LoadOptions};
use atlas_core::orchestrator::Orchestrator;
use atlas_core::plan::ExecutionPlan;
use atlas_core::response::ExecutionOutcome;
use atlas_graph::MemoryGraphStore;
use atlas_providers::{MockProvider, PoolConfig, ProviderPool, TextProvider};
use tokio_util::sync::CancellationToken;

use crate::commands::CommandResult;

pub fn run(plan_path: &Path, offline: bool) -> CommandResult {
    let raw = match fs::read_to_string(plan_path) {
        Ok(raw) => raw,
        Err(error) => {
            return CommandResult::failure(
                "run",
                "plan_read",
                format!("could not read plan file `{}`: {error}", plan_path.display()),
                2,
            );
        }
    };

    let plan = match ExecutionPlan::from_json(&raw) {
        Ok(plan) => plan,
        Err(error) => {
            return CommandResult::failure("run", "plan_validation", error.to_string(), 2);
        }
    };

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("run", "config_validation", error.to_string(), 2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "run",
                "runtime",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let outcome = runtime.block_on(execute(&config, plan, offline));
    render_outcome(outcome)
}

async fn execute(config: &AppConfig, plan: ExecutionPlan, offline: bool) -> ExecutionOutcome {
    let pool = if offline {
        let provider: Arc<dyn TextProvider> =
            Arc::new(MockProvider::with_responses("offline", Vec::new()));
        Arc::new(ProviderPool::new(vec![provider], PoolConfig::default()))
    } else {
        Arc::new(config.build_pool())
    };

    let graph = Arc::new(MemoryGraphStore::seeded());
    let orchestrator = Orchestrator::with_config(graph, pool, config.orchestrator_config());

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    orchestrator.execute_plan(plan, cancel).await
}

fn render_outcome(outcome: ExecutionOutcome) -> CommandResult {
    let exit_code = match &outcome {
        ExecutionOutcome::Success { .. } | ExecutionOutcome::NeedsClarification { .. } => 0,
        ExecutionOutcome::Failure { .. } => 1,
    };

    match serde_json::to_string_pretty(&outcome) {
        Ok(output) => CommandResult { exit_code, output },
        Err(error) => CommandResult::failure(
            "run",
            "serialization",
            format!("could not serialize execution outcome: {error}"),
            3,
        ),
    }
}
