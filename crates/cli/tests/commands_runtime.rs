use std::env;
use std::fs;
use std::sync::{Mutex, OnceLock};

use atlas_cli::commands::run;
use serde_json::Value;
use tempfile::TempDir;

#[test]
fn run_offline_executes_a_validation_plan() {
    with_env(&[], || {
        let dir = TempDir::new().expect("temp dir");
        let plan_path = dir.path().join("plan.json");
        fs::write(
            &plan_path,
            r#"{
                "plan": [
                    {
                        "task_type": "validate_entity",
                        "params": {"entity_type": "industry", "entity_name": "Banking"},
                        "reasoning": "confirm the industry exists"
                    }
                ]
            }"#,
        )
        .expect("write plan");

        let result = run::run(&plan_path, true);
        assert_eq!(result.exit_code, 0, "offline run should succeed: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["success"], Value::Bool(true));
        assert_eq!(payload["execution_log"].as_array().map(Vec::len), Some(1));
    });
}

#[test]
fn run_rejects_a_plan_with_a_forward_reference() {
    with_env(&[], || {
        let dir = TempDir::new().expect("temp dir");
        let plan_path = dir.path().join("plan.json");
        fs::write(
            &plan_path,
            r#"{
                "plan": [
                    {
                        "task_type": "validate_entity",
                        "params": {"entity_type": "industry", "entity_name": "step 2 output"}
                    },
                    {
                        "task_type": "generate_query",
                        "params": {"goal": "list sectors"}
                    }
                ]
            }"#,
        )
        .expect("write plan");

        let result = run::run(&plan_path, true);
        assert_eq!(result.exit_code, 2, "invalid plan should fail preflight");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "run");
        assert_eq!(payload["error_class"], "plan_validation");
    });
}

#[test]
fn run_reports_a_missing_plan_file() {
    with_env(&[], || {
        let result = run::run(std::path::Path::new("does-not-exist.json"), true);
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "plan_read");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "ATLAS_PRIMARY_PROVIDER",
        "ATLAS_LLAMA_API_KEY",
        "ATLAS_LLAMA_MODEL",
        "ATLAS_LLAMA_BASE_URL",
        "ATLAS_GEMINI_API_KEY",
        "ATLAS_GEMINI_MODEL",
        "ATLAS_GEMINI_BASE_URL",
        "ATLAS_POOL_MAX_ATTEMPTS",
        "ATLAS_POOL_REQUEST_TIMEOUT_SECS",
        "ATLAS_POOL_BUSINESS_TIMEOUT_SECS",
        "ATLAS_SERVER_BIND_ADDRESS",
        "ATLAS_SERVER_PORT",
        "ATLAS_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "ATLAS_LOGGING_LEVEL",
        "ATLAS_LOGGING_FORMAT",
        "ATLAS_LOG_LEVEL",
        "ATLAS_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
