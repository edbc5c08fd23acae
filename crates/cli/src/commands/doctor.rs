use atlas_core::config::{AppConfig, LoadOptions};
use atlas_graph::{EntityKind, GraphStore, MemoryGraphStore};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_provider_readiness(&config));
            checks.push(check_graph_store());
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(DoctorCheck {
                name: "provider_readiness",
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            });
            checks.push(DoctorCheck {
                name: "graph_store",
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            });
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_provider_readiness(config: &AppConfig) -> DoctorCheck {
    let pool = config.build_pool();
    let statuses = pool.configured_providers();

    let details = statuses
        .iter()
        .map(|(name, configured)| {
            format!("{name}: {}", if *configured { "configured" } else { "missing api key" })
        })
        .collect::<Vec<_>>()
        .join(", ");

    let any_configured = statuses.iter().any(|(_, configured)| *configured);
    let primary = config.providers.primary.as_str();
    DoctorCheck {
        name: "provider_readiness",
        status: if any_configured { CheckStatus::Pass } else { CheckStatus::Fail },
        details: if any_configured {
            format!("primary: {primary}; {details}")
        } else {
            format!("no provider has an api key (primary: {primary}; {details})")
        },
    }
}

fn check_graph_store() -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "graph_store",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let store = MemoryGraphStore::seeded();
        let matches = store
            .lookup_nodes(EntityKind::Industry, "Banking")
            .await
            .map_err(|error| format!("catalog lookup failed: {error}"))?;
        if matches.is_empty() {
            return Err("seeded catalog returned no match for a known industry".to_string());
        }
        Ok::<usize, String>(matches.len())
    });

    match result {
        Ok(count) => DoctorCheck {
            name: "graph_store",
            status: CheckStatus::Pass,
            details: format!("seeded catalog resolved a known industry ({count} match(es))"),
        },
        Err(error) => DoctorCheck { name: "graph_store", status: CheckStatus::Fail, details: error },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
