use std::collections::HashSet;

use opsgate_agent::guardrails::{detect_violation, ViolationClass};
use opsgate_agent::{IntentRouter, OpenAiCompatibleClient, RouterDefaults};
use opsgate_core::config::{AppConfig, LoadOptions};
use opsgate_core::{registry, OperationId, UpstreamBinding};
use serde::Serialize;

use super::{escape_json, CommandResult};

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

pub fn run(json_output: bool) -> CommandResult {
    run_with(LoadOptions::default(), json_output)
}

pub fn run_with(options: LoadOptions, json_output: bool) -> CommandResult {
    let report = build_report(options);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    let config = match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            Some(config)
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            None
        }
    };

    checks.push(check_registry());
    checks.push(check_guardrails());
    checks.push(check_router(config.as_ref()));
    checks.push(match config.as_ref() {
        Some(config) => check_llm_backend(config),
        None => DoctorCheck {
            name: "llm_backend",
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        },
    });

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_registry() -> DoctorCheck {
    let operations = registry();
    let unique: HashSet<OperationId> = operations.iter().map(|descriptor| descriptor.id).collect();
    let unbound = operations.iter().find(|descriptor| {
        descriptor.binding.verb().is_none()
            && !matches!(descriptor.binding, UpstreamBinding::Simulated | UpstreamBinding::Local)
    });

    if operations.len() != 15 || unique.len() != operations.len() {
        return DoctorCheck {
            name: "operation_registry",
            status: CheckStatus::Fail,
            details: format!(
                "expected 15 unique operations, found {} ({} unique)",
                operations.len(),
                unique.len()
            ),
        };
    }
    if let Some(descriptor) = unbound {
        return DoctorCheck {
            name: "operation_registry",
            status: CheckStatus::Fail,
            details: format!("`{}` has no read binding", descriptor.id),
        };
    }

    let cluster_reads =
        operations.iter().filter(|descriptor| descriptor.binding.needs_cluster_session()).count();
    DoctorCheck {
        name: "operation_registry",
        status: CheckStatus::Pass,
        details: format!(
            "{} read-only operations ({cluster_reads} cluster-scoped)",
            operations.len()
        ),
    }
}

fn check_guardrails() -> DoctorCheck {
    let blocks_mutation = detect_violation("please delete the deployment in hsps")
        == Some(ViolationClass::DestructiveVerb);
    let allows_reads = detect_violation("what is the status of the aks cluster").is_none();

    if blocks_mutation && allows_reads {
        DoctorCheck {
            name: "guardrail_patterns",
            status: CheckStatus::Pass,
            details: format!("{} violation classes compiled", ViolationClass::ALL.len()),
        }
    } else {
        DoctorCheck {
            name: "guardrail_patterns",
            status: CheckStatus::Fail,
            details: "guardrail sample messages did not classify as expected".to_string(),
        }
    }
}

fn check_router(config: Option<&AppConfig>) -> DoctorCheck {
    let defaults = config.map(RouterDefaults::from_config).unwrap_or_default();
    let router = IntentRouter::new(defaults);
    let routed = router
        .route("what is the status of the aks cluster")
        .map(|intent| intent.operation == OperationId::ClusterStatus && intent.params.is_empty())
        .unwrap_or(false);

    if routed {
        DoctorCheck {
            name: "intent_router",
            status: CheckStatus::Pass,
            details: format!("{} routing rules loaded", IntentRouter::rule_names().count()),
        }
    } else {
        DoctorCheck {
            name: "intent_router",
            status: CheckStatus::Fail,
            details: "cluster status sample did not route to cluster_status".to_string(),
        }
    }
}

fn check_llm_backend(config: &AppConfig) -> DoctorCheck {
    match OpenAiCompatibleClient::from_config(&config.llm) {
        Ok(client) => DoctorCheck {
            name: "llm_backend",
            status: CheckStatus::Pass,
            details: format!("model `{}` at {}", client.model(), client.endpoint()),
        },
        Err(error) => DoctorCheck {
            name: "llm_backend",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
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
