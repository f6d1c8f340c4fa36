use opsgate_agent::guardrails::{GuardrailPolicy, ViolationCounter};
use opsgate_agent::intent::is_capability_query;
use opsgate_agent::{IntentRouter, RouterDefaults};
use opsgate_core::config::{AppConfig, LoadOptions};
use opsgate_core::OperationId;
use serde::Serialize;

use super::{to_pretty_json, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Decision {
    Refused,
    Capabilities,
    Routed,
    Unrouted,
}

#[derive(Debug, Serialize)]
struct Classification {
    decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    operation: Option<OperationId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    params: Vec<String>,
    degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    rule: Option<&'static str>,
}

/// Offline dry run of the first two turn stages. Never calls an upstream or the language
/// backend.
pub fn run(text: &str) -> CommandResult {
    let defaults = AppConfig::load(LoadOptions::default())
        .map(|config| RouterDefaults::from_config(&config))
        .unwrap_or_default();
    to_pretty_json("classify", &classify(&IntentRouter::new(defaults), text))
}

fn classify(router: &IntentRouter, text: &str) -> Classification {
    let mut counter = ViolationCounter::default();
    let decision = GuardrailPolicy::default().evaluate(&mut counter, text);
    if !decision.is_clean() {
        return Classification {
            decision: Decision::Refused,
            reason_code: decision.reason_code(),
            operation: None,
            params: Vec::new(),
            degraded: false,
            rule: None,
        };
    }

    if is_capability_query(text) {
        return Classification {
            decision: Decision::Capabilities,
            reason_code: None,
            operation: None,
            params: Vec::new(),
            degraded: false,
            rule: None,
        };
    }

    match router.route(text) {
        Some(intent) => Classification {
            decision: Decision::Routed,
            reason_code: None,
            operation: Some(intent.operation),
            params: intent.params,
            degraded: intent.degraded,
            rule: Some(intent.rule),
        },
        None => Classification {
            decision: Decision::Unrouted,
            reason_code: None,
            operation: None,
            params: Vec::new(),
            degraded: false,
            rule: None,
        },
    }
}
