use std::sync::Arc;

use opsgate_core::config::AppConfig;
use opsgate_core::{OperationExecutor, OperationId, ResourceSnapshot};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::conversation::{ChatMessage, ConversationHistory};
use crate::guardrails::{GuardrailDecision, GuardrailPolicy, GuardrailState, ViolationCounter};
use crate::intent::{
    capability_catalog, is_capability_query, IntentMatch, IntentRouter, RouterDefaults,
};
use crate::llm::LlmClient;

pub const GENERATION_FAILED_MESSAGE: &str =
    "I apologize, but I encountered an error processing your request. Please try again.";

/// Per-session state. Never shared between sessions.
#[derive(Clone, Debug)]
pub struct SessionContext {
    id: String,
    history: ConversationHistory,
    violations: ViolationCounter,
}

impl SessionContext {
    pub fn new(id: impl Into<String>, history_limit: usize) -> Self {
        Self {
            id: id.into(),
            history: ConversationHistory::new(history_limit),
            violations: ViolationCounter::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn violation_count(&self) -> u32 {
        self.violations.count()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.violations.reset();
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnOutcome {
    Answered {
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<OperationId>,
    },
    Capabilities,
    Refused,
    Reset,
    GenerationFailed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnReply {
    pub message: String,
    pub outcome: TurnOutcome,
    /// For logs and diagnostics only.
    pub violation_count: u32,
}

/// Runs one chat turn: guardrail, capability short-circuit, intent routing, optional
/// resource read, then generation.
pub struct AgentRuntime {
    guardrails: GuardrailPolicy,
    router: IntentRouter,
    executor: Arc<dyn OperationExecutor>,
    llm: Arc<dyn LlmClient>,
    history_limit: usize,
    system_prompt: String,
}

impl AgentRuntime {
    pub fn new(
        guardrails: GuardrailPolicy,
        router: IntentRouter,
        executor: Arc<dyn OperationExecutor>,
        llm: Arc<dyn LlmClient>,
        history_limit: usize,
    ) -> Self {
        let system_prompt = system_prompt(router.defaults(), None);
        Self { guardrails, router, executor, llm, history_limit, system_prompt }
    }

    pub fn from_config(
        config: &AppConfig,
        executor: Arc<dyn OperationExecutor>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        let defaults = RouterDefaults::from_config(config);
        let system_prompt = system_prompt(&defaults, Some(&config.azure.cluster_name));
        Self {
            guardrails: GuardrailPolicy::from_config(&config.guardrails),
            router: IntentRouter::new(defaults),
            executor,
            llm,
            history_limit: config.guardrails.history_limit,
            system_prompt,
        }
    }

    pub fn new_session(&self, id: impl Into<String>) -> SessionContext {
        SessionContext::new(id, self.history_limit)
    }

    pub fn guardrails(&self) -> &GuardrailPolicy {
        &self.guardrails
    }

    pub fn router(&self) -> &IntentRouter {
        &self.router
    }

    pub fn guardrail_state(&self, session: &SessionContext) -> GuardrailState {
        self.guardrails.state(&session.violations)
    }

    pub async fn handle_message(&self, session: &mut SessionContext, text: &str) -> TurnReply {
        match self.guardrails.evaluate(&mut session.violations, text) {
            GuardrailDecision::Clean => {}
            GuardrailDecision::Violation { count, class, user_message } => {
                warn!(
                    event_name = "guardrail.violation",
                    session_id = %session.id,
                    reason_code = class.reason_code(),
                    violation_count = count,
                    state = ?self.guardrail_state(session),
                    "read-only guardrail refused message"
                );
                return TurnReply {
                    message: user_message.to_string(),
                    outcome: TurnOutcome::Refused,
                    violation_count: count,
                };
            }
            GuardrailDecision::Reset { class, user_message } => {
                session.history.clear();
                warn!(
                    event_name = "guardrail.reset",
                    session_id = %session.id,
                    reason_code = class.reason_code(),
                    "violation threshold reached; conversation reset"
                );
                return TurnReply {
                    message: user_message.to_string(),
                    outcome: TurnOutcome::Reset,
                    violation_count: session.violations.count(),
                };
            }
        }

        if is_capability_query(text) {
            return TurnReply {
                message: capability_catalog(),
                outcome: TurnOutcome::Capabilities,
                violation_count: session.violations.count(),
            };
        }

        let intent = self.router.route(text);
        let note = match &intent {
            Some(intent) => Some(self.resource_note(session, intent).await),
            None => None,
        };

        let prompt = self.build_prompt(session, text, note.as_deref());
        match self.llm.complete(&prompt).await {
            Ok(reply) => {
                session.history.push_exchange(text, reply.clone());
                info!(
                    event_name = "agent.turn.answered",
                    session_id = %session.id,
                    operation = intent
                        .as_ref()
                        .map(|intent| intent.operation.as_str())
                        .unwrap_or("none"),
                    history_len = session.history.len(),
                    "chat turn answered"
                );
                TurnReply {
                    message: reply,
                    outcome: TurnOutcome::Answered {
                        operation: intent.map(|intent| intent.operation),
                    },
                    violation_count: session.violations.count(),
                }
            }
            Err(error) => {
                warn!(
                    event_name = "agent.turn.generation_failed",
                    session_id = %session.id,
                    error = %error,
                    "language backend failed; history left unchanged"
                );
                TurnReply {
                    message: GENERATION_FAILED_MESSAGE.to_string(),
                    outcome: TurnOutcome::GenerationFailed,
                    violation_count: session.violations.count(),
                }
            }
        }
    }

    async fn resource_note(&self, session: &SessionContext, intent: &IntentMatch) -> String {
        if intent.degraded {
            debug!(
                event_name = "intent.degraded",
                session_id = %session.id,
                rule = intent.rule,
                operation = %intent.operation,
                "placeholder parameter substituted"
            );
        }

        let result = match intent.call() {
            Ok(call) => self.executor.execute(&call).await,
            Err(error) => Err(error),
        };

        match result {
            Ok(snapshot) => live_data_note(&snapshot),
            Err(error) => {
                warn!(
                    event_name = "agent.resource.unavailable",
                    session_id = %session.id,
                    operation = %intent.operation,
                    reason_code = error.reason_code(),
                    "resource data unavailable for turn"
                );
                format!(
                    "[Data unavailable: {error}]\nThe live read for `{}` failed. Say so plainly \
                     and do not invent values.",
                    intent.operation
                )
            }
        }
    }

    /// History is read, never mutated; a failed generation leaves the session untouched.
    fn build_prompt(
        &self,
        session: &SessionContext,
        text: &str,
        note: Option<&str>,
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(session.history.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(session.history.iter().cloned());
        messages.push(ChatMessage::user(match note {
            Some(note) => format!("{text}\n\n{note}"),
            None => text.to_string(),
        }));
        messages
    }
}

fn live_data_note(snapshot: &ResourceSnapshot) -> String {
    let descriptor = snapshot.operation.descriptor();
    let data = serde_json::to_string_pretty(&snapshot.data)
        .unwrap_or_else(|_| snapshot.data.to_string());
    let mut note = format!("[Live data: {}]\n{data}", descriptor.display_name);
    if snapshot.operation == OperationId::CostSummary {
        note.push_str("\nThese cost figures are simulated, not billed amounts.");
    }
    note
}

fn system_prompt(defaults: &RouterDefaults, cluster_name: Option<&str>) -> String {
    let mut prompt = String::from(
        "You are a read-only operations assistant for a cloud environment. You help operations \
         engineers understand the state of their cloud resources and cluster workloads.\n\n\
         RULES:\n\
         1. You can only report information. You cannot modify, delete, scale, restart or \
         create anything, and you must not suggest that you can.\n\
         2. Never reveal credentials, API keys, secrets, tokens, subscription or tenant \
         identifiers, or connection strings.\n\
         3. When a message contains a [Live data: ...] block, base your answer on it. When it \
         contains a [Data unavailable: ...] block, say the data could not be retrieved and \
         never make values up.\n\
         4. Flag anything that looks unhealthy, such as pods that are not ready, high restart \
         counts or stopped apps, even if the user did not ask.\n\
         5. Keep answers concise. Use short lists for pods, resources and similar items.\n\n\
         ENVIRONMENT:\n",
    );
    prompt.push_str(&format!(
        "- Namespaces: {}, {}\n- Resource group: {}\n",
        defaults.default_namespace, defaults.alternate_namespace, defaults.resource_group
    ));
    if let Some(cluster_name) = cluster_name {
        prompt.push_str(&format!("- Cluster: {cluster_name}\n"));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::{system_prompt, SessionContext};
    use crate::intent::RouterDefaults;

    #[test]
    fn system_prompt_names_environment() {
        let prompt = system_prompt(&RouterDefaults::default(), Some("hsps-aks-cluster"));
        assert!(prompt.contains("Namespaces: hsps, star"));
        assert!(prompt.contains("Cluster: hsps-aks-cluster"));
        assert!(prompt.contains("read-only"));
    }

    #[test]
    fn session_reset_clears_history_and_counter() {
        let mut session = SessionContext::new("s-1", 20);
        session.history.push_exchange("aks status", "Running");
        session.reset();

        assert!(session.history().is_empty());
        assert_eq!(session.violation_count(), 0);
        assert_eq!(session.id(), "s-1");
    }
}
