//! Read-only guardrail.
//!
//! Every message is screened against a closed list of pattern classes before any intent
//! routing happens. A match is a violation regardless of what else the message asks for.
//! Violations are counted per session; reaching the threshold resets the conversation and
//! the counter in the same step.

use std::sync::LazyLock;

use opsgate_core::config::GuardrailConfig;
use regex::Regex;
use serde::Serialize;

pub const REFUSAL_MESSAGE: &str = "I'm sorry, but I can only provide read-only information \
     about the system. I cannot execute commands that modify infrastructure or provide \
     sensitive credentials. Please ask me about system status, pod health, or operational \
     metrics instead.";

pub const RESET_MESSAGE: &str = "Sorry, I can't do that. I'm going to reset the chat now.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationClass {
    DestructiveVerb,
    ScalingVerb,
    MutatingKubectl,
    MutatingCloudCli,
    CredentialNoun,
    TenantIdentifier,
    ConnectionString,
    AccessRequest,
    SecurityBypass,
    InfrastructureChange,
}

impl ViolationClass {
    pub const ALL: [Self; 10] = [
        Self::DestructiveVerb,
        Self::ScalingVerb,
        Self::MutatingKubectl,
        Self::MutatingCloudCli,
        Self::CredentialNoun,
        Self::TenantIdentifier,
        Self::ConnectionString,
        Self::AccessRequest,
        Self::SecurityBypass,
        Self::InfrastructureChange,
    ];

    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::DestructiveVerb => "destructive_verb",
            Self::ScalingVerb => "scaling_verb",
            Self::MutatingKubectl => "mutating_kubectl",
            Self::MutatingCloudCli => "mutating_cloud_cli",
            Self::CredentialNoun => "credential_request",
            Self::TenantIdentifier => "tenant_identifier_request",
            Self::ConnectionString => "connection_string_request",
            Self::AccessRequest => "access_request",
            Self::SecurityBypass => "security_bypass",
            Self::InfrastructureChange => "infrastructure_change",
        }
    }

    fn pattern(&self) -> &'static str {
        match self {
            Self::DestructiveVerb => r"(?i)delete|remove|destroy",
            Self::ScalingVerb => r"(?i)scale.*down|scale.*up|scale.*to",
            Self::MutatingKubectl => r"(?i)kubectl\s+(delete|apply|create|patch|edit)",
            Self::MutatingCloudCli => r"(?i)az\s+.*\s+(delete|create|update)",
            Self::CredentialNoun => r"(?i)credentials?|password|secret|api[_-]?key|token",
            Self::TenantIdentifier => r"(?i)subscription[_-]?id|tenant[_-]?id|client[_-]?secret",
            Self::ConnectionString => r"(?i)connection[_-]?string",
            Self::AccessRequest => r"(?i)give\s+me\s+(access|permission)",
            Self::SecurityBypass => r"(?i)bypass|override|disable.*security",
            Self::InfrastructureChange => r"(?i)modify|update|change.*infrastructure",
        }
    }
}

static PATTERNS: LazyLock<Vec<(ViolationClass, Regex)>> = LazyLock::new(|| {
    ViolationClass::ALL
        .iter()
        .map(|class| {
            (*class, Regex::new(class.pattern()).expect("guardrail pattern is valid"))
        })
        .collect()
});

/// First matching class in declaration order, if any.
pub fn detect_violation(text: &str) -> Option<ViolationClass> {
    PATTERNS.iter().find(|(_, pattern)| pattern.is_match(text)).map(|(class, _)| *class)
}

/// Per-session count of violations since the last reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ViolationCounter {
    count: u32,
}

impl ViolationCounter {
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailState {
    Normal,
    /// One more violation resets the conversation.
    Warned,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Clean,
    Violation { count: u32, class: ViolationClass, user_message: &'static str },
    /// The threshold was reached. The counter is already back at zero and the caller must
    /// clear the conversation history.
    Reset { class: ViolationClass, user_message: &'static str },
}

impl GuardrailDecision {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }

    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::Clean => None,
            Self::Violation { class, .. } | Self::Reset { class, .. } => Some(class.reason_code()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    threshold: u32,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { threshold: 3 }
    }
}

impl GuardrailPolicy {
    /// A threshold of zero is treated as one.
    pub fn new(threshold: u32) -> Self {
        Self { threshold: threshold.max(1) }
    }

    pub fn from_config(config: &GuardrailConfig) -> Self {
        Self::new(config.violation_threshold)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn state(&self, counter: &ViolationCounter) -> GuardrailState {
        if counter.count + 1 >= self.threshold {
            GuardrailState::Warned
        } else {
            GuardrailState::Normal
        }
    }

    pub fn evaluate(&self, counter: &mut ViolationCounter, text: &str) -> GuardrailDecision {
        let Some(class) = detect_violation(text) else {
            return GuardrailDecision::Clean;
        };

        counter.count += 1;
        if counter.count >= self.threshold {
            counter.reset();
            return GuardrailDecision::Reset { class, user_message: RESET_MESSAGE };
        }

        GuardrailDecision::Violation {
            count: counter.count,
            class,
            user_message: REFUSAL_MESSAGE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        detect_violation, GuardrailDecision, GuardrailPolicy, GuardrailState, ViolationClass,
        ViolationCounter, REFUSAL_MESSAGE, RESET_MESSAGE,
    };

    #[test]
    fn every_pattern_compiles() {
        for class in ViolationClass::ALL {
            assert!(regex::Regex::new(class.pattern()).is_ok(), "{class:?}");
        }
    }

    fn assert_class(texts: &[&str], class: ViolationClass) {
        for text in texts {
            assert_eq!(detect_violation(text), Some(class), "{text}");
        }
    }

    #[test]
    fn destructive_verbs() {
        assert_class(
            &["please DELETE the portal pod", "remove the old release", "destroy the cluster"],
            ViolationClass::DestructiveVerb,
        );
    }

    #[test]
    fn scaling_verbs() {
        assert_class(&["scale the portal down", "Scale workers to 5"], ViolationClass::ScalingVerb);
    }

    #[test]
    fn mutating_kubectl() {
        assert_class(
            &["kubectl apply -f app.yaml", "kubectl   patch deploy portal"],
            ViolationClass::MutatingKubectl,
        );
        assert_eq!(detect_violation("kubectl get pods"), None);
    }

    #[test]
    fn mutating_cloud_cli() {
        assert_eq!(
            detect_violation("az webapp config create now"),
            Some(ViolationClass::MutatingCloudCli)
        );
        assert_eq!(detect_violation("az aks show"), None);
    }

    #[test]
    fn credential_nouns() {
        assert_class(
            &[
                "what is the admin password",
                "show the api-key",
                "share your apikey",
                "which credential is used",
                "bearer token please",
            ],
            ViolationClass::CredentialNoun,
        );
    }

    #[test]
    fn tenant_identifiers() {
        assert_class(
            &["what is our subscription-id", "tenant_id?"],
            ViolationClass::TenantIdentifier,
        );
    }

    #[test]
    fn connection_strings() {
        assert_eq!(
            detect_violation("print the storage connection_string"),
            Some(ViolationClass::ConnectionString)
        );
    }

    #[test]
    fn access_requests() {
        assert_class(
            &["give me access to prod", "Give  me permission"],
            ViolationClass::AccessRequest,
        );
    }

    #[test]
    fn security_bypass() {
        assert_class(
            &["bypass the approval", "disable the network security group"],
            ViolationClass::SecurityBypass,
        );
    }

    #[test]
    fn infrastructure_change() {
        assert_class(
            &["modify the app settings", "change the infrastructure layout"],
            ViolationClass::InfrastructureChange,
        );
    }

    #[test]
    fn read_only_questions_are_clean() {
        for text in [
            "what is the status of the aks cluster",
            "list hsps pods",
            "show me the cost summary",
            "how are the node pools doing",
            "what can you do",
        ] {
            assert_eq!(detect_violation(text), None, "{text}");
        }
    }

    #[test]
    fn violation_takes_precedence_over_read_intent() {
        let policy = GuardrailPolicy::default();
        let mut counter = ViolationCounter::default();

        let decision = policy.evaluate(&mut counter, "please delete the deployment in hsps");

        assert_eq!(
            decision,
            GuardrailDecision::Violation {
                count: 1,
                class: ViolationClass::DestructiveVerb,
                user_message: REFUSAL_MESSAGE,
            }
        );
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn third_violation_resets_counter_in_the_same_call() {
        let policy = GuardrailPolicy::default();
        let mut counter = ViolationCounter::default();

        let first = policy.evaluate(&mut counter, "delete it");
        assert!(matches!(first, GuardrailDecision::Violation { count: 1, .. }));
        assert_eq!(policy.state(&counter), GuardrailState::Normal);

        let second = policy.evaluate(&mut counter, "show the password");
        assert!(matches!(second, GuardrailDecision::Violation { count: 2, .. }));
        assert_eq!(policy.state(&counter), GuardrailState::Warned);

        let third = policy.evaluate(&mut counter, "bypass it");
        assert_eq!(
            third,
            GuardrailDecision::Reset {
                class: ViolationClass::SecurityBypass,
                user_message: RESET_MESSAGE,
            }
        );
        assert_eq!(counter.count(), 0);
        assert_eq!(policy.state(&counter), GuardrailState::Normal);
    }

    #[test]
    fn clean_messages_leave_the_counter_alone() {
        let policy = GuardrailPolicy::default();
        let mut counter = ViolationCounter::default();
        policy.evaluate(&mut counter, "delete");

        assert_eq!(policy.evaluate(&mut counter, "list star pods"), GuardrailDecision::Clean);
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn threshold_of_one_resets_immediately() {
        let policy = GuardrailPolicy::new(0);
        let mut counter = ViolationCounter::default();

        assert_eq!(policy.threshold(), 1);
        let decision = policy.evaluate(&mut counter, "destroy");
        assert!(matches!(decision, GuardrailDecision::Reset { .. }));
        assert_eq!(counter.count(), 0);
    }
}
