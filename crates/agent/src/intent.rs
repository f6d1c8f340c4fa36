//! Keyword intent router.
//!
//! [`RULES`] is an ordered, closed list. The first rule whose predicate holds decides the
//! operation; there is no scoring and no fallback to a later rule. Pod-scoped rules cannot
//! parse a pod name out of free text, so they substitute [`POD_NAME_PLACEHOLDER`] and mark
//! the match as degraded instead of failing.

use opsgate_core::config::AppConfig;
use opsgate_core::{registry, OperationCall, OperationId, ProxyError};
use serde::Serialize;

pub const POD_NAME_PLACEHOLDER: &str = "pod-name";

const CAPABILITY_PHRASES: &[&str] = &["what can you do", "capabilities", "features"];

/// Names the router fills in when the text does not carry them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterDefaults {
    pub default_namespace: String,
    pub alternate_namespace: String,
    pub resource_group: String,
    pub web_app: String,
    pub function_app: String,
    pub storage_account: String,
}

impl RouterDefaults {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            default_namespace: config.cluster.default_namespace.to_lowercase(),
            alternate_namespace: config.cluster.alternate_namespace.to_lowercase(),
            resource_group: config.azure.resource_group.clone(),
            web_app: config.cluster.web_app.clone(),
            function_app: config.cluster.function_app.clone(),
            storage_account: config.cluster.storage_account.clone(),
        }
    }
}

impl Default for RouterDefaults {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IntentMatch {
    pub operation: OperationId,
    pub params: Vec<String>,
    /// A placeholder stood in for a parameter the text did not supply.
    pub degraded: bool,
    pub rule: &'static str,
}

impl IntentMatch {
    pub fn call(&self) -> Result<OperationCall, ProxyError> {
        OperationCall::new(self.operation, self.params.clone())
    }
}

struct Utterance<'a> {
    text: String,
    defaults: &'a RouterDefaults,
}

impl Utterance<'_> {
    fn has(&self, needle: &str) -> bool {
        self.text.contains(needle)
    }

    fn has_any(&self, needles: &[&str]) -> bool {
        needles.iter().any(|needle| self.has(needle))
    }

    fn mentions_default_namespace(&self) -> bool {
        self.has(&self.defaults.default_namespace)
    }

    fn mentions_alternate_namespace(&self) -> bool {
        self.has(&self.defaults.alternate_namespace)
    }

    fn namespace(&self) -> &str {
        if self.mentions_alternate_namespace() {
            &self.defaults.alternate_namespace
        } else {
            &self.defaults.default_namespace
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Extract {
    Nothing,
    DefaultNamespace,
    AlternateNamespace,
    MentionedNamespace,
    NamespaceAndPod,
    ResourceGroup,
    WebApp,
    FunctionApp,
    StorageAccount,
}

impl Extract {
    fn apply(self, utterance: &Utterance<'_>) -> (Vec<String>, bool) {
        let defaults = utterance.defaults;
        match self {
            Self::Nothing => (Vec::new(), false),
            Self::DefaultNamespace => (vec![defaults.default_namespace.clone()], false),
            Self::AlternateNamespace => (vec![defaults.alternate_namespace.clone()], false),
            Self::MentionedNamespace => (vec![utterance.namespace().to_string()], false),
            Self::NamespaceAndPod => (
                vec![utterance.namespace().to_string(), POD_NAME_PLACEHOLDER.to_string()],
                true,
            ),
            Self::ResourceGroup => (vec![defaults.resource_group.clone()], false),
            Self::WebApp => (vec![defaults.web_app.clone()], false),
            Self::FunctionApp => (vec![defaults.function_app.clone()], false),
            Self::StorageAccount => (vec![defaults.storage_account.clone()], false),
        }
    }
}

struct IntentRule {
    name: &'static str,
    operation: OperationId,
    predicate: fn(&Utterance<'_>) -> bool,
    extract: Extract,
}

static RULES: [IntentRule; 15] = [
    IntentRule {
        name: "cluster_status",
        operation: OperationId::ClusterStatus,
        predicate: |u| u.has("aks") && u.has_any(&["status", "health", "cluster"]),
        extract: Extract::Nothing,
    },
    IntentRule {
        name: "default_namespace_pods",
        operation: OperationId::ListPods,
        predicate: |u| u.mentions_default_namespace() && u.has_any(&["pod", "list"]),
        extract: Extract::DefaultNamespace,
    },
    IntentRule {
        name: "alternate_namespace_pods",
        operation: OperationId::ListPods,
        predicate: |u| u.mentions_alternate_namespace() && u.has_any(&["pod", "list"]),
        extract: Extract::AlternateNamespace,
    },
    IntentRule {
        name: "pod_details",
        operation: OperationId::PodDetails,
        predicate: |u| u.has("pod") && u.has("detail"),
        extract: Extract::NamespaceAndPod,
    },
    IntentRule {
        name: "resource_group",
        operation: OperationId::ResourceGroupInfo,
        predicate: |u| u.has_any(&["resource group", "resourcegroup"]),
        extract: Extract::ResourceGroup,
    },
    IntentRule {
        name: "list_resources",
        operation: OperationId::ListResources,
        predicate: |u| u.has("list") && u.has("resource"),
        extract: Extract::Nothing,
    },
    IntentRule {
        name: "web_app",
        operation: OperationId::WebAppStatus,
        predicate: |u| u.has_any(&["app service", "appservice", "web app"]),
        extract: Extract::WebApp,
    },
    IntentRule {
        name: "function_app",
        operation: OperationId::FunctionAppStatus,
        predicate: |u| u.has_any(&["function app", "functionapp", "shutdown"]),
        extract: Extract::FunctionApp,
    },
    IntentRule {
        name: "storage_account",
        operation: OperationId::StorageAccountInfo,
        predicate: |u| u.has("storage"),
        extract: Extract::StorageAccount,
    },
    IntentRule {
        name: "node_pools",
        operation: OperationId::NodePools,
        predicate: |u| u.has("node") && u.has_any(&["pool", "aks"]),
        extract: Extract::Nothing,
    },
    IntentRule {
        name: "deployments",
        operation: OperationId::DeploymentStatus,
        predicate: |u| u.has("deployment"),
        extract: Extract::MentionedNamespace,
    },
    IntentRule {
        name: "services",
        operation: OperationId::ServiceStatus,
        predicate: |u| u.has("service") && !u.has("app service"),
        extract: Extract::MentionedNamespace,
    },
    IntentRule {
        name: "pod_logs",
        operation: OperationId::PodLogs,
        predicate: |u| u.has("log"),
        extract: Extract::NamespaceAndPod,
    },
    IntentRule {
        name: "subscription",
        operation: OperationId::SubscriptionInfo,
        predicate: |u| u.has("subscription"),
        extract: Extract::Nothing,
    },
    IntentRule {
        name: "costs",
        operation: OperationId::CostSummary,
        predicate: |u| u.has_any(&["cost", "spending", "bill"]),
        extract: Extract::Nothing,
    },
];

#[derive(Clone, Debug, Default)]
pub struct IntentRouter {
    defaults: RouterDefaults,
}

impl IntentRouter {
    pub fn new(defaults: RouterDefaults) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &RouterDefaults {
        &self.defaults
    }

    pub fn route(&self, text: &str) -> Option<IntentMatch> {
        let utterance = Utterance { text: text.to_lowercase(), defaults: &self.defaults };

        RULES.iter().find(|rule| (rule.predicate)(&utterance)).map(|rule| {
            let (params, degraded) = rule.extract.apply(&utterance);
            IntentMatch { operation: rule.operation, params, degraded, rule: rule.name }
        })
    }

    /// Rule names in evaluation order.
    pub fn rule_names() -> impl Iterator<Item = &'static str> {
        RULES.iter().map(|rule| rule.name)
    }
}

pub fn is_capability_query(text: &str) -> bool {
    let text = text.to_lowercase();
    CAPABILITY_PHRASES.iter().any(|phrase| text.contains(phrase))
}

/// Static catalog shown for capability questions. Never touches an upstream.
pub fn capability_catalog() -> String {
    let mut catalog = String::from(
        "I can answer read-only questions about the environment. Available operations:\n",
    );
    for (index, descriptor) in registry().iter().enumerate() {
        catalog.push_str(&format!(
            "{}. {}: {}\n",
            index + 1,
            descriptor.display_name,
            descriptor.description
        ));
    }
    catalog.push_str("\nI cannot change, scale or delete anything, and I never share credentials.");
    catalog
}
