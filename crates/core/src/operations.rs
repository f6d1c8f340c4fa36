//! The closed registry of read-only operations.
//!
//! Every question the gateway can answer with live data maps onto exactly one entry of
//! [`REGISTRY`]. Each entry names the single upstream read it performs through an
//! [`UpstreamBinding`], and bindings only exist for get/list-class reads, so the table
//! itself is the audit record of what the gateway is able to touch.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ProxyError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationId {
    ClusterStatus,
    NodePools,
    DeploymentStatus,
    ServiceStatus,
    ListPods,
    PodDetails,
    PodLogs,
    ResourceGroupInfo,
    ListResources,
    WebAppStatus,
    FunctionAppStatus,
    StorageAccountInfo,
    SubscriptionInfo,
    CostSummary,
    HealthCheck,
}

impl OperationId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClusterStatus => "cluster_status",
            Self::NodePools => "node_pools",
            Self::DeploymentStatus => "deployment_status",
            Self::ServiceStatus => "service_status",
            Self::ListPods => "list_pods",
            Self::PodDetails => "pod_details",
            Self::PodLogs => "pod_logs",
            Self::ResourceGroupInfo => "resource_group_info",
            Self::ListResources => "list_resources",
            Self::WebAppStatus => "web_app_status",
            Self::FunctionAppStatus => "function_app_status",
            Self::StorageAccountInfo => "storage_account_info",
            Self::SubscriptionInfo => "subscription_info",
            Self::CostSummary => "cost_summary",
            Self::HealthCheck => "health_check",
        }
    }

    pub fn descriptor(&self) -> &'static OperationDescriptor {
        // The registry is ordered by declaration order of the enum.
        &REGISTRY[*self as usize]
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Namespace,
    PodName,
    ResourceGroup,
    ResourceName,
}

impl ParamKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::PodName => "pod name",
            Self::ResourceGroup => "resource group",
            Self::ResourceName => "resource name",
        }
    }

    /// Accepts only values that stay a single path segment upstream.
    ///
    /// Namespaces are DNS-1123 labels and pod names DNS-1123 subdomains. Management resource
    /// names use the cloud's `[A-Za-z0-9._()-]` set and may not contain `..`.
    pub fn check(&self, value: &str) -> Result<(), String> {
        let valid = match self {
            Self::Namespace => is_dns_label(value),
            Self::PodName => value.len() <= 253 && value.split('.').all(is_dns_label),
            Self::ResourceGroup => is_resource_name(value, 90),
            Self::ResourceName => is_resource_name(value, 260),
        };
        if valid {
            Ok(())
        } else {
            Err(format!("`{value}` is not a valid {}", self.label()))
        }
    }
}

fn is_dns_label(value: &str) -> bool {
    let bytes = value.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            bytes.len() <= 63
                && first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes.iter().all(|byte| {
                    byte.is_ascii_lowercase() || byte.is_ascii_digit() || *byte == b'-'
                })
        }
        _ => false,
    }
}

fn is_resource_name(value: &str, max_len: usize) -> bool {
    !value.is_empty()
        && value.len() <= max_len
        && !value.contains("..")
        && !value.ends_with('.')
        && value.bytes().all(|byte| {
            byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'(' | b')' | b'-')
        })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadVerb {
    Get,
    List,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagementRead {
    GetManagedCluster,
    ListAgentPools,
    GetResourceGroup,
    ListResourcesInGroup,
    GetWebSite,
    GetStorageAccount,
    GetSubscription,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterRead {
    ListPods,
    ReadPod,
    ReadPodLog,
    ListDeployments,
    ListServices,
}

/// The upstream call an operation is wired to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "read", rename_all = "snake_case")]
pub enum UpstreamBinding {
    Management(ManagementRead),
    /// Cluster credential fetch from the management API, then one read on the cluster API.
    Cluster(ClusterRead),
    Simulated,
    Local,
}

impl UpstreamBinding {
    /// `None` for bindings that never leave the process.
    pub fn verb(&self) -> Option<ReadVerb> {
        match self {
            Self::Management(read) => Some(match read {
                ManagementRead::ListAgentPools | ManagementRead::ListResourcesInGroup => {
                    ReadVerb::List
                }
                ManagementRead::GetManagedCluster
                | ManagementRead::GetResourceGroup
                | ManagementRead::GetWebSite
                | ManagementRead::GetStorageAccount
                | ManagementRead::GetSubscription => ReadVerb::Get,
            }),
            Self::Cluster(read) => Some(match read {
                ClusterRead::ListPods
                | ClusterRead::ListDeployments
                | ClusterRead::ListServices => ReadVerb::List,
                ClusterRead::ReadPod | ClusterRead::ReadPodLog => ReadVerb::Get,
            }),
            Self::Simulated | Self::Local => None,
        }
    }

    pub fn needs_cluster_session(&self) -> bool {
        matches!(self, Self::Cluster(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultShape {
    Record,
    Collection,
    LogTail,
    Masked,
    Simulated,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct OperationDescriptor {
    pub id: OperationId,
    pub display_name: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamKind],
    pub binding: UpstreamBinding,
    pub result: ResultShape,
}

impl OperationDescriptor {
    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

pub const POD_LOG_TAIL_LINES: usize = 50;

pub static REGISTRY: [OperationDescriptor; 15] = [
    OperationDescriptor {
        id: OperationId::ClusterStatus,
        display_name: "Get AKS Cluster Status",
        description: "Current status and health of the AKS cluster with a node-pool summary",
        params: &[],
        binding: UpstreamBinding::Management(ManagementRead::GetManagedCluster),
        result: ResultShape::Record,
    },
    OperationDescriptor {
        id: OperationId::NodePools,
        display_name: "Get AKS Node Pools",
        description: "AKS node pool configuration and status",
        params: &[],
        binding: UpstreamBinding::Management(ManagementRead::ListAgentPools),
        result: ResultShape::Collection,
    },
    OperationDescriptor {
        id: OperationId::DeploymentStatus,
        display_name: "Get Deployment Status",
        description: "Deployment replica status in a namespace",
        params: &[ParamKind::Namespace],
        binding: UpstreamBinding::Cluster(ClusterRead::ListDeployments),
        result: ResultShape::Collection,
    },
    OperationDescriptor {
        id: OperationId::ServiceStatus,
        display_name: "Get Service Status",
        description: "Kubernetes services in a namespace",
        params: &[ParamKind::Namespace],
        binding: UpstreamBinding::Cluster(ClusterRead::ListServices),
        result: ResultShape::Collection,
    },
    OperationDescriptor {
        id: OperationId::ListPods,
        display_name: "List Pods",
        description: "All pods running in a namespace",
        params: &[ParamKind::Namespace],
        binding: UpstreamBinding::Cluster(ClusterRead::ListPods),
        result: ResultShape::Collection,
    },
    OperationDescriptor {
        id: OperationId::PodDetails,
        display_name: "Get Pod Details",
        description: "Detailed information about a specific pod",
        params: &[ParamKind::Namespace, ParamKind::PodName],
        binding: UpstreamBinding::Cluster(ClusterRead::ReadPod),
        result: ResultShape::Record,
    },
    OperationDescriptor {
        id: OperationId::PodLogs,
        display_name: "Get Pod Logs",
        description: "The last 50 lines of logs from a pod",
        params: &[ParamKind::Namespace, ParamKind::PodName],
        binding: UpstreamBinding::Cluster(ClusterRead::ReadPodLog),
        result: ResultShape::LogTail,
    },
    OperationDescriptor {
        id: OperationId::ResourceGroupInfo,
        display_name: "Get Resource Group Info",
        description: "Metadata of a resource group",
        params: &[ParamKind::ResourceGroup],
        binding: UpstreamBinding::Management(ManagementRead::GetResourceGroup),
        result: ResultShape::Record,
    },
    OperationDescriptor {
        id: OperationId::ListResources,
        display_name: "List All Resources",
        description: "All Azure resources in the configured resource group",
        params: &[],
        binding: UpstreamBinding::Management(ManagementRead::ListResourcesInGroup),
        result: ResultShape::Collection,
    },
    OperationDescriptor {
        id: OperationId::WebAppStatus,
        display_name: "Get App Service Status",
        description: "Status of an App Service web app",
        params: &[ParamKind::ResourceName],
        binding: UpstreamBinding::Management(ManagementRead::GetWebSite),
        result: ResultShape::Record,
    },
    OperationDescriptor {
        id: OperationId::FunctionAppStatus,
        display_name: "Get Function App Status",
        description: "Status of a Function App",
        params: &[ParamKind::ResourceName],
        binding: UpstreamBinding::Management(ManagementRead::GetWebSite),
        result: ResultShape::Record,
    },
    OperationDescriptor {
        id: OperationId::StorageAccountInfo,
        display_name: "Get Storage Account Info",
        description: "Storage account metadata",
        params: &[ParamKind::ResourceName],
        binding: UpstreamBinding::Management(ManagementRead::GetStorageAccount),
        result: ResultShape::Record,
    },
    OperationDescriptor {
        id: OperationId::SubscriptionInfo,
        display_name: "Get Subscription Info",
        description: "Subscription display name and state with a masked identifier",
        params: &[],
        binding: UpstreamBinding::Management(ManagementRead::GetSubscription),
        result: ResultShape::Masked,
    },
    OperationDescriptor {
        id: OperationId::CostSummary,
        display_name: "Get Cost Analysis",
        description: "Cost summary for the last 30 days (simulated, not live billing data)",
        params: &[],
        binding: UpstreamBinding::Simulated,
        result: ResultShape::Simulated,
    },
    OperationDescriptor {
        id: OperationId::HealthCheck,
        display_name: "Health Check",
        description: "Gateway liveness with a timestamp",
        params: &[],
        binding: UpstreamBinding::Local,
        result: ResultShape::Record,
    },
];

pub fn registry() -> &'static [OperationDescriptor] {
    &REGISTRY
}

/// A validated request to run one operation with its positional parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OperationCall {
    operation: OperationId,
    params: Vec<String>,
}

impl OperationCall {
    pub fn new(operation: OperationId, params: Vec<String>) -> Result<Self, ProxyError> {
        let descriptor = operation.descriptor();
        let expected = descriptor.param_count();
        if params.len() != expected {
            return Err(ProxyError::InvalidParameters(format!(
                "`{operation}` expects {expected} parameter(s), got {}",
                params.len()
            )));
        }
        if let Some(position) = params.iter().position(|param| param.trim().is_empty()) {
            return Err(ProxyError::InvalidParameters(format!(
                "`{operation}` parameter {} must not be empty",
                position + 1
            )));
        }
        for (kind, value) in descriptor.params.iter().zip(&params) {
            kind.check(value).map_err(|reason| {
                ProxyError::InvalidParameters(format!("`{operation}`: {reason}"))
            })?;
        }

        Ok(Self { operation, params })
    }

    pub fn operation(&self) -> OperationId {
        self.operation
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn param(&self, index: usize) -> &str {
        self.params.get(index).map(String::as_str).unwrap_or_default()
    }
}

/// Normalized result of one operation. Read once and discarded; never cached.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    pub operation: OperationId,
    pub data: Value,
}

impl ResourceSnapshot {
    pub fn new(operation: OperationId, data: Value) -> Self {
        Self { operation, data }
    }
}

#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(&self, call: &OperationCall) -> Result<ResourceSnapshot, ProxyError>;
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{
        registry, OperationCall, OperationId, ParamKind, ReadVerb, UpstreamBinding, REGISTRY,
    };
    use crate::errors::ProxyError;

    #[test]
    fn registry_has_fifteen_unique_operations_in_enum_order() {
        assert_eq!(registry().len(), 15);

        let ids = registry().iter().map(|descriptor| descriptor.id).collect::<HashSet<_>>();
        assert_eq!(ids.len(), 15);

        for (index, descriptor) in REGISTRY.iter().enumerate() {
            assert_eq!(descriptor.id as usize, index, "{} is out of order", descriptor.id);
            assert_eq!(descriptor.id.descriptor().id, descriptor.id);
        }
    }

    #[test]
    fn every_remote_binding_is_a_get_or_list_read() {
        for descriptor in registry() {
            match descriptor.binding {
                UpstreamBinding::Management(_) | UpstreamBinding::Cluster(_) => {
                    let verb = descriptor.binding.verb();
                    assert!(
                        matches!(verb, Some(ReadVerb::Get) | Some(ReadVerb::List)),
                        "{} must be bound to a read",
                        descriptor.id
                    );
                }
                UpstreamBinding::Simulated | UpstreamBinding::Local => {
                    assert!(descriptor.binding.verb().is_none());
                }
            }
        }
    }

    #[test]
    fn cluster_scoped_operations_take_a_namespace_first() {
        for descriptor in registry() {
            if descriptor.binding.needs_cluster_session() {
                assert_eq!(descriptor.params.first(), Some(&ParamKind::Namespace));
            }
        }
    }

    #[test]
    fn call_rejects_wrong_parameter_count() {
        let error = OperationCall::new(OperationId::PodLogs, vec!["hsps".to_string()])
            .expect_err("pod logs requires namespace and pod name");
        assert!(matches!(error, ProxyError::InvalidParameters(_)));
    }

    #[test]
    fn call_rejects_blank_parameters() {
        let error = OperationCall::new(OperationId::ListPods, vec!["  ".to_string()])
            .expect_err("blank namespace must be rejected");
        assert!(error.to_string().contains("must not be empty"));
    }

    #[test]
    fn call_rejects_parameters_that_would_escape_their_segment() {
        let hostile = [
            (OperationId::PodLogs, vec!["hsps", "../secrets/db-password?"]),
            (OperationId::PodDetails, vec!["hsps", "api%2F..%2Fsecrets"]),
            (OperationId::ListPods, vec!["hsps/../kube-system"]),
            (OperationId::ListPods, vec!["HSPS"]),
            (OperationId::StorageAccountInfo, vec!["..%2F..%2Fproviders"]),
            (OperationId::WebAppStatus, vec!["portal?api-version=1"]),
            (OperationId::FunctionAppStatus, vec!["../../other-rg"]),
            (OperationId::ResourceGroupInfo, vec!["rg/providers"]),
        ];

        for (operation, params) in hostile {
            let params = params.into_iter().map(str::to_string).collect::<Vec<_>>();
            let error = OperationCall::new(operation, params.clone())
                .expect_err("hostile parameter must be rejected");
            assert!(
                matches!(error, ProxyError::InvalidParameters(_)),
                "{operation} accepted {params:?}"
            );
        }
    }

    #[test]
    fn parameter_kinds_accept_real_names() {
        assert!(ParamKind::Namespace.check("kube-system").is_ok());
        assert!(ParamKind::PodName.check("portal-7f9c4.v2").is_ok());
        assert!(ParamKind::ResourceGroup.check("Ops_RG-(prod).eastus").is_ok());
        assert!(ParamKind::ResourceName.check("hspspodshutdown").is_ok());

        assert!(ParamKind::Namespace.check("-hsps").is_err());
        assert!(ParamKind::Namespace.check(&"a".repeat(64)).is_err());
        assert!(ParamKind::PodName.check("portal..v2").is_err());
        assert!(ParamKind::ResourceGroup.check("ops-rg.").is_err());
        assert_eq!(
            ParamKind::ResourceName.check("a b").unwrap_err(),
            "`a b` is not a valid resource name"
        );
    }

    #[test]
    fn call_exposes_positional_parameters() {
        let call = OperationCall::new(
            OperationId::PodDetails,
            vec!["hsps".to_string(), "api-7d9f".to_string()],
        )
        .expect("valid call");
        assert_eq!(call.operation(), OperationId::PodDetails);
        assert_eq!(call.param(0), "hsps");
        assert_eq!(call.param(1), "api-7d9f");
        assert_eq!(call.param(2), "");
    }
}
