//! Normalized records returned by the resource proxy.
//!
//! Upstream payloads are reduced to the handful of fields an operator asks about. Keys are
//! camelCase so the records read the same whether they come back from the HTTP gateway or
//! are folded into a chat prompt.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::arm::{
    AgentPool, GenericResource, ManagedCluster, ResourceGroup, StorageAccount, WebSite,
};
use crate::kube::{Deployment, Pod, Service};

const SUBSCRIPTION_PREFIX_CHARS: usize = 5;
const SUBSCRIPTION_MASK: &str = "***********************************";
const FULL_MASK_MAX_LEN: usize = 8;

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolProfileRecord {
    pub name: String,
    pub count: Option<i64>,
    pub vm_size: Option<String>,
    pub os_type: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatusRecord {
    pub name: String,
    pub location: String,
    pub power_state: String,
    pub provisioning_state: Option<String>,
    pub kubernetes_version: Option<String>,
    pub node_resource_group: Option<String>,
    pub fqdn: Option<String>,
    pub agent_pool_profiles: Vec<PoolProfileRecord>,
}

pub fn cluster_status(cluster: &ManagedCluster) -> ClusterStatusRecord {
    let properties = &cluster.properties;
    ClusterStatusRecord {
        name: cluster.name.clone(),
        location: cluster.location.clone(),
        power_state: properties
            .power_state
            .as_ref()
            .and_then(|state| state.code.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        provisioning_state: properties.provisioning_state.clone(),
        kubernetes_version: properties.kubernetes_version.clone(),
        node_resource_group: properties.node_resource_group.clone(),
        fqdn: properties.fqdn.clone(),
        agent_pool_profiles: properties
            .agent_pool_profiles
            .iter()
            .map(|pool| PoolProfileRecord {
                name: pool.name.clone(),
                count: pool.count,
                vm_size: pool.vm_size.clone(),
                os_type: pool.os_type.clone(),
            })
            .collect(),
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolRecord {
    pub name: String,
    pub count: Option<i64>,
    pub vm_size: Option<String>,
    pub os_type: Option<String>,
    pub provisioning_state: Option<String>,
    pub power_state: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolsRecord {
    pub node_pools: Vec<NodePoolRecord>,
    pub count: usize,
}

pub fn node_pools(pools: &[AgentPool]) -> NodePoolsRecord {
    let node_pools: Vec<_> = pools
        .iter()
        .map(|pool| NodePoolRecord {
            name: pool.name.clone(),
            count: pool.properties.count,
            vm_size: pool.properties.vm_size.clone(),
            os_type: pool.properties.os_type.clone(),
            provisioning_state: pool.properties.provisioning_state.clone(),
            power_state: pool.properties.power_state.as_ref().and_then(|state| state.code.clone()),
        })
        .collect();
    NodePoolsRecord { count: node_pools.len(), node_pools }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct PodSummary {
    pub name: String,
    pub status: Option<String>,
    pub ready: bool,
    pub restarts: i64,
    pub age: Option<String>,
    pub ip: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct PodListRecord {
    pub namespace: String,
    pub pods: Vec<PodSummary>,
    pub count: usize,
}

pub fn pod_list(namespace: &str, pods: &[Pod], now: DateTime<Utc>) -> PodListRecord {
    let pods: Vec<_> = pods
        .iter()
        .map(|pod| {
            let statuses = pod
                .status
                .as_ref()
                .and_then(|status| status.container_statuses.as_deref())
                .unwrap_or_default();
            PodSummary {
                name: pod.metadata.name.clone().unwrap_or_default(),
                status: pod.status.as_ref().and_then(|status| status.phase.clone()),
                ready: statuses.iter().all(|container| container.ready),
                restarts: statuses.iter().map(|container| i64::from(container.restart_count)).sum(),
                age: pod.metadata.creation_timestamp.map(|created| format_age(created, now)),
                ip: pod.status.as_ref().and_then(|status| status.pod_ip.clone()),
            }
        })
        .collect();
    PodListRecord { namespace: namespace.to_string(), count: pods.len(), pods }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortRecord {
    pub container_port: i32,
    pub protocol: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ContainerRecord {
    pub name: String,
    pub image: Option<String>,
    pub ports: Vec<PortRecord>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ConditionRecord {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodDetailRecord {
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub status: Option<String>,
    pub ip: Option<String>,
    pub node: Option<String>,
    pub creation_timestamp: Option<String>,
    pub labels: Option<BTreeMap<String, String>>,
    pub containers: Vec<ContainerRecord>,
    pub conditions: Vec<ConditionRecord>,
}

pub fn pod_details(pod: &Pod) -> PodDetailRecord {
    let status = pod.status.as_ref();
    let spec = pod.spec.as_ref();
    PodDetailRecord {
        name: pod.metadata.name.clone(),
        namespace: pod.metadata.namespace.clone(),
        status: status.and_then(|status| status.phase.clone()),
        ip: status.and_then(|status| status.pod_ip.clone()),
        node: spec.and_then(|spec| spec.node_name.clone()),
        creation_timestamp: pod.metadata.creation_timestamp.map(|created| created.to_rfc3339()),
        labels: pod.metadata.labels.clone(),
        containers: spec
            .map(|spec| spec.containers.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|container| ContainerRecord {
                name: container.name.clone(),
                image: container.image.clone(),
                ports: container
                    .ports
                    .iter()
                    .flatten()
                    .map(|port| PortRecord {
                        container_port: port.container_port,
                        protocol: port.protocol.clone(),
                    })
                    .collect(),
            })
            .collect(),
        conditions: status
            .and_then(|status| status.conditions.as_deref())
            .unwrap_or_default()
            .iter()
            .map(|condition| ConditionRecord {
                condition_type: condition.condition_type.clone(),
                status: condition.status.clone(),
            })
            .collect(),
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodLogRecord {
    pub pod_name: String,
    pub namespace: String,
    pub logs: Vec<String>,
}

pub fn pod_logs(namespace: &str, pod_name: &str, raw: &str, limit: usize) -> PodLogRecord {
    PodLogRecord {
        pod_name: pod_name.to_string(),
        namespace: namespace.to_string(),
        logs: tail_lines(raw, limit),
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub name: String,
    pub replicas: Option<i32>,
    pub available_replicas: i32,
    pub ready_replicas: i32,
    pub updated_replicas: i32,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct DeploymentListRecord {
    pub namespace: String,
    pub deployments: Vec<DeploymentRecord>,
    pub count: usize,
}

pub fn deployments(namespace: &str, items: &[Deployment]) -> DeploymentListRecord {
    let deployments: Vec<_> = items
        .iter()
        .map(|deployment| {
            let status = deployment.status.clone().unwrap_or_default();
            DeploymentRecord {
                name: deployment.metadata.name.clone().unwrap_or_default(),
                replicas: deployment.spec.as_ref().and_then(|spec| spec.replicas),
                available_replicas: status.available_replicas.unwrap_or(0),
                ready_replicas: status.ready_replicas.unwrap_or(0),
                updated_replicas: status.updated_replicas.unwrap_or(0),
            }
        })
        .collect();
    DeploymentListRecord { namespace: namespace.to_string(), count: deployments.len(), deployments }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePortRecord {
    pub port: i32,
    pub target_port: Option<String>,
    pub protocol: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ServiceRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: Option<String>,
    #[serde(rename = "clusterIP")]
    pub cluster_ip: Option<String>,
    pub ports: Vec<ServicePortRecord>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ServiceListRecord {
    pub namespace: String,
    pub services: Vec<ServiceRecord>,
    pub count: usize,
}

pub fn services(namespace: &str, items: &[Service]) -> ServiceListRecord {
    let services: Vec<_> = items
        .iter()
        .map(|service| {
            let spec = service.spec.as_ref();
            ServiceRecord {
                name: service.metadata.name.clone().unwrap_or_default(),
                service_type: spec.and_then(|spec| spec.service_type.clone()),
                cluster_ip: spec.and_then(|spec| spec.cluster_ip.clone()),
                ports: spec
                    .and_then(|spec| spec.ports.as_deref())
                    .unwrap_or_default()
                    .iter()
                    .map(|port| ServicePortRecord {
                        port: port.port,
                        target_port: port.target_port.as_ref().map(target_port_text),
                        protocol: port.protocol.clone(),
                    })
                    .collect(),
            }
        })
        .collect();
    ServiceListRecord { namespace: namespace.to_string(), count: services.len(), services }
}

fn target_port_text(value: &Value) -> String {
    match value {
        Value::String(name) => name.clone(),
        other => other.to_string(),
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroupRecord {
    pub name: String,
    pub location: String,
    pub provisioning_state: Option<String>,
    pub tags: Option<BTreeMap<String, String>>,
}

pub fn resource_group(group: &ResourceGroup) -> ResourceGroupRecord {
    ResourceGroupRecord {
        name: group.name.clone(),
        location: group.location.clone(),
        provisioning_state: group.properties.provisioning_state.clone(),
        tags: group.tags.clone(),
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ResourceRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub location: String,
    pub id: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceListRecord {
    pub resource_group: String,
    pub resources: Vec<ResourceRecord>,
    pub count: usize,
}

pub fn resources(resource_group: &str, items: &[GenericResource]) -> ResourceListRecord {
    let resources: Vec<_> = items
        .iter()
        .map(|resource| ResourceRecord {
            name: resource.name.clone(),
            resource_type: resource.resource_type.clone(),
            location: resource.location.clone(),
            id: resource.id.clone(),
        })
        .collect();
    ResourceListRecord {
        resource_group: resource_group.to_string(),
        count: resources.len(),
        resources,
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SiteRecord {
    pub name: String,
    pub state: Option<String>,
    pub host_names: Vec<String>,
    pub location: String,
    pub kind: Option<String>,
    pub https_only: Option<bool>,
    pub default_host_name: Option<String>,
}

/// Shared by web apps and function apps; both are `Microsoft.Web/sites`.
pub fn site(site: &WebSite) -> SiteRecord {
    SiteRecord {
        name: site.name.clone(),
        state: site.properties.state.clone(),
        host_names: site.properties.host_names.clone(),
        location: site.location.clone(),
        kind: site.kind.clone(),
        https_only: site.properties.https_only,
        default_host_name: site.properties.default_host_name.clone(),
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SkuRecord {
    pub name: Option<String>,
    pub tier: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct EndpointsRecord {
    pub blob: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageAccountRecord {
    pub name: String,
    pub location: String,
    pub sku: Option<SkuRecord>,
    pub kind: Option<String>,
    pub provisioning_state: Option<String>,
    pub primary_endpoints: EndpointsRecord,
}

pub fn storage_account(account: &StorageAccount) -> StorageAccountRecord {
    StorageAccountRecord {
        name: account.name.clone(),
        location: account.location.clone(),
        sku: account
            .sku
            .as_ref()
            .map(|sku| SkuRecord { name: sku.name.clone(), tier: sku.tier.clone() }),
        kind: account.kind.clone(),
        provisioning_state: account.properties.provisioning_state.clone(),
        primary_endpoints: EndpointsRecord {
            blob: account
                .properties
                .primary_endpoints
                .as_ref()
                .and_then(|endpoints| endpoints.blob.clone()),
        },
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    pub display_name: String,
    pub state: Option<String>,
    pub subscription_id: String,
}

/// Builds the subscription record from the configured identifier, never the upstream echo.
///
/// Any occurrence of the identifier inside the display name is replaced with the mask.
pub fn subscription(
    display_name: &str,
    state: Option<String>,
    subscription_id: &str,
) -> SubscriptionRecord {
    let masked = mask_subscription_id(subscription_id);
    let display_name = if subscription_id.is_empty() {
        display_name.to_string()
    } else {
        display_name.replace(subscription_id, &masked)
    };
    SubscriptionRecord { display_name, state, subscription_id: masked }
}

pub fn mask_subscription_id(subscription_id: &str) -> String {
    if subscription_id.chars().count() <= FULL_MASK_MAX_LEN {
        return SUBSCRIPTION_MASK.to_string();
    }
    let prefix: String = subscription_id.chars().take(SUBSCRIPTION_PREFIX_CHARS).collect();
    format!("{prefix}{SUBSCRIPTION_MASK}")
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct HealthRecord {
    pub status: &'static str,
    pub timestamp: String,
}

pub fn health(now: DateTime<Utc>) -> HealthRecord {
    HealthRecord { status: "healthy", timestamp: now.to_rfc3339() }
}

/// Renders elapsed time the way `kubectl get pods` does, truncated to one unit.
pub fn format_age(created: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - created).num_minutes().max(0);
    if minutes < 60 {
        return format!("{minutes}m");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours}h");
    }
    format!("{}d", hours / 24)
}

/// Keeps at most `limit` of the most recent lines. A trailing newline does not count as a line.
pub fn tail_lines(raw: &str, limit: usize) -> Vec<String> {
    let lines: Vec<&str> = raw.lines().collect();
    let start = lines.len().saturating_sub(limit);
    lines[start..].iter().map(|line| (*line).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{format_age, mask_subscription_id, subscription, tail_lines};

    #[test]
    fn age_uses_minutes_hours_then_days() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).single().expect("time");

        assert_eq!(format_age(now - Duration::minutes(7), now), "7m");
        assert_eq!(format_age(now - Duration::minutes(59), now), "59m");
        assert_eq!(format_age(now - Duration::minutes(60), now), "1h");
        assert_eq!(format_age(now - Duration::hours(23) - Duration::minutes(59), now), "23h");
        assert_eq!(format_age(now - Duration::hours(24), now), "1d");
        assert_eq!(format_age(now - Duration::days(40), now), "40d");
    }

    #[test]
    fn age_clamps_clock_skew_to_zero() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).single().expect("time");
        assert_eq!(format_age(now + Duration::minutes(3), now), "0m");
    }

    #[test]
    fn tail_keeps_most_recent_lines() {
        let raw: String = (1..=120).map(|n| format!("line {n}\n")).collect();
        let tail = tail_lines(&raw, 50);

        assert_eq!(tail.len(), 50);
        assert_eq!(tail.first().map(String::as_str), Some("line 71"));
        assert_eq!(tail.last().map(String::as_str), Some("line 120"));
    }

    #[test]
    fn short_logs_are_returned_whole() {
        assert_eq!(tail_lines("a\nb", 50), vec!["a".to_string(), "b".to_string()]);
        assert!(tail_lines("", 50).is_empty());
    }

    #[test]
    fn mask_keeps_five_characters_then_fixed_stars() {
        let masked = mask_subscription_id("0f3c2a9e-1111-2222-3333-444455556666");
        assert!(masked.starts_with("0f3c2"));
        assert_eq!(masked.len(), 40);
        assert!(masked[5..].chars().all(|c| c == '*'));
    }

    #[test]
    fn short_identifiers_are_fully_masked() {
        let masked = mask_subscription_id("abc123");
        assert!(!masked.contains("abc123"));
        assert!(masked.chars().all(|c| c == '*'));
    }

    #[test]
    fn subscription_record_never_contains_the_identifier() {
        let id = "0f3c2a9e-1111-2222-3333-444455556666";
        let record = subscription(&format!("Ops ({id})"), Some("Enabled".to_string()), id);
        let rendered = serde_json::to_string(&record).expect("serialize");

        assert!(!rendered.contains(id));
        assert!(rendered.contains("\"subscriptionId\":\"0f3c2"));
        assert!(rendered.contains("\"displayName\""));
    }
}
