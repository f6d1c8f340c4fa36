//! In-process upstreams for tests and local demos.
//!
//! They implement the same read-only traits as the HTTP clients and record every read, so
//! callers can assert how many upstream calls a request made.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use opsgate_core::config::AppConfig;
use opsgate_core::UpstreamError;

use crate::arm::{
    AgentPool, AgentPoolProfile, AgentPoolProperties, CredentialEntry, CredentialResults,
    GenericResource, ManagedCluster, ManagedClusterProperties, ManagementApi, PowerState,
    ResourceGroup, ResourceGroupProperties, SiteProperties, StorageAccount,
    StorageAccountProperties, StorageEndpoints, StorageSku, Subscription, WebSite,
};
use crate::kube::{
    ClusterApi, ClusterConnector, Container, ContainerPort, ContainerStatus, Deployment,
    DeploymentSpec, DeploymentStatus, Kubeconfig, ObjectMeta, Pod, PodCondition, PodSpec,
    PodStatus, Service, ServicePort, ServiceSpec,
};

const IN_MEMORY_KUBECONFIG: &str = "\
apiVersion: v1
kind: Config
current-context: in-memory
clusters:
  - name: in-memory
    cluster:
      server: https://in-memory.cluster.invalid
contexts:
  - name: in-memory
    context:
      cluster: in-memory
      user: in-memory-user
users:
  - name: in-memory-user
    user:
      token: in-memory-token
";

pub fn in_memory_credentials() -> CredentialResults {
    CredentialResults {
        kubeconfigs: vec![CredentialEntry {
            name: "clusterUser".to_string(),
            value: STANDARD.encode(IN_MEMORY_KUBECONFIG),
        }],
    }
}

#[derive(Clone)]
pub struct InMemoryControlPlane {
    cluster: Option<ManagedCluster>,
    agent_pools: Vec<AgentPool>,
    credentials: Result<CredentialResults, UpstreamError>,
    resource_groups: BTreeMap<String, ResourceGroup>,
    resources: BTreeMap<String, Vec<GenericResource>>,
    web_sites: BTreeMap<String, WebSite>,
    storage_accounts: BTreeMap<String, StorageAccount>,
    subscription: Option<Subscription>,
    failure: Option<UpstreamError>,
    reads: Arc<Mutex<Vec<String>>>,
}

impl Default for InMemoryControlPlane {
    fn default() -> Self {
        Self {
            cluster: None,
            agent_pools: Vec::new(),
            credentials: Ok(in_memory_credentials()),
            resource_groups: BTreeMap::new(),
            resources: BTreeMap::new(),
            web_sites: BTreeMap::new(),
            storage_accounts: BTreeMap::new(),
            subscription: None,
            failure: None,
            reads: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// A small environment matching the configured resource group, cluster and app names.
    pub fn demo(config: &AppConfig) -> Self {
        let group = config.azure.resource_group.as_str();
        let location = "eastus";
        let resource_id = |provider: &str, name: &str| {
            format!("/subscriptions/demo/resourceGroups/{group}/providers/{provider}/{name}")
        };

        let profile = |name: &str, count: i64| AgentPoolProfile {
            name: name.to_string(),
            count: Some(count),
            vm_size: Some("Standard_D2s_v3".to_string()),
            os_type: Some("Linux".to_string()),
        };
        let pool = |name: &str, count: i64, mode: &str| AgentPool {
            name: name.to_string(),
            properties: AgentPoolProperties {
                count: Some(count),
                vm_size: Some("Standard_D2s_v3".to_string()),
                os_type: Some("Linux".to_string()),
                mode: Some(mode.to_string()),
                provisioning_state: Some("Succeeded".to_string()),
                power_state: Some(PowerState { code: Some("Running".to_string()) }),
            },
        };
        let site = |name: &str, kind: &str| WebSite {
            name: name.to_string(),
            location: location.to_string(),
            kind: Some(kind.to_string()),
            properties: SiteProperties {
                state: Some("Running".to_string()),
                default_host_name: Some(format!("{name}.azurewebsites.net")),
                host_names: vec![format!("{name}.azurewebsites.net")],
                https_only: Some(true),
                last_modified_time_utc: None,
            },
        };

        let cluster_name = config.azure.cluster_name.clone();
        let web_app = config.cluster.web_app.clone();
        let function_app = config.cluster.function_app.clone();
        let storage = config.cluster.storage_account.clone();

        Self::new()
            .with_cluster(ManagedCluster {
                name: cluster_name.clone(),
                location: location.to_string(),
                properties: ManagedClusterProperties {
                    provisioning_state: Some("Succeeded".to_string()),
                    kubernetes_version: Some("1.29.4".to_string()),
                    node_resource_group: Some(format!("MC_{group}_{cluster_name}_{location}")),
                    fqdn: Some(format!("{cluster_name}.hcp.{location}.azmk8s.io")),
                    power_state: Some(PowerState { code: Some("Running".to_string()) }),
                    agent_pool_profiles: vec![profile("system", 2), profile("workload", 3)],
                },
            })
            .with_agent_pools(vec![pool("system", 2, "System"), pool("workload", 3, "User")])
            .with_resource_group(ResourceGroup {
                name: group.to_string(),
                location: location.to_string(),
                properties: ResourceGroupProperties {
                    provisioning_state: Some("Succeeded".to_string()),
                },
                tags: Some(BTreeMap::from([("environment".to_string(), "demo".to_string())])),
            })
            .with_resources(
                group,
                vec![
                    GenericResource {
                        id: resource_id(
                            "Microsoft.ContainerService/managedClusters",
                            &cluster_name,
                        ),
                        name: cluster_name.clone(),
                        resource_type: "Microsoft.ContainerService/managedClusters".to_string(),
                        location: location.to_string(),
                    },
                    GenericResource {
                        id: resource_id("Microsoft.Web/sites", &web_app),
                        name: web_app.clone(),
                        resource_type: "Microsoft.Web/sites".to_string(),
                        location: location.to_string(),
                    },
                    GenericResource {
                        id: resource_id("Microsoft.Web/sites", &function_app),
                        name: function_app.clone(),
                        resource_type: "Microsoft.Web/sites".to_string(),
                        location: location.to_string(),
                    },
                    GenericResource {
                        id: resource_id("Microsoft.Storage/storageAccounts", &storage),
                        name: storage.clone(),
                        resource_type: "Microsoft.Storage/storageAccounts".to_string(),
                        location: location.to_string(),
                    },
                ],
            )
            .with_web_site(site(&web_app, "app,linux"))
            .with_web_site(site(&function_app, "functionapp,linux"))
            .with_storage_account(StorageAccount {
                name: storage.clone(),
                location: location.to_string(),
                kind: Some("StorageV2".to_string()),
                sku: Some(StorageSku {
                    name: Some("Standard_LRS".to_string()),
                    tier: Some("Standard".to_string()),
                }),
                properties: StorageAccountProperties {
                    provisioning_state: Some("Succeeded".to_string()),
                    primary_location: Some(location.to_string()),
                    primary_endpoints: Some(StorageEndpoints {
                        blob: Some(format!("https://{storage}.blob.core.windows.net/")),
                    }),
                },
            })
            .with_subscription(Subscription {
                subscription_id: String::new(),
                display_name: "Operations Demo".to_string(),
                state: Some("Enabled".to_string()),
            })
    }

    pub fn with_cluster(mut self, cluster: ManagedCluster) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn with_agent_pools(mut self, pools: Vec<AgentPool>) -> Self {
        self.agent_pools = pools;
        self
    }

    pub fn with_credentials(
        mut self,
        credentials: Result<CredentialResults, UpstreamError>,
    ) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_resource_group(mut self, group: ResourceGroup) -> Self {
        self.resource_groups.insert(group.name.clone(), group);
        self
    }

    pub fn with_resources(mut self, group: &str, resources: Vec<GenericResource>) -> Self {
        self.resources.insert(group.to_string(), resources);
        self
    }

    pub fn with_web_site(mut self, site: WebSite) -> Self {
        self.web_sites.insert(site.name.clone(), site);
        self
    }

    pub fn with_storage_account(mut self, account: StorageAccount) -> Self {
        self.storage_accounts.insert(account.name.clone(), account);
        self
    }

    pub fn with_subscription(mut self, subscription: Subscription) -> Self {
        self.subscription = Some(subscription);
        self
    }

    /// Every read fails with `error`, including the cluster credential fetch.
    pub fn failing(mut self, error: UpstreamError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Reads recorded so far, shared across clones.
    pub fn reads(&self) -> Vec<String> {
        self.reads.lock().map(|reads| reads.clone()).unwrap_or_default()
    }

    fn record(&self, read: &str) -> Result<(), UpstreamError> {
        if let Ok(mut reads) = self.reads.lock() {
            reads.push(read.to_string());
        }
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

fn not_found(what: &str, name: &str) -> UpstreamError {
    UpstreamError::NotFound(format!("{what} `{name}` was not found"))
}

#[async_trait]
impl ManagementApi for InMemoryControlPlane {
    async fn managed_cluster(
        &self,
        _resource_group: &str,
        cluster: &str,
    ) -> Result<ManagedCluster, UpstreamError> {
        self.record("managed_cluster")?;
        self.cluster
            .clone()
            .filter(|managed| managed.name == cluster)
            .ok_or_else(|| not_found("managed cluster", cluster))
    }

    async fn agent_pools(
        &self,
        _resource_group: &str,
        cluster: &str,
    ) -> Result<Vec<AgentPool>, UpstreamError> {
        self.record("agent_pools")?;
        match &self.cluster {
            Some(managed) if managed.name == cluster => Ok(self.agent_pools.clone()),
            _ => Err(not_found("managed cluster", cluster)),
        }
    }

    async fn cluster_user_credentials(
        &self,
        _resource_group: &str,
        _cluster: &str,
    ) -> Result<CredentialResults, UpstreamError> {
        self.record("cluster_user_credentials")?;
        self.credentials.clone()
    }

    async fn resource_group(&self, resource_group: &str) -> Result<ResourceGroup, UpstreamError> {
        self.record("resource_group")?;
        self.resource_groups
            .get(resource_group)
            .cloned()
            .ok_or_else(|| not_found("resource group", resource_group))
    }

    async fn resources(&self, resource_group: &str) -> Result<Vec<GenericResource>, UpstreamError> {
        self.record("resources")?;
        Ok(self.resources.get(resource_group).cloned().unwrap_or_default())
    }

    async fn web_site(&self, _resource_group: &str, name: &str) -> Result<WebSite, UpstreamError> {
        self.record("web_site")?;
        self.web_sites.get(name).cloned().ok_or_else(|| not_found("site", name))
    }

    async fn storage_account(
        &self,
        _resource_group: &str,
        name: &str,
    ) -> Result<StorageAccount, UpstreamError> {
        self.record("storage_account")?;
        self.storage_accounts.get(name).cloned().ok_or_else(|| not_found("storage account", name))
    }

    async fn subscription(&self) -> Result<Subscription, UpstreamError> {
        self.record("subscription")?;
        self.subscription.clone().ok_or_else(|| not_found("subscription", "current"))
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryCluster {
    pods: Vec<Pod>,
    logs: BTreeMap<(String, String), String>,
    deployments: Vec<Deployment>,
    services: Vec<Service>,
    failure: Option<UpstreamError>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn demo(config: &AppConfig, now: DateTime<Utc>) -> Self {
        let primary = config.cluster.default_namespace.as_str();
        let alternate = config.cluster.alternate_namespace.as_str();
        let log: String = (1..=80)
            .map(|n| format!("2026-01-01T00:{:02}:00Z INFO request {n} served\n", n % 60))
            .collect();

        Self::new()
            .with_pod(pod(primary, "portal-7f9c4", "Running", now - Duration::hours(5), 0))
            .with_pod(pod(primary, "worker-5d2b8", "Running", now - Duration::days(3), 2))
            .with_pod(pod(alternate, "star-api-66c1", "Pending", now - Duration::minutes(4), 0))
            .with_log(primary, "portal-7f9c4", &log)
            .with_deployment(deployment(primary, "portal", 2, 2))
            .with_deployment(deployment(primary, "worker", 1, 1))
            .with_deployment(deployment(alternate, "star-api", 1, 0))
            .with_service(service(primary, "portal", "ClusterIP", 80, 8080))
            .with_service(service(alternate, "star-api", "LoadBalancer", 443, 8443))
    }

    pub fn with_pod(mut self, pod: Pod) -> Self {
        self.pods.push(pod);
        self
    }

    pub fn with_log(mut self, namespace: &str, pod: &str, log: &str) -> Self {
        self.logs.insert((namespace.to_string(), pod.to_string()), log.to_string());
        self
    }

    pub fn with_deployment(mut self, deployment: Deployment) -> Self {
        self.deployments.push(deployment);
        self
    }

    pub fn with_service(mut self, service: Service) -> Self {
        self.services.push(service);
        self
    }

    pub fn failing(mut self, error: UpstreamError) -> Self {
        self.failure = Some(error);
        self
    }

    fn check(&self) -> Result<(), UpstreamError> {
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

fn in_namespace(meta: &ObjectMeta, namespace: &str) -> bool {
    meta.namespace.as_deref() == Some(namespace)
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, UpstreamError> {
        self.check()?;
        Ok(self.pods.iter().filter(|pod| in_namespace(&pod.metadata, namespace)).cloned().collect())
    }

    async fn read_pod(&self, namespace: &str, name: &str) -> Result<Pod, UpstreamError> {
        self.check()?;
        self.pods
            .iter()
            .find(|pod| {
                in_namespace(&pod.metadata, namespace) && pod.metadata.name.as_deref() == Some(name)
            })
            .cloned()
            .ok_or_else(|| not_found("pod", name))
    }

    /// Returns the whole stored log; the `tail_lines` hint is not applied here.
    async fn read_pod_log(
        &self,
        namespace: &str,
        name: &str,
        _tail_lines: usize,
    ) -> Result<String, UpstreamError> {
        self.check()?;
        self.logs
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| not_found("pod", name))
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, UpstreamError> {
        self.check()?;
        Ok(self
            .deployments
            .iter()
            .filter(|deployment| in_namespace(&deployment.metadata, namespace))
            .cloned()
            .collect())
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, UpstreamError> {
        self.check()?;
        Ok(self
            .services
            .iter()
            .filter(|service| in_namespace(&service.metadata, namespace))
            .cloned()
            .collect())
    }
}

/// Hands out the same [`InMemoryCluster`] for every session and counts connections.
#[derive(Clone, Default)]
pub struct InMemoryConnector {
    cluster: InMemoryCluster,
    connections: Arc<AtomicUsize>,
    failure: Option<UpstreamError>,
}

impl InMemoryConnector {
    pub fn new(cluster: InMemoryCluster) -> Self {
        Self { cluster, connections: Arc::new(AtomicUsize::new(0)), failure: None }
    }

    pub fn failing(mut self, error: UpstreamError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl ClusterConnector for InMemoryConnector {
    fn connect(&self, kubeconfig: &Kubeconfig) -> Result<Arc<dyn ClusterApi>, UpstreamError> {
        kubeconfig.endpoint()?;
        self.connections.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        Ok(Arc::new(self.cluster.clone()))
    }
}

pub fn pod(namespace: &str, name: &str, phase: &str, created: DateTime<Utc>, restarts: i32) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            creation_timestamp: Some(created),
            labels: Some(BTreeMap::from([("app".to_string(), app_label(name))])),
        },
        spec: Some(PodSpec {
            node_name: Some("aks-system-0".to_string()),
            containers: vec![Container {
                name: app_label(name),
                image: Some(format!("registry.local/{}:1.0.0", app_label(name))),
                ports: Some(vec![ContainerPort {
                    container_port: 8080,
                    protocol: Some("TCP".to_string()),
                }]),
            }],
        }),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            pod_ip: Some("10.244.0.12".to_string()),
            conditions: Some(vec![PodCondition {
                condition_type: "Ready".to_string(),
                status: if phase == "Running" { "True" } else { "False" }.to_string(),
            }]),
            container_statuses: Some(vec![ContainerStatus {
                name: app_label(name),
                ready: phase == "Running",
                restart_count: restarts,
            }]),
        }),
    }
}

pub fn deployment(namespace: &str, name: &str, replicas: i32, ready: i32) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        spec: Some(DeploymentSpec { replicas: Some(replicas) }),
        status: Some(DeploymentStatus {
            ready_replicas: Some(ready),
            available_replicas: Some(ready),
            updated_replicas: Some(replicas),
        }),
    }
}

pub fn service(namespace: &str, name: &str, kind: &str, port: i32, target: i32) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        spec: Some(ServiceSpec {
            service_type: Some(kind.to_string()),
            cluster_ip: Some("10.0.120.15".to_string()),
            ports: Some(vec![ServicePort {
                name: None,
                port,
                target_port: Some(serde_json::Value::from(target)),
                protocol: Some("TCP".to_string()),
            }]),
        }),
    }
}

fn app_label(pod_name: &str) -> String {
    pod_name
        .rsplit_once('-')
        .map(|(app, _)| app.to_string())
        .unwrap_or_else(|| pod_name.to_string())
}
