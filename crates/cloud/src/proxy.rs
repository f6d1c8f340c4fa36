use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use opsgate_core::config::AzureConfig;
use opsgate_core::operations::{ClusterRead, ManagementRead};
use opsgate_core::{
    OperationCall, OperationExecutor, ProxyError, ResourceSnapshot, UpstreamBinding,
    UpstreamError, POD_LOG_TAIL_LINES,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::arm::{ArmClient, ManagementApi};
use crate::costs;
use crate::kube::{ClusterApi, ClusterConnector, HttpClusterConnector, Kubeconfig};
use crate::snapshot;

/// Fixed scope of the proxy: one resource group, one cluster, one subscription.
#[derive(Clone, Debug)]
pub struct ProxySettings {
    pub resource_group: String,
    pub cluster_name: String,
    pub subscription_id: SecretString,
    pub timeout_secs: u64,
}

impl ProxySettings {
    pub fn from_config(azure: &AzureConfig) -> Self {
        Self {
            resource_group: azure.resource_group.clone(),
            cluster_name: azure.cluster_name.clone(),
            subscription_id: azure.subscription_id.clone(),
            timeout_secs: azure.request_timeout_secs,
        }
    }
}

/// Executes registry operations against the management and cluster APIs.
///
/// Dispatch goes through each descriptor's [`UpstreamBinding`], so the proxy can only issue
/// the reads the registry declares. Cluster-scoped reads fetch a fresh cluster credential
/// and open a new session on every call.
pub struct ResourceProxy {
    management: Arc<dyn ManagementApi>,
    connector: Arc<dyn ClusterConnector>,
    settings: ProxySettings,
}

impl ResourceProxy {
    pub fn new(
        management: Arc<dyn ManagementApi>,
        connector: Arc<dyn ClusterConnector>,
        settings: ProxySettings,
    ) -> Self {
        Self { management, connector, settings }
    }

    pub fn from_config(azure: &AzureConfig) -> Result<Self, UpstreamError> {
        let management = ArmClient::from_config(azure)?;
        Ok(Self::new(
            Arc::new(management),
            Arc::new(HttpClusterConnector::new(azure.request_timeout_secs)),
            ProxySettings::from_config(azure),
        ))
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    async fn bounded<T, F>(&self, read: F) -> Result<T, UpstreamError>
    where
        F: Future<Output = Result<T, UpstreamError>>,
    {
        let limit = Duration::from_secs(self.settings.timeout_secs);
        tokio::time::timeout(limit, read)
            .await
            .map_err(|_| UpstreamError::Timeout(self.settings.timeout_secs))?
    }

    /// Credential fetch then connect. Either half failing is a credential failure.
    async fn cluster_session(&self) -> Result<Arc<dyn ClusterApi>, ProxyError> {
        let (group, cluster) = (&self.settings.resource_group, &self.settings.cluster_name);
        let credentials = self
            .bounded(self.management.cluster_user_credentials(group, cluster))
            .await
            .map_err(ProxyError::ClusterCredential)?;
        let kubeconfig = Kubeconfig::from_credential_results(&credentials)
            .map_err(ProxyError::ClusterCredential)?;
        self.connector.connect(&kubeconfig).map_err(ProxyError::ClusterCredential)
    }

    async fn management_read(
        &self,
        read: ManagementRead,
        call: &OperationCall,
    ) -> Result<Value, UpstreamError> {
        let group = self.settings.resource_group.as_str();
        let cluster = self.settings.cluster_name.as_str();

        match read {
            ManagementRead::GetManagedCluster => {
                let managed = self.bounded(self.management.managed_cluster(group, cluster)).await?;
                to_data(&snapshot::cluster_status(&managed))
            }
            ManagementRead::ListAgentPools => {
                let pools = self.bounded(self.management.agent_pools(group, cluster)).await?;
                to_data(&snapshot::node_pools(&pools))
            }
            ManagementRead::GetResourceGroup => {
                let resource_group =
                    self.bounded(self.management.resource_group(call.param(0))).await?;
                to_data(&snapshot::resource_group(&resource_group))
            }
            ManagementRead::ListResourcesInGroup => {
                let resources = self.bounded(self.management.resources(group)).await?;
                to_data(&snapshot::resources(group, &resources))
            }
            ManagementRead::GetWebSite => {
                let site = self.bounded(self.management.web_site(group, call.param(0))).await?;
                to_data(&snapshot::site(&site))
            }
            ManagementRead::GetStorageAccount => {
                let account =
                    self.bounded(self.management.storage_account(group, call.param(0))).await?;
                to_data(&snapshot::storage_account(&account))
            }
            ManagementRead::GetSubscription => {
                let subscription = self.bounded(self.management.subscription()).await?;
                to_data(&snapshot::subscription(
                    &subscription.display_name,
                    subscription.state,
                    self.settings.subscription_id.expose_secret(),
                ))
            }
        }
    }

    async fn cluster_read(
        &self,
        session: &dyn ClusterApi,
        read: ClusterRead,
        call: &OperationCall,
    ) -> Result<Value, UpstreamError> {
        let namespace = call.param(0);

        match read {
            ClusterRead::ListPods => {
                let pods = self.bounded(session.list_pods(namespace)).await?;
                to_data(&snapshot::pod_list(namespace, &pods, Utc::now()))
            }
            ClusterRead::ReadPod => {
                let pod = self.bounded(session.read_pod(namespace, call.param(1))).await?;
                to_data(&snapshot::pod_details(&pod))
            }
            ClusterRead::ReadPodLog => {
                let pod = call.param(1);
                let raw = self
                    .bounded(session.read_pod_log(namespace, pod, POD_LOG_TAIL_LINES))
                    .await?;
                to_data(&snapshot::pod_logs(namespace, pod, &raw, POD_LOG_TAIL_LINES))
            }
            ClusterRead::ListDeployments => {
                let items = self.bounded(session.list_deployments(namespace)).await?;
                to_data(&snapshot::deployments(namespace, &items))
            }
            ClusterRead::ListServices => {
                let items = self.bounded(session.list_services(namespace)).await?;
                to_data(&snapshot::services(namespace, &items))
            }
        }
    }
}

#[async_trait]
impl OperationExecutor for ResourceProxy {
    async fn execute(&self, call: &OperationCall) -> Result<ResourceSnapshot, ProxyError> {
        let operation = call.operation();
        let descriptor = operation.descriptor();

        let result = match descriptor.binding {
            UpstreamBinding::Management(read) => {
                self.management_read(read, call).await.map_err(ProxyError::ControlPlane)
            }
            UpstreamBinding::Cluster(read) => match self.cluster_session().await {
                Ok(session) => self
                    .cluster_read(session.as_ref(), read, call)
                    .await
                    .map_err(ProxyError::ClusterQuery),
                Err(error) => Err(error),
            },
            UpstreamBinding::Simulated => {
                to_data(&costs::simulated_summary()).map_err(ProxyError::ControlPlane)
            }
            UpstreamBinding::Local => {
                to_data(&snapshot::health(Utc::now())).map_err(ProxyError::ControlPlane)
            }
        };

        match result {
            Ok(data) => {
                debug!(
                    event_name = "proxy.read.completed",
                    operation = %operation,
                    "resource read completed"
                );
                Ok(ResourceSnapshot::new(operation, data))
            }
            Err(error) => {
                warn!(
                    event_name = "proxy.read.failed",
                    operation = %operation,
                    reason_code = error.reason_code(),
                    error = %error,
                    "resource read failed"
                );
                Err(error)
            }
        }
    }
}

fn to_data<T: Serialize>(record: &T) -> Result<Value, UpstreamError> {
    serde_json::to_value(record)
        .map_err(|error| UpstreamError::Decode(format!("failed to normalize record: {error}")))
}
