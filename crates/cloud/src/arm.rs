//! Read-only client for the cloud management API.
//!
//! Every method maps to one `GET`, except [`ManagementApi::cluster_user_credentials`], which is
//! the management API's `listClusterUserCredential` list action. It is issued as a `POST` by
//! the upstream contract but only reads an existing credential.

use std::collections::BTreeMap;

use async_trait::async_trait;
use opsgate_core::config::AzureConfig;
use opsgate_core::UpstreamError;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::http;
use crate::identity::ClientSecretCredential;

const CONTAINER_SERVICE_API: &str = "2024-05-01";
const RESOURCES_API: &str = "2021-04-01";
const WEB_API: &str = "2023-12-01";
const STORAGE_API: &str = "2023-05-01";
const SUBSCRIPTIONS_API: &str = "2022-12-01";

/// Upper bound on `nextLink` hops when listing resources.
const MAX_PAGES: usize = 50;

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PowerState {
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentPoolProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub count: Option<i64>,
    #[serde(default)]
    pub vm_size: Option<String>,
    #[serde(default)]
    pub os_type: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterProperties {
    #[serde(default)]
    pub provisioning_state: Option<String>,
    #[serde(default)]
    pub kubernetes_version: Option<String>,
    #[serde(default)]
    pub node_resource_group: Option<String>,
    #[serde(default)]
    pub fqdn: Option<String>,
    #[serde(default)]
    pub power_state: Option<PowerState>,
    #[serde(default)]
    pub agent_pool_profiles: Vec<AgentPoolProfile>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ManagedCluster {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub properties: ManagedClusterProperties,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentPoolProperties {
    #[serde(default)]
    pub count: Option<i64>,
    #[serde(default)]
    pub vm_size: Option<String>,
    #[serde(default)]
    pub os_type: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub provisioning_state: Option<String>,
    #[serde(default)]
    pub power_state: Option<PowerState>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct AgentPool {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: AgentPoolProperties,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct CredentialEntry {
    #[serde(default)]
    pub name: String,
    /// Base64-encoded kubeconfig document.
    #[serde(default)]
    pub value: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct CredentialResults {
    #[serde(default)]
    pub kubeconfigs: Vec<CredentialEntry>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroupProperties {
    #[serde(default)]
    pub provisioning_state: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ResourceGroup {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub properties: ResourceGroupProperties,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct GenericResource {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub resource_type: String,
    #[serde(default)]
    pub location: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SiteProperties {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub default_host_name: Option<String>,
    #[serde(default)]
    pub host_names: Vec<String>,
    #[serde(default)]
    pub https_only: Option<bool>,
    #[serde(default)]
    pub last_modified_time_utc: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct WebSite {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub properties: SiteProperties,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct StorageSku {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct StorageEndpoints {
    #[serde(default)]
    pub blob: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageAccountProperties {
    #[serde(default)]
    pub provisioning_state: Option<String>,
    #[serde(default)]
    pub primary_location: Option<String>,
    #[serde(default)]
    pub primary_endpoints: Option<StorageEndpoints>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct StorageAccount {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub sku: Option<StorageSku>,
    #[serde(default)]
    pub properties: StorageAccountProperties,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(default)]
    next_link: Option<String>,
}

/// The management-plane reads the resource proxy needs. Nothing here mutates upstream state.
#[async_trait]
pub trait ManagementApi: Send + Sync {
    async fn managed_cluster(
        &self,
        resource_group: &str,
        cluster: &str,
    ) -> Result<ManagedCluster, UpstreamError>;

    async fn agent_pools(
        &self,
        resource_group: &str,
        cluster: &str,
    ) -> Result<Vec<AgentPool>, UpstreamError>;

    async fn cluster_user_credentials(
        &self,
        resource_group: &str,
        cluster: &str,
    ) -> Result<CredentialResults, UpstreamError>;

    async fn resource_group(&self, resource_group: &str) -> Result<ResourceGroup, UpstreamError>;

    async fn resources(&self, resource_group: &str) -> Result<Vec<GenericResource>, UpstreamError>;

    async fn web_site(&self, resource_group: &str, name: &str) -> Result<WebSite, UpstreamError>;

    async fn storage_account(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<StorageAccount, UpstreamError>;

    async fn subscription(&self) -> Result<Subscription, UpstreamError>;
}

/// HTTP implementation of [`ManagementApi`] that authenticates every read with a fresh token.
pub struct ArmClient {
    http: reqwest::Client,
    credential: ClientSecretCredential,
    endpoint: Url,
    subscription_id: SecretString,
    timeout_secs: u64,
}

impl ArmClient {
    pub fn from_config(azure: &AzureConfig) -> Result<Self, UpstreamError> {
        Ok(Self {
            http: http::build_client(azure.request_timeout_secs)?,
            credential: ClientSecretCredential::from_config(azure),
            endpoint: http::parse_base_url(&azure.management_endpoint, "management endpoint")?,
            subscription_id: azure.subscription_id.clone(),
            timeout_secs: azure.request_timeout_secs,
        })
    }

    /// `segments` are relative to the subscription; each one is encoded on its own.
    fn url(&self, segments: &[&str], api_version: &str) -> Result<Url, UpstreamError> {
        let subscription: [&str; 2] = ["subscriptions", self.subscription_id.expose_secret()];
        let mut url = http::join_segments(
            &self.endpoint,
            subscription.into_iter().chain(segments.iter().copied()),
        )?;
        url.query_pairs_mut().append_pair("api-version", api_version);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        what: &str,
    ) -> Result<T, UpstreamError> {
        let token = self.credential.bearer_token(&self.http, self.timeout_secs).await?;
        let request = self.http.get(url).bearer_auth(token.expose_secret());
        let response = http::send(request, self.timeout_secs).await?;
        http::decode_json(response, what).await
    }

    async fn list_all<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        api_version: &str,
        what: &str,
    ) -> Result<Vec<T>, UpstreamError> {
        let mut items = Vec::new();
        let mut next = Some(self.url(segments, api_version)?);
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_PAGES {
                return Err(UpstreamError::Decode(format!(
                    "{what} listing exceeded {MAX_PAGES} pages"
                )));
            }
            let page: Page<T> = self.get_json(url, what).await?;
            items.extend(page.value);
            next = match page.next_link.filter(|link| !link.trim().is_empty()) {
                Some(link) => Some(Url::parse(&link).map_err(|error| {
                    UpstreamError::Decode(format!("invalid {what} nextLink: {error}"))
                })?),
                None => None,
            };
        }

        Ok(items)
    }
}

fn cluster_segments<'a>(resource_group: &'a str, cluster: &'a str) -> [&'a str; 6] {
    [
        "resourceGroups",
        resource_group,
        "providers",
        "Microsoft.ContainerService",
        "managedClusters",
        cluster,
    ]
}

fn provider_segments<'a>(
    resource_group: &'a str,
    namespace: &'a str,
    resource_type: &'a str,
    name: &'a str,
) -> [&'a str; 6] {
    ["resourceGroups", resource_group, "providers", namespace, resource_type, name]
}

#[async_trait]
impl ManagementApi for ArmClient {
    async fn managed_cluster(
        &self,
        resource_group: &str,
        cluster: &str,
    ) -> Result<ManagedCluster, UpstreamError> {
        let url = self.url(&cluster_segments(resource_group, cluster), CONTAINER_SERVICE_API)?;
        self.get_json(url, "managed cluster").await
    }

    async fn agent_pools(
        &self,
        resource_group: &str,
        cluster: &str,
    ) -> Result<Vec<AgentPool>, UpstreamError> {
        let segments =
            [&cluster_segments(resource_group, cluster)[..], &["agentPools"][..]].concat();
        self.list_all(&segments, CONTAINER_SERVICE_API, "agent pools").await
    }

    async fn cluster_user_credentials(
        &self,
        resource_group: &str,
        cluster: &str,
    ) -> Result<CredentialResults, UpstreamError> {
        let segments =
            [&cluster_segments(resource_group, cluster)[..], &["listClusterUserCredential"][..]]
                .concat();
        let url = self.url(&segments, CONTAINER_SERVICE_API)?;
        let token = self.credential.bearer_token(&self.http, self.timeout_secs).await?;
        let request = self.http.post(url).bearer_auth(token.expose_secret());
        let response = http::send(request, self.timeout_secs).await?;
        http::decode_json(response, "cluster user credential").await
    }

    async fn resource_group(&self, resource_group: &str) -> Result<ResourceGroup, UpstreamError> {
        let url = self.url(&["resourceGroups", resource_group], RESOURCES_API)?;
        self.get_json(url, "resource group").await
    }

    async fn resources(&self, resource_group: &str) -> Result<Vec<GenericResource>, UpstreamError> {
        self.list_all(&["resourceGroups", resource_group, "resources"], RESOURCES_API, "resources")
            .await
    }

    async fn web_site(&self, resource_group: &str, name: &str) -> Result<WebSite, UpstreamError> {
        let segments = provider_segments(resource_group, "Microsoft.Web", "sites", name);
        self.get_json(self.url(&segments, WEB_API)?, "web site").await
    }

    async fn storage_account(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<StorageAccount, UpstreamError> {
        let segments =
            provider_segments(resource_group, "Microsoft.Storage", "storageAccounts", name);
        self.get_json(self.url(&segments, STORAGE_API)?, "storage account").await
    }

    async fn subscription(&self) -> Result<Subscription, UpstreamError> {
        self.get_json(self.url(&[], SUBSCRIPTIONS_API)?, "subscription").await
    }
}

#[cfg(test)]
mod tests {
    use opsgate_core::config::AppConfig;

    use super::{
        cluster_segments, provider_segments, ArmClient, GenericResource, ManagedCluster, Page,
        Subscription,
    };

    fn client() -> ArmClient {
        let mut config = AppConfig::default();
        config.azure.subscription_id = "00000000-1111-2222-3333-444444444444".to_string().into();
        config.azure.management_endpoint = "https://management.example.test/".to_string();
        ArmClient::from_config(&config.azure).expect("client")
    }

    #[test]
    fn cluster_urls_are_scoped_to_subscription_and_group() {
        let client = client();
        let url = client.url(&cluster_segments("ops-rg", "ops-aks"), "2024-05-01").expect("url");
        assert_eq!(
            url.as_str(),
            "https://management.example.test/subscriptions/00000000-1111-2222-3333-444444444444\
             /resourceGroups/ops-rg/providers/Microsoft.ContainerService/managedClusters/ops-aks\
             ?api-version=2024-05-01"
        );
    }

    #[test]
    fn resource_names_cannot_leave_their_path_segment() {
        let client = client();
        let segments =
            provider_segments("ops-rg", "Microsoft.Web", "sites", "../../../../providers/x?a=b");
        let url = client.url(&segments, "2023-12-01").expect("url");

        assert!(url.as_str().contains("/sites/..%2F..%2F..%2F..%2Fproviders%2Fx%3Fa=b?"));
        assert_eq!(url.query(), Some("api-version=2023-12-01"));
        assert_eq!(
            url.path_segments().and_then(Iterator::last),
            Some("..%2F..%2F..%2F..%2Fproviders%2Fx%3Fa=b")
        );
    }

    #[test]
    fn managed_cluster_payload_decodes() {
        let payload = r#"{
            "name": "ops-aks",
            "location": "eastus",
            "properties": {
                "provisioningState": "Succeeded",
                "kubernetesVersion": "1.29.4",
                "fqdn": "ops-aks.hcp.eastus.azmk8s.io",
                "powerState": {"code": "Running"},
                "agentPoolProfiles": [{"name": "system", "count": 2, "vmSize": "Standard_D2s_v3", "osType": "Linux"}]
            }
        }"#;
        let cluster: ManagedCluster = serde_json::from_str(payload).expect("decode");
        assert_eq!(cluster.properties.kubernetes_version.as_deref(), Some("1.29.4"));
        assert_eq!(cluster.properties.agent_pool_profiles[0].count, Some(2));
        assert_eq!(
            cluster.properties.power_state.and_then(|state| state.code).as_deref(),
            Some("Running")
        );
    }

    #[test]
    fn resource_page_carries_next_link() {
        let payload = r#"{
            "value": [{"id": "/subscriptions/x/resourceGroups/rg/providers/Microsoft.Web/sites/portal", "name": "portal", "type": "Microsoft.Web/sites", "location": "eastus"}],
            "nextLink": "https://management.example.test/next?page=2"
        }"#;
        let page: Page<GenericResource> = serde_json::from_str(payload).expect("decode");
        assert_eq!(page.value[0].resource_type, "Microsoft.Web/sites");
        assert!(page.next_link.is_some());
    }

    #[test]
    fn subscription_payload_decodes() {
        let payload = r#"{"subscriptionId": "abc", "displayName": "Ops Prod", "state": "Enabled"}"#;
        let subscription: Subscription = serde_json::from_str(payload).expect("decode");
        assert_eq!(subscription.display_name, "Ops Prod");
        assert_eq!(subscription.state.as_deref(), Some("Enabled"));
    }
}
