//! Cluster API access built from a kubeconfig issued by the management API.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use opsgate_core::UpstreamError;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::arm::CredentialResults;
use crate::http;

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub container_port: i32,
    #[serde(default)]
    pub protocol: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub ports: Option<Vec<ContainerPort>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub containers: Vec<Container>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub restart_count: i32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PodCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(rename = "podIP", default)]
    pub pod_ip: Option<String>,
    #[serde(default)]
    pub conditions: Option<Vec<PodCondition>>,
    #[serde(default)]
    pub container_statuses: Option<Vec<ContainerStatus>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Pod {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Option<PodSpec>,
    #[serde(default)]
    pub status: Option<PodStatus>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct DeploymentSpec {
    #[serde(default)]
    pub replicas: Option<i32>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    #[serde(default)]
    pub ready_replicas: Option<i32>,
    #[serde(default)]
    pub available_replicas: Option<i32>,
    #[serde(default)]
    pub updated_replicas: Option<i32>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Deployment {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Option<DeploymentSpec>,
    #[serde(default)]
    pub status: Option<DeploymentStatus>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    #[serde(default)]
    pub name: Option<String>,
    pub port: i32,
    /// Either a port number or a named container port.
    #[serde(default)]
    pub target_port: Option<Value>,
    #[serde(default)]
    pub protocol: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ServiceSpec {
    #[serde(rename = "type", default)]
    pub service_type: Option<String>,
    #[serde(rename = "clusterIP", default)]
    pub cluster_ip: Option<String>,
    #[serde(default)]
    pub ports: Option<Vec<ServicePort>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Service {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Option<ServiceSpec>,
}

#[derive(Deserialize)]
struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// Namespaced cluster reads. Implementations never create, patch or delete objects.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, UpstreamError>;

    async fn read_pod(&self, namespace: &str, name: &str) -> Result<Pod, UpstreamError>;

    async fn read_pod_log(
        &self,
        namespace: &str,
        name: &str,
        tail_lines: usize,
    ) -> Result<String, UpstreamError>;

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, UpstreamError>;

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, UpstreamError>;
}

/// Opens a cluster session from a freshly issued kubeconfig.
pub trait ClusterConnector: Send + Sync {
    fn connect(&self, kubeconfig: &Kubeconfig) -> Result<Arc<dyn ClusterApi>, UpstreamError>;
}

#[derive(Clone, Debug, Deserialize)]
pub struct Kubeconfig {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(rename = "current-context", default)]
    current_context: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Clone, Debug, Deserialize)]
struct ClusterEntry {
    server: String,
    #[serde(rename = "certificate-authority-data", default)]
    certificate_authority_data: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserEntry,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct UserEntry {
    #[serde(rename = "client-certificate-data", default)]
    client_certificate_data: Option<String>,
    #[serde(rename = "client-key-data", default)]
    client_key_data: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Clone, Debug, Deserialize)]
struct ContextEntry {
    cluster: String,
    user: String,
}

#[derive(Clone, Debug)]
pub enum ClusterAuth {
    Token(SecretString),
    /// Concatenated client certificate and private key, PEM encoded.
    ClientCertificate(SecretString),
}

#[derive(Clone, Debug)]
pub struct ClusterEndpoint {
    pub server: String,
    pub certificate_authority_pem: Option<Vec<u8>>,
    pub auth: ClusterAuth,
}

impl Kubeconfig {
    pub fn from_yaml(document: &str) -> Result<Self, UpstreamError> {
        serde_yaml::from_str(document)
            .map_err(|error| UpstreamError::Decode(format!("invalid kubeconfig: {error}")))
    }

    /// Decodes the first kubeconfig of a `listClusterUserCredential` result.
    pub fn from_credential_results(results: &CredentialResults) -> Result<Self, UpstreamError> {
        let entry = results.kubeconfigs.first().ok_or_else(|| {
            UpstreamError::Decode("credential response contained no kubeconfig".to_string())
        })?;
        let document = decode_base64_text(&entry.value, "kubeconfig")?;
        Self::from_yaml(&document)
    }

    /// Resolves the current context (or the first one when none is selected).
    pub fn endpoint(&self) -> Result<ClusterEndpoint, UpstreamError> {
        let context = match self.current_context.as_deref() {
            Some(name) => self.contexts.iter().find(|context| context.name == name),
            None => self.contexts.first(),
        };

        let (cluster, user) = match context {
            Some(context) => (
                self.clusters.iter().find(|cluster| cluster.name == context.context.cluster),
                self.users.iter().find(|user| user.name == context.context.user),
            ),
            None => (self.clusters.first(), self.users.first()),
        };

        let cluster = cluster.ok_or_else(|| {
            UpstreamError::Decode("kubeconfig does not name a reachable cluster".to_string())
        })?;

        let certificate_authority_pem = cluster
            .cluster
            .certificate_authority_data
            .as_deref()
            .map(|data| decode_base64(data, "certificate authority"))
            .transpose()?;

        let auth = match user.map(|user| &user.user) {
            Some(UserEntry { token: Some(token), .. }) => ClusterAuth::Token(token.clone().into()),
            Some(UserEntry {
                client_certificate_data: Some(certificate),
                client_key_data: Some(key),
                ..
            }) => {
                let mut pem = decode_base64_text(certificate, "client certificate")?;
                if !pem.ends_with('\n') {
                    pem.push('\n');
                }
                pem.push_str(&decode_base64_text(key, "client key")?);
                ClusterAuth::ClientCertificate(pem.into())
            }
            _ => {
                return Err(UpstreamError::Decode(
                    "kubeconfig user has no usable token or client certificate".to_string(),
                ))
            }
        };

        Ok(ClusterEndpoint {
            server: cluster.cluster.server.trim_end_matches('/').to_string(),
            certificate_authority_pem,
            auth,
        })
    }
}

fn decode_base64(data: &str, what: &str) -> Result<Vec<u8>, UpstreamError> {
    STANDARD
        .decode(data.trim())
        .map_err(|error| UpstreamError::Decode(format!("{what} is not valid base64: {error}")))
}

fn decode_base64_text(data: &str, what: &str) -> Result<String, UpstreamError> {
    String::from_utf8(decode_base64(data, what)?)
        .map_err(|error| UpstreamError::Decode(format!("{what} is not valid utf-8: {error}")))
}

pub struct KubeClient {
    http: reqwest::Client,
    server: Url,
    token: Option<SecretString>,
    timeout_secs: u64,
}

impl KubeClient {
    pub fn connect(endpoint: &ClusterEndpoint, timeout_secs: u64) -> Result<Self, UpstreamError> {
        let mut builder =
            reqwest::Client::builder().timeout(std::time::Duration::from_secs(timeout_secs));

        if let Some(pem) = endpoint.certificate_authority_pem.as_deref() {
            let certificate = reqwest::Certificate::from_pem(pem).map_err(|error| {
                UpstreamError::Decode(format!("invalid cluster certificate authority: {error}"))
            })?;
            builder = builder.add_root_certificate(certificate);
        }

        let mut token = None;
        match &endpoint.auth {
            ClusterAuth::Token(value) => token = Some(value.clone()),
            ClusterAuth::ClientCertificate(pem) => {
                let identity = reqwest::Identity::from_pem(pem.expose_secret().as_bytes())
                    .map_err(|error| {
                        UpstreamError::Decode(format!("invalid client certificate: {error}"))
                    })?;
                builder = builder.identity(identity);
            }
        }

        let http = builder.build().map_err(|error| {
            UpstreamError::Transport(format!("failed to build cluster client: {error}"))
        })?;

        let server = http::parse_base_url(&endpoint.server, "cluster server").map_err(|error| {
            match error {
                UpstreamError::Transport(message) => UpstreamError::Decode(message),
                other => other,
            }
        })?;
        Ok(Self { http, server, token, timeout_secs })
    }

    pub(crate) fn url(&self, segments: &[&str]) -> Result<Url, UpstreamError> {
        http::join_segments(&self.server, segments.iter().copied())
    }

    fn request(&self, url: Url) -> reqwest::RequestBuilder {
        let request = self.http.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        what: &str,
    ) -> Result<T, UpstreamError> {
        let response = http::send(self.request(self.url(segments)?), self.timeout_secs).await?;
        http::decode_json(response, what).await
    }
}

#[async_trait]
impl ClusterApi for KubeClient {
    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, UpstreamError> {
        let segments = ["api", "v1", "namespaces", namespace, "pods"];
        let list: ObjectList<Pod> = self.get_json(&segments, "pod list").await?;
        Ok(list.items)
    }

    async fn read_pod(&self, namespace: &str, name: &str) -> Result<Pod, UpstreamError> {
        self.get_json(&["api", "v1", "namespaces", namespace, "pods", name], "pod").await
    }

    async fn read_pod_log(
        &self,
        namespace: &str,
        name: &str,
        tail_lines: usize,
    ) -> Result<String, UpstreamError> {
        let mut url = self.url(&["api", "v1", "namespaces", namespace, "pods", name, "log"])?;
        url.query_pairs_mut().append_pair("tailLines", &tail_lines.to_string());
        let response = http::send(self.request(url), self.timeout_secs).await?;
        http::decode_text(response, "pod log").await
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, UpstreamError> {
        let segments = ["apis", "apps", "v1", "namespaces", namespace, "deployments"];
        let list: ObjectList<Deployment> = self.get_json(&segments, "deployment list").await?;
        Ok(list.items)
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, UpstreamError> {
        let segments = ["api", "v1", "namespaces", namespace, "services"];
        let list: ObjectList<Service> = self.get_json(&segments, "service list").await?;
        Ok(list.items)
    }
}

/// Connects over HTTPS using the kubeconfig's own endpoint and credentials.
#[derive(Clone, Debug)]
pub struct HttpClusterConnector {
    timeout_secs: u64,
}

impl HttpClusterConnector {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

impl ClusterConnector for HttpClusterConnector {
    fn connect(&self, kubeconfig: &Kubeconfig) -> Result<Arc<dyn ClusterApi>, UpstreamError> {
        let endpoint = kubeconfig.endpoint()?;
        Ok(Arc::new(KubeClient::connect(&endpoint, self.timeout_secs)?))
    }
}
