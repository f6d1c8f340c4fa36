use opsgate_core::config::AzureConfig;
use opsgate_core::UpstreamError;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::http;

/// Client-credentials identity for the management API.
///
/// A token is requested for every upstream read; nothing is cached between calls.
#[derive(Clone, Debug)]
pub struct ClientSecretCredential {
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    scope: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
}

impl ClientSecretCredential {
    pub fn from_config(azure: &AzureConfig) -> Self {
        let authority = azure.authority_host.trim_end_matches('/');
        let endpoint = azure.management_endpoint.trim_end_matches('/');
        Self {
            token_url: format!("{authority}/{}/oauth2/v2.0/token", azure.tenant_id),
            client_id: azure.client_id.clone(),
            client_secret: azure.client_secret.clone(),
            scope: format!("{endpoint}/.default"),
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub async fn bearer_token(
        &self,
        client: &reqwest::Client,
        timeout_secs: u64,
    ) -> Result<SecretString, UpstreamError> {
        let request = client.post(&self.token_url).form(&[
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("scope", self.scope.as_str()),
        ]);

        let response = http::send(request, timeout_secs).await.map_err(|error| match error {
            UpstreamError::Status { status, message } => {
                UpstreamError::Auth(format!("token endpoint returned {status}: {message}"))
            }
            UpstreamError::NotFound(message) => UpstreamError::Auth(message),
            other => other,
        })?;

        let token: TokenResponse = http::decode_json(response, "token response").await?;
        if token.access_token.trim().is_empty() {
            return Err(UpstreamError::Auth("token endpoint returned an empty token".to_string()));
        }
        if let Some(token_type) = token.token_type.as_deref() {
            if !token_type.eq_ignore_ascii_case("bearer") {
                return Err(UpstreamError::Auth(format!(
                    "unsupported token type `{token_type}`"
                )));
            }
        }

        Ok(token.access_token.into())
    }
}

#[cfg(test)]
mod tests {
    use opsgate_core::config::AppConfig;

    use super::ClientSecretCredential;

    #[test]
    fn token_url_and_scope_follow_configured_hosts() {
        let mut config = AppConfig::default();
        config.azure.tenant_id = "tenant-123".to_string();
        config.azure.authority_host = "https://login.example.test/".to_string();
        config.azure.management_endpoint = "https://management.example.test/".to_string();

        let credential = ClientSecretCredential::from_config(&config.azure);

        assert_eq!(
            credential.token_url(),
            "https://login.example.test/tenant-123/oauth2/v2.0/token"
        );
        assert_eq!(credential.scope(), "https://management.example.test/.default");
    }

    #[test]
    fn debug_output_does_not_expose_client_secret() {
        let mut config = AppConfig::default();
        config.azure.client_secret = "super-secret-value".to_string().into();

        let credential = ClientSecretCredential::from_config(&config.azure);
        assert!(!format!("{credential:?}").contains("super-secret-value"));
    }
}
