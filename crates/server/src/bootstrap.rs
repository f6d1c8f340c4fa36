use std::sync::Arc;

use opsgate_agent::{AgentRuntime, LlmError, OpenAiCompatibleClient};
use opsgate_cloud::ResourceProxy;
use opsgate_core::config::{AppConfig, ConfigError, LoadOptions};
use opsgate_core::{OperationExecutor, UpstreamError};
use thiserror::Error;
use tracing::info;

use crate::sessions::SessionStore;
use crate::state::AppState;

pub struct Application {
    pub config: AppConfig,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("resource proxy setup failed: {0}")]
    Proxy(#[source] UpstreamError),
    #[error("language backend setup failed: {0}")]
    Llm(#[from] LlmError),
}

pub fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config)
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        resource_group = %config.azure.resource_group,
        cluster = %config.azure.cluster_name,
        "starting application bootstrap"
    );

    let proxy = ResourceProxy::from_config(&config.azure).map_err(BootstrapError::Proxy)?;
    let executor: Arc<dyn OperationExecutor> = Arc::new(proxy);

    let llm = OpenAiCompatibleClient::from_config(&config.llm)?;
    info!(
        event_name = "system.bootstrap.llm_ready",
        correlation_id = "bootstrap",
        endpoint = %llm.endpoint(),
        model = %llm.model(),
        "language backend configured"
    );

    let runtime = AgentRuntime::from_config(&config, executor.clone(), Arc::new(llm));
    let state = AppState::new(
        executor,
        Arc::new(runtime),
        SessionStore::from_config(&config.server),
        &config.server.bearer_token,
    );

    Ok(Application { config, state })
}

#[cfg(test)]
mod tests {
    use opsgate_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn overrides() -> ConfigOverrides {
        ConfigOverrides {
            tenant_id: Some("tenant".to_string()),
            client_id: Some("client".to_string()),
            client_secret: Some("client-secret".to_string()),
            subscription_id: Some("7c1e4b2a-9f3d-4e51-8a6b-0d2c3e4f5a6b".to_string()),
            bearer_token: Some("gateway-token".to_string()),
            llm_api_key: Some("sk-test".to_string()),
            ..ConfigOverrides::default()
        }
    }

    #[test]
    fn bootstrap_fails_fast_without_bearer_token() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides { bearer_token: Some(String::new()), ..overrides() },
            ..LoadOptions::default()
        });

        let message = result.err().expect("bootstrap should fail").to_string();
        assert!(message.contains("server.bearer_token"));
    }

    #[test]
    fn bootstrap_builds_state_from_valid_overrides() {
        let app = bootstrap(LoadOptions { overrides: overrides(), ..LoadOptions::default() })
            .expect("bootstrap should succeed");

        assert_eq!(app.config.server.port, 8000);
        assert!(app.state.bearer_matches("gateway-token"));
        assert!(!app.state.bearer_matches("gateway-token "));
    }
}
