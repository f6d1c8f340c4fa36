use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub azure: AzureConfig,
    pub cluster: ClusterConfig,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub guardrails: GuardrailConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct AzureConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub subscription_id: SecretString,
    pub resource_group: String,
    pub cluster_name: String,
    pub authority_host: String,
    pub management_endpoint: String,
    pub request_timeout_secs: u64,
}

/// Names the intent router falls back to when a question does not carry them.
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    pub default_namespace: String,
    pub alternate_namespace: String,
    pub web_app: String,
    pub function_app: String,
    pub storage_account: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub bearer_token: SecretString,
    pub graceful_shutdown_secs: u64,
    pub session_idle_secs: u64,
    pub max_sessions: usize,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct GuardrailConfig {
    pub violation_threshold: u32,
    pub history_limit: usize,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub subscription_id: Option<String>,
    pub resource_group: Option<String>,
    pub cluster_name: Option<String>,
    pub management_endpoint: Option<String>,
    pub bearer_token: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            azure: AzureConfig {
                tenant_id: String::new(),
                client_id: String::new(),
                client_secret: String::new().into(),
                subscription_id: String::new().into(),
                resource_group: "hsps-demo-rg".to_string(),
                cluster_name: "hsps-aks-cluster".to_string(),
                authority_host: "https://login.microsoftonline.com".to_string(),
                management_endpoint: "https://management.azure.com".to_string(),
                request_timeout_secs: 20,
            },
            cluster: ClusterConfig {
                default_namespace: "hsps".to_string(),
                alternate_namespace: "star".to_string(),
                web_app: "hsps-portal".to_string(),
                function_app: "hsps-pod-shutdown".to_string(),
                storage_account: "hspspodshutdown".to_string(),
            },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 8000,
                bearer_token: String::new().into(),
                graceful_shutdown_secs: 15,
                session_idle_secs: 1_800,
                max_sessions: 1_000,
            },
            llm: LlmConfig {
                provider: LlmProvider::OpenAi,
                api_key: None,
                base_url: Some("https://api.openai.com".to_string()),
                model: "gpt-4o-mini".to_string(),
                max_tokens: 500,
                temperature: 0.7,
                timeout_secs: 30,
            },
            guardrails: GuardrailConfig { violation_threshold: 3, history_limit: 20 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("opsgate.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(azure) = patch.azure {
            if let Some(tenant_id) = azure.tenant_id {
                self.azure.tenant_id = tenant_id;
            }
            if let Some(client_id) = azure.client_id {
                self.azure.client_id = client_id;
            }
            if let Some(client_secret_value) = azure.client_secret {
                self.azure.client_secret = secret_value(client_secret_value);
            }
            if let Some(subscription_id_value) = azure.subscription_id {
                self.azure.subscription_id = secret_value(subscription_id_value);
            }
            if let Some(resource_group) = azure.resource_group {
                self.azure.resource_group = resource_group;
            }
            if let Some(cluster_name) = azure.cluster_name {
                self.azure.cluster_name = cluster_name;
            }
            if let Some(authority_host) = azure.authority_host {
                self.azure.authority_host = authority_host;
            }
            if let Some(management_endpoint) = azure.management_endpoint {
                self.azure.management_endpoint = management_endpoint;
            }
            if let Some(request_timeout_secs) = azure.request_timeout_secs {
                self.azure.request_timeout_secs = request_timeout_secs;
            }
        }

        if let Some(cluster) = patch.cluster {
            if let Some(default_namespace) = cluster.default_namespace {
                self.cluster.default_namespace = default_namespace;
            }
            if let Some(alternate_namespace) = cluster.alternate_namespace {
                self.cluster.alternate_namespace = alternate_namespace;
            }
            if let Some(web_app) = cluster.web_app {
                self.cluster.web_app = web_app;
            }
            if let Some(function_app) = cluster.function_app {
                self.cluster.function_app = function_app;
            }
            if let Some(storage_account) = cluster.storage_account {
                self.cluster.storage_account = storage_account;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(bearer_token_value) = server.bearer_token {
                self.server.bearer_token = secret_value(bearer_token_value);
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(session_idle_secs) = server.session_idle_secs {
                self.server.session_idle_secs = session_idle_secs;
            }
            if let Some(max_sessions) = server.max_sessions {
                self.server.max_sessions = max_sessions;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(guardrails) = patch.guardrails {
            if let Some(violation_threshold) = guardrails.violation_threshold {
                self.guardrails.violation_threshold = violation_threshold;
            }
            if let Some(history_limit) = guardrails.history_limit {
                self.guardrails.history_limit = history_limit;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("OPSGATE_AZURE_TENANT_ID") {
            self.azure.tenant_id = value;
        }
        if let Some(value) = read_env("OPSGATE_AZURE_CLIENT_ID") {
            self.azure.client_id = value;
        }
        if let Some(value) = read_env("OPSGATE_AZURE_CLIENT_SECRET") {
            self.azure.client_secret = secret_value(value);
        }
        if let Some(value) = read_env("OPSGATE_AZURE_SUBSCRIPTION_ID") {
            self.azure.subscription_id = secret_value(value);
        }
        if let Some(value) = read_env("OPSGATE_AZURE_RESOURCE_GROUP") {
            self.azure.resource_group = value;
        }
        if let Some(value) = read_env("OPSGATE_AZURE_CLUSTER_NAME") {
            self.azure.cluster_name = value;
        }
        if let Some(value) = read_env("OPSGATE_AZURE_AUTHORITY_HOST") {
            self.azure.authority_host = value;
        }
        if let Some(value) = read_env("OPSGATE_AZURE_MANAGEMENT_ENDPOINT") {
            self.azure.management_endpoint = value;
        }
        if let Some(value) = read_env("OPSGATE_AZURE_REQUEST_TIMEOUT_SECS") {
            self.azure.request_timeout_secs =
                parse_u64("OPSGATE_AZURE_REQUEST_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("OPSGATE_CLUSTER_DEFAULT_NAMESPACE") {
            self.cluster.default_namespace = value;
        }
        if let Some(value) = read_env("OPSGATE_CLUSTER_ALTERNATE_NAMESPACE") {
            self.cluster.alternate_namespace = value;
        }
        if let Some(value) = read_env("OPSGATE_CLUSTER_WEB_APP") {
            self.cluster.web_app = value;
        }
        if let Some(value) = read_env("OPSGATE_CLUSTER_FUNCTION_APP") {
            self.cluster.function_app = value;
        }
        if let Some(value) = read_env("OPSGATE_CLUSTER_STORAGE_ACCOUNT") {
            self.cluster.storage_account = value;
        }

        if let Some(value) = read_env("OPSGATE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("OPSGATE_SERVER_PORT") {
            self.server.port = parse_u16("OPSGATE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("OPSGATE_SERVER_BEARER_TOKEN") {
            self.server.bearer_token = secret_value(value);
        }
        if let Some(value) = read_env("OPSGATE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("OPSGATE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("OPSGATE_SERVER_SESSION_IDLE_SECS") {
            self.server.session_idle_secs = parse_u64("OPSGATE_SERVER_SESSION_IDLE_SECS", &value)?;
        }
        if let Some(value) = read_env("OPSGATE_SERVER_MAX_SESSIONS") {
            self.server.max_sessions = parse_usize("OPSGATE_SERVER_MAX_SESSIONS", &value)?;
        }

        if let Some(value) = read_env("OPSGATE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("OPSGATE_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("OPSGATE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("OPSGATE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("OPSGATE_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("OPSGATE_LLM_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("OPSGATE_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("OPSGATE_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("OPSGATE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("OPSGATE_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("OPSGATE_GUARDRAILS_VIOLATION_THRESHOLD") {
            self.guardrails.violation_threshold =
                parse_u32("OPSGATE_GUARDRAILS_VIOLATION_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("OPSGATE_GUARDRAILS_HISTORY_LIMIT") {
            self.guardrails.history_limit =
                parse_usize("OPSGATE_GUARDRAILS_HISTORY_LIMIT", &value)?;
        }

        let log_level =
            read_env("OPSGATE_LOGGING_LEVEL").or_else(|| read_env("OPSGATE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("OPSGATE_LOGGING_FORMAT").or_else(|| read_env("OPSGATE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(tenant_id) = overrides.tenant_id {
            self.azure.tenant_id = tenant_id;
        }
        if let Some(client_id) = overrides.client_id {
            self.azure.client_id = client_id;
        }
        if let Some(client_secret) = overrides.client_secret {
            self.azure.client_secret = secret_value(client_secret);
        }
        if let Some(subscription_id) = overrides.subscription_id {
            self.azure.subscription_id = secret_value(subscription_id);
        }
        if let Some(resource_group) = overrides.resource_group {
            self.azure.resource_group = resource_group;
        }
        if let Some(cluster_name) = overrides.cluster_name {
            self.azure.cluster_name = cluster_name;
        }
        if let Some(management_endpoint) = overrides.management_endpoint {
            self.azure.management_endpoint = management_endpoint;
        }
        if let Some(bearer_token) = overrides.bearer_token {
            self.server.bearer_token = secret_value(bearer_token);
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_azure(&self.azure)?;
        validate_cluster(&self.cluster)?;
        validate_server(&self.server)?;
        validate_llm(&self.llm)?;
        validate_guardrails(&self.guardrails)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("opsgate.toml"), PathBuf::from("config/opsgate.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_azure(azure: &AzureConfig) -> Result<(), ConfigError> {
    if azure.tenant_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "azure.tenant_id is required (set OPSGATE_AZURE_TENANT_ID)".to_string(),
        ));
    }
    if azure.client_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "azure.client_id is required (set OPSGATE_AZURE_CLIENT_ID)".to_string(),
        ));
    }
    if azure.client_secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "azure.client_secret is required (set OPSGATE_AZURE_CLIENT_SECRET)".to_string(),
        ));
    }
    if azure.subscription_id.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "azure.subscription_id is required (set OPSGATE_AZURE_SUBSCRIPTION_ID)".to_string(),
        ));
    }
    if azure.resource_group.trim().is_empty() || azure.cluster_name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "azure.resource_group and azure.cluster_name must not be empty".to_string(),
        ));
    }

    for (key, url) in [
        ("azure.authority_host", &azure.authority_host),
        ("azure.management_endpoint", &azure.management_endpoint),
    ] {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "{key} must start with http:// or https://"
            )));
        }
    }

    if azure.request_timeout_secs == 0 || azure.request_timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "azure.request_timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_cluster(cluster: &ClusterConfig) -> Result<(), ConfigError> {
    let default_namespace = cluster.default_namespace.trim();
    let alternate_namespace = cluster.alternate_namespace.trim();
    if default_namespace.is_empty() || alternate_namespace.is_empty() {
        return Err(ConfigError::Validation(
            "cluster.default_namespace and cluster.alternate_namespace must not be empty"
                .to_string(),
        ));
    }
    if default_namespace.eq_ignore_ascii_case(alternate_namespace) {
        return Err(ConfigError::Validation(
            "cluster.alternate_namespace must differ from cluster.default_namespace".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bearer_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "server.bearer_token is required (set OPSGATE_SERVER_BEARER_TOKEN)".to_string(),
        ));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    if server.session_idle_secs == 0 || server.max_sessions == 0 {
        return Err(ConfigError::Validation(
            "server.session_idle_secs and server.max_sessions must be greater than zero"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    let missing_base_url =
        llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
    if missing_base_url {
        return Err(ConfigError::Validation("llm.base_url is required".to_string()));
    }

    if llm.provider == LlmProvider::OpenAi {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "llm.api_key is required for the openai provider".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_guardrails(guardrails: &GuardrailConfig) -> Result<(), ConfigError> {
    if guardrails.violation_threshold == 0 {
        return Err(ConfigError::Validation(
            "guardrails.violation_threshold must be at least 1".to_string(),
        ));
    }

    if guardrails.history_limit < 2 {
        return Err(ConfigError::Validation(
            "guardrails.history_limit must hold at least one exchange (>= 2)".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    azure: Option<AzurePatch>,
    cluster: Option<ClusterPatch>,
    server: Option<ServerPatch>,
    llm: Option<LlmPatch>,
    guardrails: Option<GuardrailPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct AzurePatch {
    tenant_id: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    subscription_id: Option<String>,
    resource_group: Option<String>,
    cluster_name: Option<String>,
    authority_host: Option<String>,
    management_endpoint: Option<String>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ClusterPatch {
    default_namespace: Option<String>,
    alternate_namespace: Option<String>,
    web_app: Option<String>,
    function_app: Option<String>,
    storage_account: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    bearer_token: Option<String>,
    graceful_shutdown_secs: Option<u64>,
    session_idle_secs: Option<u64>,
    max_sessions: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GuardrailPatch {
    violation_threshold: Option<u32>,
    history_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

/// Environment variables that [`AppConfig::load`] reads. Tests clear these between runs.
pub const ENV_KEYS: &[&str] = &[
    "OPSGATE_AZURE_TENANT_ID",
    "OPSGATE_AZURE_CLIENT_ID",
    "OPSGATE_AZURE_CLIENT_SECRET",
    "OPSGATE_AZURE_SUBSCRIPTION_ID",
    "OPSGATE_AZURE_RESOURCE_GROUP",
    "OPSGATE_AZURE_CLUSTER_NAME",
    "OPSGATE_AZURE_AUTHORITY_HOST",
    "OPSGATE_AZURE_MANAGEMENT_ENDPOINT",
    "OPSGATE_AZURE_REQUEST_TIMEOUT_SECS",
    "OPSGATE_CLUSTER_DEFAULT_NAMESPACE",
    "OPSGATE_CLUSTER_ALTERNATE_NAMESPACE",
    "OPSGATE_CLUSTER_WEB_APP",
    "OPSGATE_CLUSTER_FUNCTION_APP",
    "OPSGATE_CLUSTER_STORAGE_ACCOUNT",
    "OPSGATE_SERVER_BIND_ADDRESS",
    "OPSGATE_SERVER_PORT",
    "OPSGATE_SERVER_BEARER_TOKEN",
    "OPSGATE_SERVER_GRACEFUL_SHUTDOWN_SECS",
    "OPSGATE_SERVER_SESSION_IDLE_SECS",
    "OPSGATE_SERVER_MAX_SESSIONS",
    "OPSGATE_LLM_PROVIDER",
    "OPSGATE_LLM_API_KEY",
    "OPSGATE_LLM_BASE_URL",
    "OPSGATE_LLM_MODEL",
    "OPSGATE_LLM_MAX_TOKENS",
    "OPSGATE_LLM_TEMPERATURE",
    "OPSGATE_LLM_TIMEOUT_SECS",
    "OPSGATE_GUARDRAILS_VIOLATION_THRESHOLD",
    "OPSGATE_GUARDRAILS_HISTORY_LIMIT",
    "OPSGATE_LOGGING_LEVEL",
    "OPSGATE_LOG_LEVEL",
    "OPSGATE_LOGGING_FORMAT",
    "OPSGATE_LOG_FORMAT",
];

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, ENV_KEYS};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars() {
        for var in ENV_KEYS {
            env::remove_var(var);
        }
    }

    fn set_required_vars() {
        env::set_var("OPSGATE_AZURE_TENANT_ID", "tenant-test");
        env::set_var("OPSGATE_AZURE_CLIENT_ID", "client-test");
        env::set_var("OPSGATE_AZURE_CLIENT_SECRET", "client-secret-value");
        env::set_var("OPSGATE_AZURE_SUBSCRIPTION_ID", "3306e559-a033-43dd-bf98-fc59174d563f");
        env::set_var("OPSGATE_SERVER_BEARER_TOKEN", "bearer-secret-value");
        env::set_var("OPSGATE_LLM_API_KEY", "sk-secret-value");
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars();
        set_required_vars();
        env::set_var("TEST_OPSGATE_TOKEN", "token-from-interpolation");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("opsgate.toml");
            fs::write(
                &path,
                r#"
[cluster]
default_namespace = "payments"
alternate_namespace = "ledger"

[server]
bearer_token = "${TEST_OPSGATE_TOKEN}"
"#,
            )
            .map_err(|err| err.to_string())?;
            env::remove_var("OPSGATE_SERVER_BEARER_TOKEN");

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.server.bearer_token.expose_secret() == "token-from-interpolation",
                "bearer token should be interpolated from the environment",
            )?;
            ensure(
                config.cluster.default_namespace == "payments",
                "namespace should come from the file",
            )?;
            Ok(())
        })();

        env::remove_var("TEST_OPSGATE_TOKEN");
        clear_vars();
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars();
        set_required_vars();
        env::set_var("OPSGATE_LOG_LEVEL", "warn");
        env::set_var("OPSGATE_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warn log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars();
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars();
        set_required_vars();
        env::set_var("OPSGATE_AZURE_RESOURCE_GROUP", "rg-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("opsgate.toml");
            fs::write(
                &path,
                r#"
[azure]
resource_group = "rg-from-file"
cluster_name = "cluster-from-file"

[server]
port = 9100

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    port: Some(9200),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.server.port == 9200, "override port should win")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.azure.resource_group == "rg-from-env",
                "env resource group should win over file",
            )?;
            ensure(
                config.azure.cluster_name == "cluster-from-file",
                "file cluster name should win over default",
            )?;
            Ok(())
        })();

        clear_vars();
        result
    }

    #[test]
    fn validation_fails_fast_without_bearer_token() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars();
        set_required_vars();
        env::remove_var("OPSGATE_SERVER_BEARER_TOKEN");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("server.bearer_token")
            );
            ensure(has_message, "validation failure should mention server.bearer_token")
        })();

        clear_vars();
        result
    }

    #[test]
    fn invalid_numeric_override_is_reported_with_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars();
        set_required_vars();
        env::set_var("OPSGATE_SERVER_PORT", "eighty");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected invalid override error".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, .. } if key == "OPSGATE_SERVER_PORT"
                ),
                "invalid override should name the env key",
            )
        })();

        clear_vars();
        result
    }

    #[test]
    fn zero_violation_threshold_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars();
        set_required_vars();
        env::set_var("OPSGATE_GUARDRAILS_VIOLATION_THRESHOLD", "0");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected threshold validation failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::Validation(ref message)
                        if message.contains("guardrails.violation_threshold")
                ),
                "validation failure should mention the threshold key",
            )
        })();

        clear_vars();
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars();
        set_required_vars();

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("client-secret-value"), "debug must not contain client secret")?;
            ensure(!debug.contains("bearer-secret-value"), "debug must not contain bearer token")?;
            ensure(!debug.contains("sk-secret-value"), "debug must not contain llm api key")?;
            ensure(
                !debug.contains("3306e559-a033-43dd-bf98-fc59174d563f"),
                "debug must not contain the subscription id",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars();
        result
    }
}
