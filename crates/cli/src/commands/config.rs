use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use opsgate_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

use super::CommandResult;

struct Field {
    key: &'static str,
    value: String,
}

pub fn run() -> CommandResult {
    run_with(LoadOptions::default())
}

pub fn run_with(options: LoadOptions) -> CommandResult {
    let config_file_path = match options.config_path.as_deref() {
        Some(path) => path.exists().then(|| path.to_path_buf()),
        None => detect_config_path(),
    };

    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            )
        }
    };

    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source =
            field_source(field.key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(field.key, &field.value, source));
    }

    CommandResult::text(lines.join("\n"))
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let field = |key: &'static str, value: String| Field { key, value };
    let azure = &config.azure;
    let cluster = &config.cluster;
    let server = &config.server;
    let llm = &config.llm;

    vec![
        field("azure.tenant_id", azure.tenant_id.clone()),
        field("azure.client_id", azure.client_id.clone()),
        field("azure.client_secret", redact_secret(azure.client_secret.expose_secret())),
        field("azure.subscription_id", mask_identifier(azure.subscription_id.expose_secret())),
        field("azure.resource_group", azure.resource_group.clone()),
        field("azure.cluster_name", azure.cluster_name.clone()),
        field("azure.authority_host", azure.authority_host.clone()),
        field("azure.management_endpoint", azure.management_endpoint.clone()),
        field("azure.request_timeout_secs", azure.request_timeout_secs.to_string()),
        field("cluster.default_namespace", cluster.default_namespace.clone()),
        field("cluster.alternate_namespace", cluster.alternate_namespace.clone()),
        field("cluster.web_app", cluster.web_app.clone()),
        field("cluster.function_app", cluster.function_app.clone()),
        field("cluster.storage_account", cluster.storage_account.clone()),
        field("server.bind_address", server.bind_address.clone()),
        field("server.port", server.port.to_string()),
        field("server.bearer_token", redact_secret(server.bearer_token.expose_secret())),
        field("server.graceful_shutdown_secs", server.graceful_shutdown_secs.to_string()),
        field("server.session_idle_secs", server.session_idle_secs.to_string()),
        field("server.max_sessions", server.max_sessions.to_string()),
        field("llm.provider", format!("{:?}", llm.provider)),
        field(
            "llm.api_key",
            llm.api_key
                .as_ref()
                .map(|key| redact_secret(key.expose_secret()))
                .unwrap_or_else(|| "<unset>".to_string()),
        ),
        field("llm.base_url", llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string())),
        field("llm.model", llm.model.clone()),
        field("llm.max_tokens", llm.max_tokens.to_string()),
        field("llm.temperature", llm.temperature.to_string()),
        field("llm.timeout_secs", llm.timeout_secs.to_string()),
        field("guardrails.violation_threshold", config.guardrails.violation_threshold.to_string()),
        field("guardrails.history_limit", config.guardrails.history_limit.to_string()),
        field("logging.level", config.logging.level.clone()),
        field("logging.format", format!("{:?}", config.logging.format)),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("opsgate.toml"), PathBuf::from("config/opsgate.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn env_keys(key_path: &str) -> Vec<String> {
    let primary = format!("OPSGATE_{}", key_path.replace('.', "_").to_ascii_uppercase());
    match key_path {
        "logging.level" => vec![primary, "OPSGATE_LOG_LEVEL".to_string()],
        "logging.format" => vec![primary, "OPSGATE_LOG_FORMAT".to_string()],
        _ => vec![primary],
    }
}

fn field_source(
    key_path: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys(key_path).into_iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str) -> String {
    if secret.trim().is_empty() {
        "<empty>".to_string()
    } else {
        "<redacted>".to_string()
    }
}

fn mask_identifier(identifier: &str) -> String {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    if trimmed.chars().count() <= 8 {
        return "<redacted>".to_string();
    }
    let prefix: String = trimmed.chars().take(4).collect();
    format!("{prefix}****")
}
