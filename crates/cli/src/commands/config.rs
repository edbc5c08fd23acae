use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use atlas_core::config::{AppConfig, LoadOptions, ProviderSettings};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: Option<&str>| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "providers.primary",
        config.providers.primary.as_str(),
        source("providers.primary", Some("ATLAS_PRIMARY_PROVIDER")),
    ));
    let fallbacks = config
        .providers
        .fallbacks
        .iter()
        .map(|name| name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    lines.push(render_line(
        "providers.fallbacks",
        if fallbacks.is_empty() { "<none>" } else { &fallbacks },
        source("providers.fallbacks", None),
    ));

    push_provider_lines(&mut lines, "llama", &config.providers.llama, &source);
    push_provider_lines(&mut lines, "gemini", &config.providers.gemini, &source);

    lines.push(render_line(
        "providers.pool.max_global_attempts",
        &config.providers.pool.max_global_attempts.to_string(),
        source("providers.pool.max_global_attempts", Some("ATLAS_POOL_MAX_ATTEMPTS")),
    ));
    lines.push(render_line(
        "providers.pool.request_timeout_secs",
        &config.providers.pool.request_timeout_secs.to_string(),
        source("providers.pool.request_timeout_secs", Some("ATLAS_POOL_REQUEST_TIMEOUT_SECS")),
    ));
    lines.push(render_line(
        "providers.pool.business_timeout_secs",
        &config.providers.pool.business_timeout_secs.to_string(),
        source("providers.pool.business_timeout_secs", Some("ATLAS_POOL_BUSINESS_TIMEOUT_SECS")),
    ));

    lines.push(render_line(
        "server.bind_address",
        &config.server.bind_address,
        source("server.bind_address", Some("ATLAS_SERVER_BIND_ADDRESS")),
    ));
    lines.push(render_line(
        "server.port",
        &config.server.port.to_string(),
        source("server.port", Some("ATLAS_SERVER_PORT")),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", Some("ATLAS_LOGGING_LEVEL")),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", Some("ATLAS_LOGGING_FORMAT")),
    ));

    lines.join("\n")
}

fn push_provider_lines(
    lines: &mut Vec<String>,
    name: &str,
    settings: &ProviderSettings,
    source: &impl Fn(&str, Option<&str>) -> String,
) {
    let env_prefix = name.to_ascii_uppercase();

    let api_key = if settings.api_key.is_some() { "<redacted>" } else { "<unset>" };
    lines.push(render_line(
        &format!("providers.{name}.api_key"),
        api_key,
        source(&format!("providers.{name}.api_key"), Some(&format!("ATLAS_{env_prefix}_API_KEY"))),
    ));
    lines.push(render_line(
        &format!("providers.{name}.model"),
        &settings.model,
        source(&format!("providers.{name}.model"), Some(&format!("ATLAS_{env_prefix}_MODEL"))),
    ));
    lines.push(render_line(
        &format!("providers.{name}.base_url"),
        settings.base_url.as_deref().unwrap_or("<unset>"),
        source(
            &format!("providers.{name}.base_url"),
            Some(&format!("ATLAS_{env_prefix}_BASE_URL")),
        ),
    ));
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("atlas.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/atlas.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
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
