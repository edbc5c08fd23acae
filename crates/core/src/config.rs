//! Application configuration.
//!
//! Load order: defaults, then `atlas.toml` (with `${VAR}` environment
//! interpolation), then `ATLAS_*` environment overrides, then
//! programmatic overrides, then validation. Provider selection (primary
//! name, ordered fallbacks, per-provider key/model/base-url) lives here,
//! not in orchestration logic.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Duration;

use atlas_providers::{
    GeminiProvider, LlamaProvider, PoolConfig, ProviderPool, TextProvider,
};

use crate::orchestrator::OrchestratorConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub providers: ProvidersConfig,
    pub orchestrator: OrchestratorSection,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ProvidersConfig {
    pub primary: ProviderName,
    pub fallbacks: Vec<ProviderName>,
    pub llama: ProviderSettings,
    pub gemini: ProviderSettings,
    pub pool: PoolSettings,
}

#[derive(Clone, Debug)]
pub struct ProviderSettings {
    pub api_key: Option<SecretString>,
    pub model: String,
    pub base_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct PoolSettings {
    pub base_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    pub max_global_attempts: u32,
    pub request_timeout_secs: u64,
    pub business_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct OrchestratorSection {
    pub max_validation_failures: usize,
    pub visualization_node_limit: u64,
    pub max_suggestions: usize,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Llama,
    Gemini,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Llama => "llama",
            ProviderName::Gemini => "gemini",
        }
    }
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
    pub primary_provider: Option<ProviderName>,
    pub llama_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub log_level: Option<String>,
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
            providers: ProvidersConfig {
                primary: ProviderName::Llama,
                fallbacks: vec![ProviderName::Gemini],
                llama: ProviderSettings {
                    api_key: None,
                    model: "llama-3.3-70b-versatile".to_string(),
                    base_url: None,
                },
                gemini: ProviderSettings {
                    api_key: None,
                    model: "gemini-2.0-flash".to_string(),
                    base_url: None,
                },
                pool: PoolSettings {
                    base_backoff_ms: 1_000,
                    backoff_multiplier: 1.5,
                    max_backoff_ms: 60_000,
                    max_global_attempts: 6,
                    request_timeout_secs: 15,
                    business_timeout_secs: 30,
                },
            },
            orchestrator: OrchestratorSection {
                max_validation_failures: 2,
                visualization_node_limit: 100,
                max_suggestions: 3,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for ProviderName {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "llama" => Ok(Self::Llama),
            "gemini" => Ok(Self::Gemini),
            other => Err(ConfigError::Validation(format!(
                "unsupported provider `{other}` (expected llama|gemini)"
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("atlas.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// The provider order the pool should try: primary first, then the
    /// configured fallbacks, skipping duplicates.
    pub fn provider_order(&self) -> Vec<ProviderName> {
        let mut order = vec![self.providers.primary];
        for fallback in &self.providers.fallbacks {
            if !order.contains(fallback) {
                order.push(*fallback);
            }
        }
        order
    }

    pub fn provider_settings(&self, name: ProviderName) -> &ProviderSettings {
        match name {
            ProviderName::Llama => &self.providers.llama,
            ProviderName::Gemini => &self.providers.gemini,
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        let pool = &self.providers.pool;
        PoolConfig {
            base_backoff_ms: pool.base_backoff_ms,
            backoff_multiplier: pool.backoff_multiplier,
            max_backoff_ms: pool.max_backoff_ms,
            max_global_attempts: pool.max_global_attempts,
            request_timeout: Duration::from_secs(pool.request_timeout_secs),
            business_timeout: Duration::from_secs(pool.business_timeout_secs),
            ..PoolConfig::default()
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_validation_failures: self.orchestrator.max_validation_failures,
            visualization_node_limit: self.orchestrator.visualization_node_limit,
            max_suggestions: self.orchestrator.max_suggestions,
        }
    }

    /// Construct the provider pool in configured failover order.
    pub fn build_pool(&self) -> ProviderPool {
        let providers: Vec<Arc<dyn TextProvider>> = self
            .provider_order()
            .into_iter()
            .map(|name| {
                let settings = self.provider_settings(name);
                let api_key = settings.api_key.clone();
                match name {
                    ProviderName::Llama => match &settings.base_url {
                        Some(base) => Arc::new(LlamaProvider::with_base_url(
                            api_key,
                            settings.model.clone(),
                            base.clone(),
                        )) as Arc<dyn TextProvider>,
                        None => Arc::new(LlamaProvider::new(api_key, settings.model.clone())),
                    },
                    ProviderName::Gemini => match &settings.base_url {
                        Some(base) => Arc::new(GeminiProvider::with_base_url(
                            api_key,
                            settings.model.clone(),
                            base.clone(),
                        )) as Arc<dyn TextProvider>,
                        None => Arc::new(GeminiProvider::new(api_key, settings.model.clone())),
                    },
                }
            })
            .collect();
        ProviderPool::new(providers, self.pool_config())
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(providers) = patch.providers {
            if let Some(primary) = providers.primary {
                self.providers.primary = primary;
            }
            if let Some(fallbacks) = providers.fallbacks {
                self.providers.fallbacks = fallbacks;
            }
            if let Some(llama) = providers.llama {
                apply_provider_patch(&mut self.providers.llama, llama);
            }
            if let Some(gemini) = providers.gemini {
                apply_provider_patch(&mut self.providers.gemini, gemini);
            }
            if let Some(pool) = providers.pool {
                if let Some(base_backoff_ms) = pool.base_backoff_ms {
                    self.providers.pool.base_backoff_ms = base_backoff_ms;
                }
                if let Some(backoff_multiplier) = pool.backoff_multiplier {
                    self.providers.pool.backoff_multiplier = backoff_multiplier;
                }
                if let Some(max_backoff_ms) = pool.max_backoff_ms {
                    self.providers.pool.max_backoff_ms = max_backoff_ms;
                }
                if let Some(max_global_attempts) = pool.max_global_attempts {
                    self.providers.pool.max_global_attempts = max_global_attempts;
                }
                if let Some(request_timeout_secs) = pool.request_timeout_secs {
                    self.providers.pool.request_timeout_secs = request_timeout_secs;
                }
                if let Some(business_timeout_secs) = pool.business_timeout_secs {
                    self.providers.pool.business_timeout_secs = business_timeout_secs;
                }
            }
        }

        if let Some(orchestrator) = patch.orchestrator {
            if let Some(max_validation_failures) = orchestrator.max_validation_failures {
                self.orchestrator.max_validation_failures = max_validation_failures;
            }
            if let Some(visualization_node_limit) = orchestrator.visualization_node_limit {
                self.orchestrator.visualization_node_limit = visualization_node_limit;
            }
            if let Some(max_suggestions) = orchestrator.max_suggestions {
                self.orchestrator.max_suggestions = max_suggestions;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
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
        if let Some(value) = read_env("ATLAS_PRIMARY_PROVIDER") {
            self.providers.primary = value.parse()?;
        }

        if let Some(value) = read_env("ATLAS_LLAMA_API_KEY") {
            self.providers.llama.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("ATLAS_LLAMA_MODEL") {
            self.providers.llama.model = value;
        }
        if let Some(value) = read_env("ATLAS_LLAMA_BASE_URL") {
            self.providers.llama.base_url = Some(value);
        }

        if let Some(value) = read_env("ATLAS_GEMINI_API_KEY") {
            self.providers.gemini.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("ATLAS_GEMINI_MODEL") {
            self.providers.gemini.model = value;
        }
        if let Some(value) = read_env("ATLAS_GEMINI_BASE_URL") {
            self.providers.gemini.base_url = Some(value);
        }

        if let Some(value) = read_env("ATLAS_POOL_MAX_ATTEMPTS") {
            self.providers.pool.max_global_attempts = parse_u32("ATLAS_POOL_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("ATLAS_POOL_REQUEST_TIMEOUT_SECS") {
            self.providers.pool.request_timeout_secs =
                parse_u64("ATLAS_POOL_REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("ATLAS_POOL_BUSINESS_TIMEOUT_SECS") {
            self.providers.pool.business_timeout_secs =
                parse_u64("ATLAS_POOL_BUSINESS_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("ATLAS_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("ATLAS_SERVER_PORT") {
            self.server.port = parse_u16("ATLAS_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("ATLAS_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("ATLAS_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("ATLAS_LOGGING_LEVEL").or_else(|| read_env("ATLAS_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("ATLAS_LOGGING_FORMAT").or_else(|| read_env("ATLAS_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(primary) = overrides.primary_provider {
            self.providers.primary = primary;
        }
        if let Some(llama_api_key) = overrides.llama_api_key {
            self.providers.llama.api_key = Some(secret_value(llama_api_key));
        }
        if let Some(gemini_api_key) = overrides.gemini_api_key {
            self.providers.gemini.api_key = Some(secret_value(gemini_api_key));
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_providers(&self.providers)?;
        validate_orchestrator(&self.orchestrator)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn apply_provider_patch(settings: &mut ProviderSettings, patch: ProviderPatch) {
    if let Some(api_key) = patch.api_key {
        settings.api_key = Some(secret_value(api_key));
    }
    if let Some(model) = patch.model {
        settings.model = model;
    }
    if let Some(base_url) = patch.base_url {
        settings.base_url = Some(base_url);
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("atlas.toml"), PathBuf::from("config/atlas.toml")]
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

fn validate_providers(providers: &ProvidersConfig) -> Result<(), ConfigError> {
    for (section, settings) in
        [("providers.llama", &providers.llama), ("providers.gemini", &providers.gemini)]
    {
        if settings.model.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{section}.model must not be empty")));
        }
        if let Some(base_url) = &settings.base_url {
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                return Err(ConfigError::Validation(format!(
                    "{section}.base_url must start with http:// or https://"
                )));
            }
        }
    }

    let pool = &providers.pool;
    if pool.max_global_attempts == 0 {
        return Err(ConfigError::Validation(
            "providers.pool.max_global_attempts must be greater than zero".to_string(),
        ));
    }
    if pool.backoff_multiplier < 1.0 {
        return Err(ConfigError::Validation(
            "providers.pool.backoff_multiplier must be at least 1.0".to_string(),
        ));
    }
    if pool.base_backoff_ms == 0 || pool.base_backoff_ms > pool.max_backoff_ms {
        return Err(ConfigError::Validation(
            "providers.pool.base_backoff_ms must be in range 1..=max_backoff_ms".to_string(),
        ));
    }
    for (key, value) in [
        ("providers.pool.request_timeout_secs", pool.request_timeout_secs),
        ("providers.pool.business_timeout_secs", pool.business_timeout_secs),
    ] {
        if value == 0 || value > 300 {
            return Err(ConfigError::Validation(format!("{key} must be in range 1..=300")));
        }
    }

    Ok(())
}

fn validate_orchestrator(orchestrator: &OrchestratorSection) -> Result<(), ConfigError> {
    if orchestrator.visualization_node_limit == 0 {
        return Err(ConfigError::Validation(
            "orchestrator.visualization_node_limit must be greater than zero".to_string(),
        ));
    }
    if orchestrator.max_suggestions == 0 {
        return Err(ConfigError::Validation(
            "orchestrator.max_suggestions must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation(
            "server.port must be greater than zero".to_string(),
        ));
    }
    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
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

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    providers: Option<ProvidersPatch>,
    orchestrator: Option<OrchestratorPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ProvidersPatch {
    primary: Option<ProviderName>,
    fallbacks: Option<Vec<ProviderName>>,
    llama: Option<ProviderPatch>,
    gemini: Option<ProviderPatch>,
    pool: Option<PoolPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderPatch {
    api_key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PoolPatch {
    base_backoff_ms: Option<u64>,
    backoff_multiplier: Option<f64>,
    max_backoff_ms: Option<u64>,
    max_global_attempts: Option<u32>,
    request_timeout_secs: Option<u64>,
    business_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct OrchestratorPatch {
    max_validation_failures: Option<usize>,
    visualization_node_limit: Option<u64>,
    max_suggestions: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
