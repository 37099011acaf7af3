//! Configuration parsing and validation for concord.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::model::{ConsensusStrategy, Model, RoutingRequest};
use crate::router::{ModelSelector, DEFAULT_SCORE_EPSILON};

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8080")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

/// Defaults applied to requests that leave strategy, quorum or timeout unset.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub default_strategy: ConsensusStrategy,
    #[serde(default = "default_min_responses")]
    pub min_responses: usize,
    #[serde(default = "default_max_responses")]
    pub max_responses: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// ε in the selector's composite score
    #[serde(default = "default_score_epsilon")]
    pub score_epsilon: f64,
}

fn default_min_responses() -> usize {
    crate::model::DEFAULT_MIN_RESPONSES
}

fn default_max_responses() -> usize {
    crate::model::DEFAULT_MAX_RESPONSES
}

fn default_timeout_secs() -> u64 {
    crate::model::DEFAULT_TIMEOUT.as_secs()
}

fn default_score_epsilon() -> f64 {
    DEFAULT_SCORE_EPSILON
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_strategy: ConsensusStrategy::default(),
            min_responses: default_min_responses(),
            max_responses: default_max_responses(),
            timeout_secs: default_timeout_secs(),
            score_epsilon: default_score_epsilon(),
        }
    }
}

impl RoutingConfig {
    /// A request for `prompt` carrying the configured defaults.
    pub fn request(&self, prompt: impl Into<String>) -> RoutingRequest {
        RoutingRequest::new(prompt)
            .with_strategy(self.default_strategy)
            .with_quorum(self.min_responses, self.max_responses)
            .with_timeout(Duration::from_secs(self.timeout_secs))
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value. Every call site is auditable via `grep expose_secret`.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// How a provider's API key was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Key was a literal string in config (no ${} references)
    Literal,
    /// Key contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Key was auto-discovered from convention env var (holds var name)
    Convention(String),
    /// No key available
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(var) => write!(f, "convention ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// Provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Unique name, used as the provider half of model keys
    pub name: String,
    /// Base URL of an OpenAI-compatible API (e.g., "https://api.openai.com/v1")
    pub url: String,
    /// Optional bearer token
    pub api_key: Option<ApiKey>,
    /// Currency per 1000 prompt tokens
    #[serde(default)]
    pub input_rate: f64,
    /// Currency per 1000 completion tokens
    #[serde(default)]
    pub output_rate: f64,
    /// Per-call ceiling, tighter than the request timeout when set
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

/// A model to register at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model_id: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub cost_per_unit: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl ModelConfig {
    /// A fresh registry entry for this model.
    pub fn to_model(&self) -> Model {
        Model::new(&self.provider, &self.model_id)
            .with_weight(self.weight)
            .with_cost_per_unit(self.cost_per_unit)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Parse configuration from a TOML string.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.models.is_empty() {
            tracing::warn!("No models configured - every request will fail selection");
        }

        let routing = &self.routing;
        if routing.min_responses == 0 {
            return Err(ConfigError::Validation(
                "routing.min_responses must be at least 1".to_string(),
            ));
        }
        if routing.max_responses < routing.min_responses {
            return Err(ConfigError::Validation(format!(
                "routing.max_responses ({}) must be >= routing.min_responses ({})",
                routing.max_responses, routing.min_responses
            )));
        }
        if routing.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "routing.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if routing.score_epsilon.is_nan() || routing.score_epsilon <= 0.0 {
            return Err(ConfigError::Validation(
                "routing.score_epsilon must be positive".to_string(),
            ));
        }

        let mut provider_names = HashSet::new();
        for provider in &self.providers {
            if provider.url.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Provider '{}' has empty URL",
                    provider.name
                )));
            }
            if !provider_names.insert(provider.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Provider '{}' is declared more than once",
                    provider.name
                )));
            }
        }

        for model in &self.models {
            if !provider_names.contains(model.provider.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Model '{}/{}' references undeclared provider '{}'",
                    model.provider, model.model_id, model.provider
                )));
            }
            if model.weight < 0.0 || model.cost_per_unit < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "Model '{}/{}' has a negative weight or cost",
                    model.provider, model.model_id
                )));
            }
        }

        Ok(())
    }

    /// A registry seeded with every configured model, in file order.
    pub fn build_selector(&self) -> ModelSelector {
        let selector = ModelSelector::with_epsilon(self.routing.score_epsilon);
        for model in &self.models {
            selector.register(model.to_model());
        }
        selector
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for provider '{provider}': {message}")]
    EnvVar {
        var: String,
        provider: String,
        message: String,
    },
}

/// Raw provider config deserialized directly from TOML.
/// api_key is `Option<String>` so it may contain `${VAR}` references not yet expanded.
#[derive(Deserialize)]
pub struct RawProviderConfig {
    name: String,
    url: String,
    api_key: Option<String>,
    #[serde(default)]
    input_rate: f64,
    #[serde(default)]
    output_rate: f64,
    #[serde(default)]
    request_timeout_secs: Option<u64>,
}

/// Raw configuration deserialized directly from TOML.
/// Provider api_key values may contain `${VAR}` references not yet expanded.
#[derive(Deserialize)]
pub struct RawConfig {
    server: ServerConfig,
    #[serde(default)]
    routing: RoutingConfig,
    #[serde(default)]
    providers: Vec<RawProviderConfig>,
    #[serde(default)]
    models: Vec<ModelConfig>,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string (e.g., `${SCHEME}://${HOST}/v1`).
/// Fails on first missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(
    input: &str,
    provider_name: &str,
    lookup: F,
) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            provider: provider_name.to_string(),
            message: format!("Unclosed '${{' in config value: {}", input),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                provider: provider_name.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            provider: provider_name.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced in provider '{}')",
                var_name, provider_name
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Expand all `${VAR}` references in a string using real environment variables.
fn expand_env_vars(input: &str, provider_name: &str) -> Result<String, ConfigError> {
    expand_env_vars_with(input, provider_name, |name| std::env::var(name).ok())
}

/// Derive the convention-based env var name for a provider.
///
/// - "openai" -> "CONCORD_OPENAI_API_KEY"
/// - "local-vllm" -> "CONCORD_LOCAL_VLLM_API_KEY"
pub fn convention_env_var_name(provider_name: &str) -> String {
    let upper_snake = provider_name.to_uppercase().replace(['-', ' '], "_");
    format!("CONCORD_{}_API_KEY", upper_snake)
}

fn convention_key_lookup(provider_name: &str) -> Option<(String, String)> {
    let var_name = convention_env_var_name(provider_name);
    std::env::var(&var_name).ok().map(|value| (var_name, value))
}

impl Config {
    /// Convert raw (deserialized) config to final config with env var expansion.
    ///
    /// For each provider:
    /// - If `api_key` contains `${VAR}`: expand from environment, source = `EnvExpanded`
    /// - If `api_key` is a literal string: wrap directly, source = `Literal`
    /// - If `api_key` is absent: try `CONCORD_<NAME>_API_KEY`,
    ///   source = `Convention(var_name)` or `KeySource::None`
    pub fn from_raw(raw: RawConfig) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let mut providers = Vec::with_capacity(raw.providers.len());
        let mut key_sources = Vec::with_capacity(raw.providers.len());

        for rp in raw.providers {
            let (api_key, source) = match rp.api_key {
                Some(ref raw_key) if raw_key.contains("${") => {
                    let expanded = expand_env_vars(raw_key, &rp.name)?;
                    (Some(ApiKey::from(expanded)), KeySource::EnvExpanded)
                }
                Some(ref raw_key) => (Some(ApiKey::from(raw_key.as_str())), KeySource::Literal),
                None => match convention_key_lookup(&rp.name) {
                    Some((var_name, value)) => {
                        (Some(ApiKey::from(value)), KeySource::Convention(var_name))
                    }
                    None => (None, KeySource::None),
                },
            };

            key_sources.push((rp.name.clone(), source));

            providers.push(ProviderConfig {
                name: rp.name,
                url: rp.url,
                api_key,
                input_rate: rp.input_rate,
                output_rate: rp.output_rate,
                request_timeout_secs: rp.request_timeout_secs,
            });
        }

        let config = Config {
            server: raw.server,
            routing: raw.routing,
            providers,
            models: raw.models,
            logging: raw.logging,
        };

        Ok((config, key_sources))
    }

    /// Load configuration from a TOML file with environment variable expansion.
    ///
    /// Returns the config and per-provider key source information.
    pub fn from_file_with_env(
        path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        let raw: RawConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;
        let (config, key_sources) = Self::from_raw(raw)?;
        config.validate()?;

        Ok((config, key_sources))
    }
}
