//! Sweep file configuration.
//!
//! A sweep file wraps a scenario with everything needed to run it:
//!
//! ```yaml
//! scenario: job-fit.yaml        # path relative to this file, or inline map
//! prompts: prompts.yaml         # optional; built-in v1..v3 otherwise
//! providers:
//!   Cohere:   { type: cohere, model: command-r-plus }
//!   Claude:   { type: anthropic, model: claude-sonnet-4-5-20250514 }
//! runtime:
//!   concurrency: 4
//!   request_timeout: 30s
//!   retry: { max_attempts: 3, min_delay: 500ms, max_delay: 10s }
//!   max_total_tokens: 200000
//! ```

use routebench_core::{Capabilities, Scenario, ScenarioError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::resilience::CircuitBreakerConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read sweep file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse sweep YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid scenario: {0}")]
    Scenario(#[from] ScenarioError),

    #[error("Invalid sweep configuration: {0}")]
    Invalid(String),
}

/// Serde adapter for `Duration` as a humantime string ("500ms", "1m 30s").
pub mod human_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per call including the first
    pub max_attempts: usize,

    #[serde(with = "human_duration")]
    pub min_delay: Duration,

    #[serde(with = "human_duration")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Execution options shared by every provider in a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum provider calls in flight
    pub concurrency: usize,

    /// Upper bound for one logical call, retries included
    #[serde(with = "human_duration")]
    pub request_timeout: Duration,

    pub retry: RetryConfig,

    pub circuit_breaker: CircuitBreakerConfig,

    /// Stop issuing calls once this many tokens have been used
    pub max_total_tokens: Option<u64>,

    /// Default completion length, overridable per provider
    pub max_tokens: u32,

    /// Default sampling temperature, overridable per provider
    pub temperature: f32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            max_total_tokens: None,
            max_tokens: 500,
            temperature: 0.0,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("runtime.concurrency must be at least 1".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid("runtime.request_timeout must be positive".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("runtime.retry.max_attempts must be at least 1".to_string()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid(format!(
                "runtime.temperature {} is outside 0.0..=2.0",
                self.temperature
            )));
        }
        Ok(())
    }
}

/// One provider entry under `providers:`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Factory type: "anthropic", "cohere", "deepseek", "scripted"
    #[serde(rename = "type")]
    pub provider_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Overrides the provider's own capability declaration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,

    /// Everything else is passed to the factory untouched
    #[serde(flatten)]
    pub settings: Map<String, JsonValue>,
}

impl ProviderSpec {
    pub fn new(provider_type: impl Into<String>) -> Self {
        Self {
            provider_type: provider_type.into(),
            model: None,
            max_tokens: None,
            temperature: None,
            capabilities: None,
            settings: Map::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    /// JSON handed to the provider factory.
    pub fn factory_config(&self) -> JsonValue {
        let mut config = self.settings.clone();
        if let Some(model) = &self.model {
            config.insert("model".to_string(), JsonValue::String(model.clone()));
        }
        JsonValue::Object(config)
    }
}

#[derive(Debug, Deserialize)]
struct RawSweepFile {
    scenario: serde_yaml::Value,
    providers: BTreeMap<String, ProviderSpec>,
    #[serde(default)]
    runtime: RuntimeConfig,
    #[serde(default)]
    prompts: Option<PathBuf>,
}

/// A parsed and cross-checked sweep file.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepFile {
    pub scenario: Scenario,
    pub providers: BTreeMap<String, ProviderSpec>,
    pub runtime: RuntimeConfig,
    /// Prompt store path, already resolved against the sweep file's directory
    pub prompts: Option<PathBuf>,
}

impl SweepFile {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&contents, base)
    }

    /// Parse from YAML; relative paths resolve against the current directory.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Self::parse(yaml, Path::new("."))
    }

    fn parse(yaml: &str, base: &Path) -> Result<Self, ConfigError> {
        let raw: RawSweepFile = serde_yaml::from_str(yaml)?;

        let scenario = match raw.scenario {
            serde_yaml::Value::String(rel) => Scenario::from_file(base.join(rel))?,
            inline @ serde_yaml::Value::Mapping(_) => {
                let value = serde_json::to_value(inline).map_err(ScenarioError::from)?;
                Scenario::from_value(value)?
            }
            _ => {
                return Err(ConfigError::Invalid(
                    "scenario must be a file path or an inline mapping".to_string(),
                ))
            }
        };

        let sweep = Self {
            scenario,
            providers: raw.providers,
            runtime: raw.runtime,
            prompts: raw.prompts.map(|p| base.join(p)),
        };
        sweep.validate()?;
        Ok(sweep)
    }

    /// Every scenario provider needs a spec and every spec a scenario slot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.runtime.validate()?;

        for id in &self.scenario.providers {
            if !self.providers.contains_key(id) {
                return Err(ConfigError::Invalid(format!(
                    "provider '{}' is listed in the scenario but has no entry under providers:",
                    id
                )));
            }
        }
        for id in self.providers.keys() {
            if !self.scenario.providers.contains(id) {
                return Err(ConfigError::Invalid(format!(
                    "providers: entry '{}' is not listed in the scenario",
                    id
                )));
            }
        }
        for (id, spec) in &self.providers {
            if let Some(t) = spec.temperature {
                if !(0.0..=2.0).contains(&t) {
                    return Err(ConfigError::Invalid(format!(
                        "provider '{}': temperature {} is outside 0.0..=2.0",
                        id, t
                    )));
                }
            }
        }
        Ok(())
    }

    /// Replace N, e.g. from a command-line override.
    pub fn with_iterations(mut self, iterations: u32) -> Result<Self, ConfigError> {
        self.scenario.iterations_per_config = iterations;
        self.scenario.validate()?;
        Ok(self)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Result<Self, ConfigError> {
        self.runtime.concurrency = concurrency;
        self.runtime.validate()?;
        Ok(self)
    }
}
