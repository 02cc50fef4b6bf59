//! Scenario parsing from YAML/JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::schema::validate_scenario_schema;
use crate::record::{BucketKey, KEY_SEPARATOR};

/// Errors that can occur when loading a scenario.
#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("Failed to read scenario file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Scenario does not match schema: {}", .0.join("; "))]
    SchemaError(Vec<String>),

    #[error("Scenario validation failed: {0}")]
    ValidationError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// An entry in the endpoint catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointSpec {
    /// Identifier a provider is expected to answer with (e.g. "analyze_job_fit")
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A benchmark scenario.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scenario {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// The natural-language request sent, unchanged, on every iteration
    pub utterance: String,

    /// Parameter names to extract, in report order
    #[serde(default)]
    pub expected_parameters: Vec<String>,

    /// N: iterations per (prompt_version, provider)
    pub iterations_per_config: u32,

    /// Prompt versions, in report order
    pub prompt_versions: Vec<String>,

    /// Provider ids, in report order
    pub providers: Vec<String>,

    /// Endpoint the utterance should route to, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_endpoint: Option<String>,

    /// Known endpoints; replies are resolved against this list when non-empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<EndpointSpec>,
}

impl Scenario {
    /// Parse a scenario from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ScenarioError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a scenario from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Build a scenario from an already-parsed document.
    ///
    /// Runs the schema check, then deserializes, then [`Scenario::validate`].
    pub fn from_value(value: serde_json::Value) -> Result<Self, ScenarioError> {
        validate_scenario_schema(&value).map_err(ScenarioError::SchemaError)?;
        let scenario: Scenario = serde_json::from_value(value)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Load a scenario file; `.json` is parsed as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    /// Semantic checks the schema cannot express.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.utterance.trim().is_empty() {
            return Err(ScenarioError::MissingField("utterance".to_string()));
        }

        if self.iterations_per_config == 0 {
            return Err(ScenarioError::ValidationError(
                "iterations_per_config must be greater than zero".to_string(),
            ));
        }

        if self.prompt_versions.is_empty() {
            return Err(ScenarioError::ValidationError(
                "prompt_versions must not be empty".to_string(),
            ));
        }

        if self.providers.is_empty() {
            return Err(ScenarioError::ValidationError(
                "providers must not be empty".to_string(),
            ));
        }

        validate_ids("prompt version", &self.prompt_versions)?;
        validate_ids("provider", &self.providers)?;
        validate_ids("expected parameter", &self.expected_parameters)?;

        let endpoint_ids: Vec<String> = self.endpoints.iter().map(|e| e.id.clone()).collect();
        validate_ids("endpoint", &endpoint_ids)?;

        if let Some(expected) = &self.expected_endpoint {
            if !self.endpoints.is_empty() && !endpoint_ids.iter().any(|id| id == expected) {
                return Err(ScenarioError::ValidationError(format!(
                    "expected_endpoint '{}' is not in the endpoint catalog",
                    expected
                )));
            }
        }

        Ok(())
    }

    /// Every (prompt_version, provider) pair, versions outer, providers inner.
    pub fn bucket_keys(&self) -> Vec<BucketKey> {
        self.prompt_versions
            .iter()
            .flat_map(|v| self.providers.iter().map(move |p| BucketKey::new(v, p)))
            .collect()
    }

    pub fn has_bucket(&self, key: &BucketKey) -> bool {
        self.prompt_versions.contains(&key.prompt_version) && self.providers.contains(&key.provider)
    }

    /// Total number of provider calls a full sweep makes.
    pub fn total_iterations(&self) -> u64 {
        self.prompt_versions.len() as u64
            * self.providers.len() as u64
            * u64::from(self.iterations_per_config)
    }

    /// Catalog ids, in declaration order.
    pub fn endpoint_ids(&self) -> Vec<&str> {
        self.endpoints.iter().map(|e| e.id.as_str()).collect()
    }

    /// Display name: `name` when set, otherwise the utterance.
    pub fn title(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.utterance)
    }
}

fn validate_ids(what: &str, ids: &[String]) -> Result<(), ScenarioError> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(ScenarioError::ValidationError(format!("empty {} id", what)));
        }
        if id.contains(KEY_SEPARATOR) {
            return Err(ScenarioError::ValidationError(format!(
                "{} id '{}' contains a reserved control character",
                what,
                id.escape_debug()
            )));
        }
        if !seen.insert(id.as_str()) {
            return Err(ScenarioError::ValidationError(format!(
                "Duplicate {} id: {}",
                what, id
            )));
        }
    }
    Ok(())
}
