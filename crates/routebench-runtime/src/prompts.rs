//! Versioned prompt templates.
//!
//! A prompt version is a template with `{utterance}`, `{endpoints}` and
//! `{parameters}` placeholders, plus an optional system prompt. The store
//! ships `v1`..`v3`; a YAML file can add versions or replace them:
//!
//! ```yaml
//! versions:
//!   v4:
//!     system: You are a request router.
//!     template: |
//!       Route this request: {utterance}
//!       Endpoints:
//!       {endpoints}
//! ```
//!
//! Version ids match case-insensitively, so a scenario may say `V1`.

use lazy_static::lazy_static;
use regex::Regex;
use routebench_core::Scenario;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::providers::ChatMessage;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{([a-z_]+)\}").unwrap();
}

const PLACEHOLDERS: [&str; 3] = ["utterance", "endpoints", "parameters"];

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Prompt version '{0}' is not defined")]
    UnknownVersion(String),

    #[error("Prompt version '{version}' uses unknown placeholder {{{placeholder}}}")]
    UnknownPlaceholder { version: String, placeholder: String },

    #[error("Failed to read prompt file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse prompt YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Base system prompt shared by the built-in versions.
pub const ROUTER_SYSTEM_PROMPT: &str = "You are an API request router. \
Given a user request you pick the single endpoint that should handle it and \
extract the parameters it needs. Reply with JSON only.";

/// v1: terse instruction, JSON shape given inline.
pub const PROMPT_V1: &str = r#"Request: {utterance}

Available endpoints:
{endpoints}

Parameters to extract:
{parameters}

Answer with {"endpoint": "<id or none>", "parameters": {"<name>": "<value or null>"}}."#;

/// v2: explicit rules about verbatim values and missing parameters.
pub const PROMPT_V2: &str = r#"Match the request below to exactly one endpoint and extract its parameters.

Rules:
1. Use an endpoint id from the list, or "none" when nothing fits.
2. Copy parameter values exactly as written in the request. Do not shorten URLs or change case.
3. Use null for any parameter the request does not mention.
4. Output a single JSON object and nothing else.

Endpoints:
{endpoints}

Parameters:
{parameters}

Request:
{utterance}

Output format:
{"endpoint": "...", "parameters": {...}}"#;

/// v3: worked example before the real request.
pub const PROMPT_V3: &str = r#"You map user requests to API calls.

Example
Request: "send an email to bob@example.com about the launch"
Answer: {"endpoint": "send_email", "parameters": {"recipient": "bob@example.com", "subject": "the launch"}}

Endpoints you may choose from:
{endpoints}

Parameters to fill (null when absent):
{parameters}

Request: "{utterance}"
Answer:"#;

/// One prompt version.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PromptTemplate {
    #[serde(default)]
    pub system: Option<String>,
    pub template: String,
}

impl PromptTemplate {
    pub fn new(system: Option<&str>, template: impl Into<String>) -> Self {
        Self {
            system: system.map(str::to_string),
            template: template.into(),
        }
    }

    fn check_placeholders(&self, version: &str) -> Result<(), PromptError> {
        let texts = self.system.iter().chain(std::iter::once(&self.template));
        for text in texts {
            for cap in PLACEHOLDER.captures_iter(text) {
                let name = &cap[1];
                if !PLACEHOLDERS.contains(&name) {
                    return Err(PromptError::UnknownPlaceholder {
                        version: version.to_string(),
                        placeholder: name.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PromptFile {
    versions: BTreeMap<String, PromptTemplate>,
}

/// Values substituted into a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    pub utterance: String,
    pub endpoints: String,
    pub parameters: String,
}

impl PromptContext {
    pub fn from_scenario(scenario: &Scenario) -> Self {
        let endpoints = if scenario.endpoints.is_empty() {
            "(no catalog; answer with the endpoint id you would route to)".to_string()
        } else {
            scenario
                .endpoints
                .iter()
                .map(|e| match &e.description {
                    Some(d) => format!("- {} ({})", e.id, d),
                    None => format!("- {}", e.id),
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let parameters = if scenario.expected_parameters.is_empty() {
            "(none)".to_string()
        } else {
            scenario
                .expected_parameters
                .iter()
                .map(|p| format!("- {}", p))
                .collect::<Vec<_>>()
                .join("\n")
        };

        Self {
            utterance: scenario.utterance.clone(),
            endpoints,
            parameters,
        }
    }

    fn fill(&self, text: &str) -> String {
        PLACEHOLDER
            .replace_all(text, |cap: &regex::Captures<'_>| match &cap[1] {
                "utterance" => self.utterance.clone(),
                "endpoints" => self.endpoints.clone(),
                "parameters" => self.parameters.clone(),
                _ => cap[0].to_string(),
            })
            .into_owned()
    }
}

/// Prompt versions keyed by lowercase id.
#[derive(Debug, Clone)]
pub struct PromptStore {
    versions: BTreeMap<String, (String, PromptTemplate)>,
}

impl Default for PromptStore {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptStore {
    pub fn empty() -> Self {
        Self {
            versions: BTreeMap::new(),
        }
    }

    /// The built-in `v1`..`v3`.
    pub fn builtin() -> Self {
        let mut store = Self::empty();
        for (id, template) in [("v1", PROMPT_V1), ("v2", PROMPT_V2), ("v3", PROMPT_V3)] {
            store.versions.insert(
                id.to_string(),
                (
                    id.to_string(),
                    PromptTemplate::new(Some(ROUTER_SYSTEM_PROMPT), template),
                ),
            );
        }
        store
    }

    /// Add or replace a version after checking its placeholders.
    pub fn insert(&mut self, id: impl Into<String>, template: PromptTemplate) -> Result<(), PromptError> {
        let id = id.into();
        template.check_placeholders(&id)?;
        self.versions.insert(id.to_lowercase(), (id, template));
        Ok(())
    }

    /// Built-ins overlaid with the versions in `yaml`.
    pub fn from_yaml(yaml: &str) -> Result<Self, PromptError> {
        let file: PromptFile = serde_yaml::from_str(yaml)?;
        let mut store = Self::builtin();
        for (id, template) in file.versions {
            store.insert(id, template)?;
        }
        Ok(store)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, PromptError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn get(&self, version: &str) -> Option<&PromptTemplate> {
        self.versions.get(&version.to_lowercase()).map(|(_, t)| t)
    }

    /// Version ids as declared.
    pub fn versions(&self) -> Vec<&str> {
        self.versions.values().map(|(id, _)| id.as_str()).collect()
    }

    /// Fail on the first version the store cannot render.
    pub fn ensure_versions<'a>(&self, versions: impl IntoIterator<Item = &'a String>) -> Result<(), PromptError> {
        for v in versions {
            if self.get(v).is_none() {
                return Err(PromptError::UnknownVersion(v.clone()));
            }
        }
        Ok(())
    }

    /// Render a version into chat messages.
    pub fn render(&self, version: &str, context: &PromptContext) -> Result<Vec<ChatMessage>, PromptError> {
        let template = self
            .get(version)
            .ok_or_else(|| PromptError::UnknownVersion(version.to_string()))?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &template.system {
            messages.push(ChatMessage::system(context.fill(system)));
        }
        messages.push(ChatMessage::user(context.fill(&template.template)));
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> Scenario {
        Scenario::from_yaml(
            r#"
utterance: "Analyze job fit for Jane at https://x.io/j?id=1"
expected_parameters: [job_url, person_name]
iterations_per_config: 1
prompt_versions: [V1, v2]
providers: [Cohere]
endpoints:
  - id: analyze_job_fit
    description: Compare a candidate with a job post
  - id: send_email
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_builtin_versions_are_valid() {
        let store = PromptStore::builtin();
        assert_eq!(store.versions(), vec!["v1", "v2", "v3"]);
        for id in store.versions() {
            store.get(id).unwrap().check_placeholders(id).unwrap();
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let store = PromptStore::builtin();
        assert!(store.get("V1").is_some());
        assert!(store.ensure_versions(&scenario().prompt_versions).is_ok());
    }

    #[test]
    fn test_missing_version_is_an_error() {
        let store = PromptStore::builtin();
        let versions = vec!["v9".to_string()];
        assert!(matches!(
            store.ensure_versions(&versions),
            Err(PromptError::UnknownVersion(v)) if v == "v9"
        ));
    }

    #[test]
    fn test_render_substitutes_everything() {
        let store = PromptStore::builtin();
        let context = PromptContext::from_scenario(&scenario());
        let messages = store.render("V1", &context).unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        let user = &messages[1].content;
        assert!(user.contains("https://x.io/j?id=1"));
        assert!(user.contains("- analyze_job_fit (Compare a candidate with a job post)"));
        assert!(user.contains("- send_email"));
        assert!(user.contains("- person_name"));
        assert!(!user.contains("{utterance}"));
        // literal JSON braces survive
        assert!(user.contains(r#"{"endpoint""#));
    }

    #[test]
    fn test_yaml_overlay() {
        let store = PromptStore::from_yaml(
            r#"
versions:
  V4:
    template: "Route: {utterance}"
  v1:
    system: "custom"
    template: "{parameters}"
"#,
        )
        .unwrap();

        assert_eq!(store.versions(), vec!["v1", "v2", "v3", "V4"]);
        let messages = store.render("v4", &PromptContext::from_scenario(&scenario())).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.starts_with("Route: Analyze job fit"));
        assert_eq!(store.get("v1").unwrap().system.as_deref(), Some("custom"));
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let err = PromptStore::from_yaml("versions:\n  v5:\n    template: \"{sentence}\"\n").unwrap_err();
        assert!(matches!(err, PromptError::UnknownPlaceholder { .. }));
        assert!(err.to_string().contains("{sentence}"));
    }
}
