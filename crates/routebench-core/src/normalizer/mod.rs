//! Extraction normalizer.
//!
//! Maps a raw provider reply into the canonical record shape: one endpoint
//! label (or none) plus a value for every expected parameter. Provider
//! differences are expressed through [`Capabilities`], never through
//! provider-specific code paths.
//!
//! Normalization never fails. A reply with nothing recognizable becomes a
//! record carrying [`ErrorKind::MalformedReply`].

mod parse;

pub use parse::{parse_reply, ParsedReply};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::record::{ErrorKind, RecordKey, ResponseRecord};
use crate::scenario::Scenario;

/// Keys that may carry the selected endpoint, in lookup order.
const ENDPOINT_KEYS: &[&str] = &["endpoint", "endpoint_id", "matched_endpoint", "intent", "route"];

/// Containers that may hold the parameter map, in lookup order.
const PARAMETER_CONTAINERS: &[&str] = &["parameters", "params"];

/// Labels meaning "no endpoint matched". Compared case-insensitively.
const NO_MATCH_SENTINELS: &[&str] = &["none", "no_match", "fallback", "null", ""];

static JSON_NULL: Value = Value::Null;

/// What one provider's reply is expected to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default = "default_true")]
    pub can_classify_endpoint: bool,

    #[serde(default = "default_true")]
    pub can_extract_parameters: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            can_classify_endpoint: true,
            can_extract_parameters: true,
        }
    }
}

/// A reply as it came back from a provider, with call measurements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawReply {
    pub content: String,
    pub latency_ms: Option<u64>,
    pub tokens_in: Option<u64>,
    pub tokens_out: Option<u64>,
}

impl RawReply {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn with_tokens(mut self, tokens_in: u64, tokens_out: u64) -> Self {
        self.tokens_in = Some(tokens_in);
        self.tokens_out = Some(tokens_out);
        self
    }
}

/// Turns raw replies into [`ResponseRecord`]s.
#[derive(Debug, Clone, Default)]
pub struct ExtractionNormalizer {
    expected_parameters: Vec<String>,
    catalog: Vec<String>,
}

impl ExtractionNormalizer {
    pub fn new(expected_parameters: Vec<String>) -> Self {
        Self {
            expected_parameters,
            catalog: Vec::new(),
        }
    }

    /// Normalizer for a scenario: its expected parameters and endpoint catalog.
    pub fn for_scenario(scenario: &Scenario) -> Self {
        Self::new(scenario.expected_parameters.clone()).with_catalog(
            scenario
                .endpoints
                .iter()
                .map(|e| e.id.clone())
                .collect(),
        )
    }

    /// Resolve endpoint labels against known ids.
    pub fn with_catalog(mut self, catalog: Vec<String>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn expected_parameters(&self) -> &[String] {
        &self.expected_parameters
    }

    /// Normalize one reply. Timing and token counts are always carried over.
    pub fn normalize(&self, key: RecordKey, reply: &RawReply, capabilities: Capabilities) -> ResponseRecord {
        let mut record = self.blank_record(key, reply);

        let parsed = match parse_reply(&reply.content) {
            Some(parsed) => parsed,
            None => {
                tracing::debug!(
                    record = %record.key(),
                    content_len = reply.content.len(),
                    "Reply has no recognizable endpoint or parameters"
                );
                return record.with_error(
                    ErrorKind::MalformedReply,
                    format!("unrecognizable reply: {}", preview(&reply.content)),
                );
            }
        };

        match parsed {
            ParsedReply::Label(label) => {
                if !self.is_endpoint_label(&label) {
                    tracing::debug!(record = %record.key(), label = %label, "Reply is a word, not an endpoint label");
                    return record.with_error(
                        ErrorKind::MalformedReply,
                        format!("not an endpoint label: {}", preview(&label)),
                    );
                }
                if capabilities.can_classify_endpoint {
                    record.matched_endpoint = self.resolve_endpoint(&label);
                }
            }
            ParsedReply::Object(map) => {
                if !self.carries_routing(&map) {
                    tracing::debug!(
                        record = %record.key(),
                        keys = ?map.keys().collect::<Vec<_>>(),
                        "JSON reply has neither an endpoint nor an expected parameter"
                    );
                    return record.with_error(
                        ErrorKind::MalformedReply,
                        format!("no endpoint or parameters in object: {}", preview(&reply.content)),
                    );
                }
                if capabilities.can_classify_endpoint {
                    record.matched_endpoint = endpoint_label(&map)
                        .and_then(|label| self.resolve_endpoint(&label));
                }
                if capabilities.can_extract_parameters {
                    for name in &self.expected_parameters {
                        let value = lookup_parameter(&map, name).and_then(literal);
                        record.extracted_parameters.insert(name.clone(), value);
                    }
                }
            }
        }

        record
    }

    /// Map a raw label to a canonical endpoint, or `None` for no match.
    pub fn resolve_endpoint(&self, label: &str) -> Option<String> {
        let label = label.trim();
        if is_no_match(label) {
            return None;
        }

        if self.catalog.is_empty() {
            return Some(label.to_string());
        }

        if let Some(id) = self.catalog_match(label) {
            return Some(id.clone());
        }

        tracing::warn!(label = %label, "Endpoint label not in catalog; keeping it verbatim");
        Some(label.to_string())
    }

    fn catalog_match(&self, label: &str) -> Option<&String> {
        if let Some(id) = self.catalog.iter().find(|id| id.as_str() == label) {
            return Some(id);
        }
        let lowered = label.to_lowercase();
        self.catalog.iter().find(|id| {
            let id_lower = id.to_lowercase();
            id_lower.contains(&lowered) || lowered.contains(&id_lower)
        })
    }

    /// A bare reply counts as a label when it is a no-match sentinel, resolves
    /// against the catalog, or (without a catalog) reads like an identifier:
    /// it has a letter and is either lowercase or contains one of `_ . : / -`.
    /// `Hello` and `42` are not labels.
    fn is_endpoint_label(&self, label: &str) -> bool {
        let label = label.trim();
        if is_no_match(label) {
            return true;
        }
        if !self.catalog.is_empty() {
            return self.catalog_match(label).is_some();
        }
        label.chars().any(|c| c.is_ascii_alphabetic())
            && (label.contains(['_', '.', ':', '/', '-'])
                || label.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()))
    }

    /// An object must name an endpoint (even as null) or one of the
    /// expected parameters. `{}` and error envelopes do neither.
    fn carries_routing(&self, map: &Map<String, Value>) -> bool {
        ENDPOINT_KEYS.iter().any(|k| map.contains_key(*k))
            || self
                .expected_parameters
                .iter()
                .any(|name| lookup_parameter(map, name).is_some())
    }

    /// Record with every expected parameter present and unextracted.
    fn blank_record(&self, key: RecordKey, reply: &RawReply) -> ResponseRecord {
        let mut record = ResponseRecord::new(key);
        record.latency_ms = reply.latency_ms;
        record.tokens_in = reply.tokens_in;
        record.tokens_out = reply.tokens_out;
        for name in &self.expected_parameters {
            record.extracted_parameters.insert(name.clone(), None);
        }
        record
    }
}

fn is_no_match(label: &str) -> bool {
    NO_MATCH_SENTINELS
        .iter()
        .any(|s| s.eq_ignore_ascii_case(label))
}

fn endpoint_label(map: &Map<String, Value>) -> Option<String> {
    let value = ENDPOINT_KEYS.iter().find_map(|k| map.get(*k))?;
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(inner) => match inner.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        },
        other => Some(other.to_string()),
    }
}

fn lookup_parameter<'a>(map: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    for container in PARAMETER_CONTAINERS {
        if let Some(Value::Object(params)) = map.get(*container) {
            if let Some(v) = params.get(name) {
                return Some(v);
            }
        }
    }

    for container in PARAMETER_CONTAINERS {
        if let Some(Value::Array(items)) = map.get(*container) {
            let entry = items.iter().find_map(|item| match item {
                Value::Object(obj) if obj.get("name").and_then(Value::as_str) == Some(name) => {
                    Some(obj.get("value").unwrap_or(&JSON_NULL))
                }
                _ => None,
            });
            if entry.is_some() {
                return entry;
            }
        }
    }

    map.get(name)
}

/// Literal text of an extracted value; JSON null means not extracted.
fn literal(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

fn preview(content: &str) -> String {
    const MAX: usize = 80;
    let trimmed = content.trim();
    if trimmed.chars().count() <= MAX {
        format!("{:?}", trimmed)
    } else {
        let head: String = trimmed.chars().take(MAX).collect();
        format!("{:?}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> RecordKey {
        RecordKey::new("V1", "Cohere", 0)
    }

    fn normalizer() -> ExtractionNormalizer {
        ExtractionNormalizer::new(vec!["job_url".to_string(), "person_name".to_string()])
    }

    #[test]
    fn test_object_with_parameters_map() {
        let reply = RawReply::new(
            r#"{"endpoint": "analyze_job_fit", "parameters": {"job_url": " https://x.com/j?id=1&ref=a%20b ", "person_name": "John Smith"}}"#,
        )
        .with_latency(412)
        .with_tokens(220, 31);

        let record = normalizer().normalize(key(), &reply, Capabilities::default());

        assert!(!record.is_error());
        assert_eq!(record.matched_endpoint.as_deref(), Some("analyze_job_fit"));
        assert_eq!(record.parameter("job_url"), Some("https://x.com/j?id=1&ref=a%20b"));
        assert_eq!(record.parameter("person_name"), Some("John Smith"));
        assert_eq!(record.latency_ms, Some(412));
        assert_eq!(record.tokens_out, Some(31));
    }

    #[test]
    fn test_parameter_array_and_top_level_keys() {
        let reply = RawReply::new(
            r#"{"intent": {"id": "analyze_job_fit"}, "parameters": [{"name": "job_url", "value": "u"}], "person_name": "Jane"}"#,
        );
        let record = normalizer().normalize(key(), &reply, Capabilities::default());

        assert_eq!(record.matched_endpoint.as_deref(), Some("analyze_job_fit"));
        assert_eq!(record.parameter("job_url"), Some("u"));
        assert_eq!(record.parameter("person_name"), Some("Jane"));
    }

    #[test]
    fn test_null_and_missing_are_not_extracted_but_empty_is() {
        let reply = RawReply::new(r#"{"endpoint": "e", "params": {"job_url": null, "person_name": ""}}"#);
        let record = normalizer().normalize(key(), &reply, Capabilities::default());

        assert_eq!(record.extracted_parameters.get("job_url"), Some(&None));
        assert_eq!(record.extracted_parameters.get("person_name"), Some(&Some(String::new())));
    }

    #[test]
    fn test_numbers_keep_literal_text() {
        let n = ExtractionNormalizer::new(vec!["count".to_string(), "flag".to_string()]);
        let reply = RawReply::new(r#"{"endpoint": "e", "count": 3.50, "flag": true}"#);
        let record = n.normalize(key(), &reply, Capabilities::default());

        assert_eq!(record.parameter("count"), Some("3.5"));
        assert_eq!(record.parameter("flag"), Some("true"));
    }

    #[test]
    fn test_sentinels_map_to_none() {
        let n = normalizer();
        for content in ["NO_MATCH", "none", "Fallback", "null", r#"{"endpoint": null}"#, r#"{"endpoint": ""}"#] {
            let record = n.normalize(key(), &RawReply::new(content), Capabilities::default());
            assert_eq!(record.matched_endpoint, None, "content: {}", content);
            assert!(!record.is_error(), "content: {}", content);
        }
    }

    #[test]
    fn test_label_reply_has_no_parameters() {
        let record = normalizer().normalize(key(), &RawReply::new("analyze_job_fit"), Capabilities::default());
        assert_eq!(record.matched_endpoint.as_deref(), Some("analyze_job_fit"));
        assert_eq!(record.extracted_parameters.len(), 2);
        assert!(record.extracted_parameters.values().all(Option::is_none));
    }

    #[test]
    fn test_malformed_reply_preserves_measurements() {
        let reply = RawReply::new("Sorry, I can't help with that.")
            .with_latency(900)
            .with_tokens(100, 8);
        let record = normalizer().normalize(key(), &reply, Capabilities::default());

        let error = record.error.as_ref().unwrap();
        assert_eq!(error.kind, ErrorKind::MalformedReply);
        assert_eq!(record.matched_endpoint, None);
        assert_eq!(record.extracted_parameters.len(), 2);
        assert!(record.extracted_parameters.values().all(Option::is_none));
        assert_eq!(record.latency_ms, Some(900));
        assert_eq!(record.tokens_in, Some(100));
    }

    #[test]
    fn test_object_without_endpoint_or_parameters_is_malformed() {
        let n = normalizer();
        for content in [
            "{}",
            r#"{"error": {"message": "overloaded"}}"#,
            r#"{"answer": "I cannot help"}"#,
            "Here: ```json\n{}\n```",
        ] {
            let reply = RawReply::new(content).with_latency(70);
            let record = n.normalize(key(), &reply, Capabilities::default());
            assert_eq!(
                record.error.as_ref().map(|e| e.kind),
                Some(ErrorKind::MalformedReply),
                "content: {}",
                content
            );
            assert_eq!(record.matched_endpoint, None);
            assert_eq!(record.latency_ms, Some(70));
        }
    }

    #[test]
    fn test_object_with_only_a_parameter_is_kept() {
        let record = normalizer().normalize(key(), &RawReply::new(r#"{"person_name": "Jane"}"#), Capabilities::default());
        assert!(!record.is_error());
        assert_eq!(record.matched_endpoint, None);
        assert_eq!(record.parameter("person_name"), Some("Jane"));
    }

    #[test]
    fn test_one_word_prose_is_not_a_label() {
        let n = normalizer();
        for content in ["Sorry.", "Hello", "42", "OK!"] {
            let record = n.normalize(key(), &RawReply::new(content), Capabilities::default());
            assert_eq!(
                record.error.as_ref().map(|e| e.kind),
                Some(ErrorKind::MalformedReply),
                "content: {}",
                content
            );
        }
        for content in ["search", "send-email", "jobs/analyze", "NO_MATCH"] {
            let record = n.normalize(key(), &RawReply::new(content), Capabilities::default());
            assert!(!record.is_error(), "content: {}", content);
        }
    }

    #[test]
    fn test_label_outside_catalog_is_malformed() {
        let n = normalizer().with_catalog(vec!["analyze_job_fit".to_string()]);
        let record = n.normalize(key(), &RawReply::new("weather_lookup"), Capabilities::default());
        assert_eq!(record.error.map(|e| e.kind), Some(ErrorKind::MalformedReply));

        let record = n.normalize(key(), &RawReply::new("Analyze_Job_Fit"), Capabilities::default());
        assert_eq!(record.matched_endpoint.as_deref(), Some("analyze_job_fit"));
    }

    #[test]
    fn test_catalog_resolution() {
        let n = normalizer().with_catalog(vec!["analyze_job_fit".to_string(), "send_email".to_string()]);

        assert_eq!(n.resolve_endpoint("send_email").as_deref(), Some("send_email"));
        assert_eq!(n.resolve_endpoint("Analyze_Job").as_deref(), Some("analyze_job_fit"));
        assert_eq!(n.resolve_endpoint("/api/send_email/v2").as_deref(), Some("send_email"));
        assert_eq!(n.resolve_endpoint("unknown_thing").as_deref(), Some("unknown_thing"));
        assert_eq!(n.resolve_endpoint("NO_MATCH"), None);
    }

    #[test]
    fn test_capabilities_suppress_output() {
        let reply = RawReply::new(r#"{"endpoint": "e", "job_url": "u"}"#);

        let no_endpoint = Capabilities {
            can_classify_endpoint: false,
            can_extract_parameters: true,
        };
        let record = normalizer().normalize(key(), &reply, no_endpoint);
        assert_eq!(record.matched_endpoint, None);
        assert_eq!(record.parameter("job_url"), Some("u"));

        let no_params = Capabilities {
            can_classify_endpoint: true,
            can_extract_parameters: false,
        };
        let record = normalizer().normalize(key(), &reply, no_params);
        assert_eq!(record.matched_endpoint.as_deref(), Some("e"));
        assert_eq!(record.parameter("job_url"), None);
        assert_eq!(record.extracted_parameters.len(), 2);
    }
}
