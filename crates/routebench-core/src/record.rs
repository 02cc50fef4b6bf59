//! Response records.
//!
//! A `ResponseRecord` is the unit of observation for one benchmark iteration:
//! what one provider answered, under one prompt version, on one iteration.
//! Records are built once (by the normalizer or by the sweep controller on
//! failure) and then handed by value to the aggregator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Endpoint label used in tallies when a reply matched no endpoint.
pub const NO_ENDPOINT: &str = "none";

/// Separator between prompt version and provider in checkpoint keys.
pub const KEY_SEPARATOR: char = '\u{1f}';

/// Identity of an aggregation bucket: one cell of the report.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub prompt_version: String,
    pub provider: String,
}

impl BucketKey {
    pub fn new(prompt_version: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            prompt_version: prompt_version.into(),
            provider: provider.into(),
        }
    }

    /// Flat key used when buckets are serialized as a map.
    pub fn checkpoint_key(&self) -> String {
        format!("{}{}{}", self.prompt_version, KEY_SEPARATOR, self.provider)
    }

    /// Inverse of [`BucketKey::checkpoint_key`].
    pub fn from_checkpoint_key(key: &str) -> Option<Self> {
        let (version, provider) = key.split_once(KEY_SEPARATOR)?;
        if version.is_empty() || provider.is_empty() || provider.contains(KEY_SEPARATOR) {
            return None;
        }
        Some(Self::new(version, provider))
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.prompt_version, self.provider)
    }
}

/// Identity of a single record: (prompt_version, provider, iteration_index).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub prompt_version: String,
    pub provider: String,
    pub iteration_index: u32,
}

impl RecordKey {
    pub fn new(
        prompt_version: impl Into<String>,
        provider: impl Into<String>,
        iteration_index: u32,
    ) -> Self {
        Self {
            prompt_version: prompt_version.into(),
            provider: provider.into(),
            iteration_index,
        }
    }

    /// The bucket this record folds into.
    pub fn bucket(&self) -> BucketKey {
        BucketKey::new(self.prompt_version.clone(), self.provider.clone())
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}#{}",
            self.prompt_version, self.provider, self.iteration_index
        )
    }
}

/// Why an iteration did not produce a clean reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network failure, timeout, non-2xx status, open circuit.
    ProviderCallFailed,

    /// The provider answered but nothing recognizable could be parsed.
    MalformedReply,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ProviderCallFailed => write!(f, "provider_call_failed"),
            ErrorKind::MalformedReply => write!(f, "malformed_reply"),
        }
    }
}

/// Failure descriptor attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RecordError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// One observed iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub prompt_version: String,
    pub provider: String,
    pub iteration_index: u32,

    /// Selected endpoint; `None` means no match / fallback.
    #[serde(default)]
    pub matched_endpoint: Option<String>,

    /// Expected parameter name -> extracted literal value (`None` = not extracted).
    #[serde(default)]
    pub extracted_parameters: BTreeMap<String, Option<String>>,

    /// Wall-clock duration of the provider call. Absent if the call never started.
    #[serde(default)]
    pub latency_ms: Option<u64>,

    #[serde(default)]
    pub tokens_in: Option<u64>,

    #[serde(default)]
    pub tokens_out: Option<u64>,

    #[serde(default)]
    pub error: Option<RecordError>,
}

impl ResponseRecord {
    /// Start an empty record for the given identity.
    pub fn new(key: RecordKey) -> Self {
        Self {
            prompt_version: key.prompt_version,
            provider: key.provider,
            iteration_index: key.iteration_index,
            matched_endpoint: None,
            extracted_parameters: BTreeMap::new(),
            latency_ms: None,
            tokens_in: None,
            tokens_out: None,
            error: None,
        }
    }

    /// A record for a call that failed before any reply was available.
    pub fn failed(
        key: RecordKey,
        kind: ErrorKind,
        message: impl Into<String>,
        latency_ms: Option<u64>,
    ) -> Self {
        Self {
            latency_ms,
            error: Some(RecordError::new(kind, message)),
            ..Self::new(key)
        }
    }

    pub fn with_endpoint(mut self, endpoint: Option<impl Into<String>>) -> Self {
        self.matched_endpoint = endpoint.map(Into::into);
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        self.extracted_parameters
            .insert(name.into(), value.map(Into::into));
        self
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

    pub fn with_error(mut self, kind: ErrorKind, message: impl Into<String>) -> Self {
        self.error = Some(RecordError::new(kind, message));
        self
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(
            self.prompt_version.clone(),
            self.provider.clone(),
            self.iteration_index,
        )
    }

    pub fn bucket_key(&self) -> BucketKey {
        BucketKey::new(self.prompt_version.clone(), self.provider.clone())
    }

    /// Label counted in endpoint tallies.
    pub fn endpoint_label(&self) -> &str {
        self.matched_endpoint.as_deref().unwrap_or(NO_ENDPOINT)
    }

    /// Extracted value for a parameter, if any.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.extracted_parameters
            .get(name)
            .and_then(|v| v.as_deref())
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
