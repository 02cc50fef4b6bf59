//! Reportable rows.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How much data stands behind a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    /// No iteration was observed
    NoData,

    /// Some but not all configured iterations were observed
    Partial,

    Complete,
}

impl RowStatus {
    pub fn from_counts(seen: u32, configured: u32) -> Self {
        if seen == 0 {
            RowStatus::NoData
        } else if seen < configured {
            RowStatus::Partial
        } else {
            RowStatus::Complete
        }
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowStatus::NoData => write!(f, "no data"),
            RowStatus::Partial => write!(f, "partial"),
            RowStatus::Complete => write!(f, "complete"),
        }
    }
}

/// One slice of the endpoint distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointShare {
    /// `None` is the no-match bucket
    pub endpoint: Option<String>,
    pub count: u64,
    pub pct: u32,
}

/// Extraction outcome for one expected parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ParameterStatus {
    /// The bucket was never observed
    NotFound,

    /// Observed, but the parameter never came back
    NotExtracted,

    Extracted {
        extracted_pct: u32,
        consistency_pct: u32,
        most_common_value: String,
        distinct_values: usize,
        extracted_count: u64,
    },
}

impl ParameterStatus {
    pub fn extracted_pct(&self) -> Option<u32> {
        match self {
            ParameterStatus::NotFound => None,
            ParameterStatus::NotExtracted => Some(0),
            ParameterStatus::Extracted { extracted_pct, .. } => Some(*extracted_pct),
        }
    }

    pub fn consistency_pct(&self) -> Option<u32> {
        match self {
            ParameterStatus::Extracted { consistency_pct, .. } => Some(*consistency_pct),
            _ => None,
        }
    }

    pub fn most_common_value(&self) -> Option<&str> {
        match self {
            ParameterStatus::Extracted { most_common_value, .. } => Some(most_common_value),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterStatus::NotFound => write!(f, "Not found"),
            ParameterStatus::NotExtracted => write!(f, "Not extracted (0%)"),
            ParameterStatus::Extracted {
                extracted_pct,
                consistency_pct,
                most_common_value,
                ..
            } => write!(
                f,
                "'{}' ({}% extracted, {}% consistent)",
                most_common_value, extracted_pct, consistency_pct
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterMetrics {
    pub name: String,
    #[serde(flatten)]
    pub status: ParameterStatus,
}

/// Derived metrics for one (prompt_version, provider).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub prompt_version: String,
    pub provider: String,
    pub status: RowStatus,
    pub iterations_configured: u32,
    pub iterations_seen: u32,
    pub complete: bool,
    pub error_count: u32,
    pub malformed_count: u32,

    /// Endpoint distribution, most frequent first
    pub endpoints: Vec<EndpointShare>,

    /// Share of the most common endpoint label
    pub endpoint_agreement_pct: Option<u32>,

    /// Share of iterations that matched the scenario's expected endpoint
    pub endpoint_accuracy_pct: Option<u32>,

    /// One entry per expected parameter, in scenario order
    pub parameters: Vec<ParameterMetrics>,

    /// Mean share of expected parameters extracted per iteration
    pub avg_completion_pct: Option<u32>,

    pub avg_latency_ms: Option<u64>,
    pub avg_tokens_in: Option<u64>,
    pub avg_tokens_out: Option<u64>,
}

impl MetricsRow {
    pub fn parameter(&self, name: &str) -> Option<&ParameterStatus> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.status)
    }

    /// Share of iterations that selected `endpoint` (`None` = no match).
    ///
    /// `None` when the row has no data.
    pub fn endpoint_match_pct(&self, endpoint: Option<&str>) -> Option<u32> {
        if self.iterations_seen == 0 {
            return None;
        }
        Some(
            self.endpoints
                .iter()
                .find(|share| share.endpoint.as_deref() == endpoint)
                .map_or(0, |share| share.pct),
        )
    }

    /// The most common endpoint, if any data was seen.
    pub fn top_endpoint(&self) -> Option<&EndpointShare> {
        self.endpoints.first()
    }

    pub fn has_data(&self) -> bool {
        self.status != RowStatus::NoData
    }
}

/// All rows for one prompt version, in scenario provider order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReport {
    pub prompt_version: String,
    pub rows: Vec<MetricsRow>,
}

impl VersionReport {
    pub fn row(&self, provider: &str) -> Option<&MetricsRow> {
        self.rows.iter().find(|r| r.provider == provider)
    }
}

/// The full reduced report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_name: Option<String>,
    pub utterance: String,
    pub iterations_per_config: u32,
    pub expected_parameters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_endpoint: Option<String>,
    pub versions: Vec<VersionReport>,
}

impl Report {
    pub fn version(&self, prompt_version: &str) -> Option<&VersionReport> {
        self.versions
            .iter()
            .find(|v| v.prompt_version == prompt_version)
    }

    pub fn row(&self, prompt_version: &str, provider: &str) -> Option<&MetricsRow> {
        self.version(prompt_version)?.row(provider)
    }

    /// Every row, versions outer, providers inner.
    pub fn rows(&self) -> impl Iterator<Item = &MetricsRow> {
        self.versions.iter().flat_map(|v| v.rows.iter())
    }
}
