//! API keys for the hosted providers.
//!
//! A key is wrapped in [`secrecy::SecretString`] the moment it is read and
//! is only exposed where a request header is set. `Debug` and `Display`
//! print where the key came from, never the key.
//!
//! Each provider declares one [`KeyLookup`]: the sweep-file field
//! `api_key` wins, then the environment variables in order.
//!
//! ```ignore
//! const KEY: KeyLookup = KeyLookup::new("Anthropic API key", &["ANTHROPIC_API_KEY", "CLAUDE_API_KEY"]);
//! let credential = KEY.resolve(&config)?;
//! request.header("x-api-key", credential.expose());
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Provider settings field holding an inline key.
pub const API_KEY_FIELD: &str = "api_key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// `api_key` in the sweep file
    Config,
    /// The named environment variable
    Environment(&'static str),
    /// Passed to a provider constructor
    Inline,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "sweep config"),
            CredentialSource::Environment(var) => write!(f, "${}", var),
            CredentialSource::Inline => write!(f, "caller"),
        }
    }
}

/// Where one provider looks for its key.
#[derive(Debug, Clone, Copy)]
pub struct KeyLookup {
    pub label: &'static str,
    pub env_vars: &'static [&'static str],
}

impl KeyLookup {
    pub const fn new(label: &'static str, env_vars: &'static [&'static str]) -> Self {
        Self { label, env_vars }
    }

    fn find(&self, config: &JsonValue) -> Option<(String, CredentialSource)> {
        if let Some(key) = config[API_KEY_FIELD].as_str().filter(|k| !k.is_empty()) {
            return Some((key.to_string(), CredentialSource::Config));
        }
        self.env_vars.iter().find_map(|&var| match std::env::var(var) {
            Ok(key) if !key.is_empty() => Some((key, CredentialSource::Environment(var))),
            _ => None,
        })
    }

    pub fn resolve(&self, config: &JsonValue) -> Result<ApiCredential, ProviderError> {
        let (key, source) = self.find(config).ok_or_else(|| self.missing())?;
        tracing::debug!(key = self.label, %source, "Resolved API key");
        Ok(ApiCredential {
            value: SecretString::from(key),
            source,
            label: self.label,
        })
    }

    /// Check that a key can be found without keeping it.
    pub fn require(&self, config: &JsonValue) -> Result<(), ProviderError> {
        self.find(config).map(|_| ()).ok_or_else(|| self.missing())
    }

    fn missing(&self) -> ProviderError {
        ProviderError::NotConfigured(format!(
            "{} missing: set '{}' on the provider or export {}",
            self.label,
            API_KEY_FIELD,
            self.env_vars.join(" or ")
        ))
    }
}

/// A resolved key.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    label: &'static str,
}

impl ApiCredential {
    pub fn inline(key: impl Into<String>, label: &'static str) -> Self {
        Self {
            value: SecretString::from(key.into()),
            source: CredentialSource::Inline,
            label,
        }
    }

    /// The raw key. Only for building request headers.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiCredential({}, from {}, [REDACTED])", self.label, self.source)
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {}", self.label, self.source)
    }
}
