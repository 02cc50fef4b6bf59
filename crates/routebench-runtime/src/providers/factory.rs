//! Provider factories.
//!
//! A sweep file names each provider by a free-form id ("Cohere", "Claude")
//! and a `type` that selects the factory ("cohere", "anthropic", "scripted").
//! The registry turns that pair into a live [`LlmProvider`].
//!
//! ```ignore
//! let registry = ProviderRegistry::with_defaults();
//! let provider = registry.create("cohere", &json!({"model": "command-r-plus"}))?;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{LlmProvider, ProviderError};

/// Builds providers of one `type:` from their sweep-file settings.
pub trait ProviderFactory: Send + Sync {
    fn provider_type(&self) -> &'static str;

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError>;

    /// Check settings without building a provider. Must not touch the network.
    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError>;

    /// Settings a sweep file may omit; `model` is read by the sweep builder.
    fn default_config(&self) -> JsonValue {
        JsonValue::Object(Default::default())
    }

    /// One line for `routebench validate`.
    fn description(&self) -> &'static str;
}

/// Factories keyed by provider type.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<&'static str, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The scripted provider plus every HTTP provider compiled in.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::ScriptedProviderFactory));
        #[cfg(feature = "anthropic")]
        registry.register(Arc::new(super::AnthropicProviderFactory));
        #[cfg(feature = "cohere")]
        registry.register(Arc::new(super::CohereProviderFactory));
        #[cfg(feature = "deepseek")]
        registry.register(Arc::new(super::DeepSeekProviderFactory));
        registry
    }

    /// Later registrations win.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(factory.provider_type(), factory);
    }

    fn lookup(&self, provider_type: &str) -> Result<&dyn ProviderFactory, ProviderError> {
        match self.factories.get(provider_type) {
            Some(factory) => Ok(factory.as_ref()),
            None => Err(ProviderError::NotConfigured(format!(
                "no factory for provider type '{}' (compiled in: {}); HTTP providers need their cargo feature",
                provider_type,
                self.available_types().join(", ")
            ))),
        }
    }

    pub fn create(
        &self,
        provider_type: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let factory = self.lookup(provider_type)?;
        factory.validate_config(config)?;
        factory.create(config)
    }

    pub fn validate(&self, provider_type: &str, config: &JsonValue) -> Result<(), ProviderError> {
        self.lookup(provider_type)?.validate_config(config)
    }

    pub fn available_types(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn has_provider(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }

    pub fn default_config(&self, provider_type: &str) -> Option<JsonValue> {
        self.factories.get(provider_type).map(|f| f.default_config())
    }

    pub fn description(&self, provider_type: &str) -> Option<&'static str> {
        self.factories.get(provider_type).map(|f| f.description())
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}
