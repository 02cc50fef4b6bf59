//! Shared HTTP plumbing for the hosted providers.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;

use super::secrets::{ApiCredential, KeyLookup};
use super::{CompletionConfig, ProviderError};

/// How a vendor wants its key presented.
#[derive(Debug, Clone, Copy)]
pub(crate) enum AuthStyle {
    Bearer,
    Header(&'static str),
}

/// Key, base URL and client for one hosted API.
#[derive(Debug)]
pub(crate) struct HttpEndpoint {
    credential: ApiCredential,
    base_url: String,
    auth: AuthStyle,
    client: reqwest::Client,
}

impl HttpEndpoint {
    /// Build from provider settings: `api_key` (or the environment) and an
    /// optional `base_url`.
    pub(crate) fn from_config(
        config: &JsonValue,
        key: &KeyLookup,
        default_base_url: &str,
        auth: AuthStyle,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            credential: key.resolve(config)?,
            base_url: base_url(config, default_base_url)?,
            auth,
            client: build_client()?,
        })
    }

    pub(crate) fn with_key(
        api_key: impl Into<String>,
        key: &KeyLookup,
        default_base_url: &str,
        auth: AuthStyle,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            credential: ApiCredential::inline(api_key, key.label),
            base_url: default_base_url.to_string(),
            auth,
            client: build_client()?,
        })
    }

    /// Same checks as [`HttpEndpoint::from_config`], without building a client.
    pub(crate) fn validate(
        config: &JsonValue,
        key: &KeyLookup,
        default_base_url: &str,
    ) -> Result<(), ProviderError> {
        key.require(config)?;
        base_url(config, default_base_url).map(|_| ())
    }

    pub(crate) fn has_key(&self) -> bool {
        !self.credential.is_empty()
    }

    /// POST `body` to `{base_url}/{path}` and decode the reply.
    pub(crate) async fn post_json<B, T>(
        &self,
        path: &str,
        body: &B,
        config: &CompletionConfig,
        extra_headers: &[(&'static str, &'static str)],
        error_message: fn(&JsonValue) -> Option<String>,
    ) -> Result<T, ProviderError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .timeout(config.timeout)
            .json(body);
        request = match self.auth {
            AuthStyle::Bearer => request.bearer_auth(self.credential.expose()),
            AuthStyle::Header(name) => request.header(name, self.credential.expose()),
        };
        for (name, value) in extra_headers {
            request = request.header(*name, *value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_send_error(e, config.timeout))?;
        read_json(response, error_message).await
    }
}

fn build_client() -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .build()
        .map_err(|e| ProviderError::HttpError(format!("failed to build HTTP client: {}", e)))
}

/// `base_url` from settings, without a trailing slash; only http(s).
fn base_url(config: &JsonValue, default: &str) -> Result<String, ProviderError> {
    match config["base_url"].as_str() {
        Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
            Ok(url.trim_end_matches('/').to_string())
        }
        Some(other) => Err(ProviderError::NotConfigured(format!(
            "base_url '{}' must start with http:// or https://",
            other
        ))),
        None => Ok(default.to_string()),
    }
}

fn map_send_error(e: reqwest::Error, timeout: Duration) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::HttpError(e.to_string())
    }
}

/// 429 and 401/403 get their own variants; other failures keep the
/// vendor's message when `error_message` can find one.
async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
    error_message: fn(&JsonValue) -> Option<String>,
) -> Result<T, ProviderError> {
    let status = response.status().as_u16();

    match status {
        429 => {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            Err(ProviderError::RateLimited { retry_after })
        }
        401 | 403 => Err(ProviderError::AuthError),
        200..=299 => response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string())),
        _ => {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<JsonValue>(&body)
                .ok()
                .and_then(|v| error_message(&v))
                .unwrap_or(body);
            Err(ProviderError::ApiError { status, message })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const KEY: KeyLookup = KeyLookup::new("Test key", &["ROUTEBENCH_TEST_KEY_HTTP_UNSET"]);

    #[test]
    fn test_base_url_default_and_override() {
        assert_eq!(
            base_url(&json!({}), "https://api.example.com/v1").unwrap(),
            "https://api.example.com/v1"
        );
        assert_eq!(
            base_url(&json!({"base_url": "http://localhost:8080/"}), "x").unwrap(),
            "http://localhost:8080"
        );
        assert!(base_url(&json!({"base_url": "ftp://x"}), "x").is_err());
    }

    #[test]
    fn test_validate_needs_key_and_sane_url() {
        let default = "https://api.example.com";
        assert!(HttpEndpoint::validate(&json!({}), &KEY, default).is_err());
        assert!(HttpEndpoint::validate(&json!({"api_key": "k"}), &KEY, default).is_ok());
        assert!(
            HttpEndpoint::validate(&json!({"api_key": "k", "base_url": "nope"}), &KEY, default)
                .is_err()
        );
    }

    #[test]
    fn test_endpoint_debug_hides_key() {
        let endpoint =
            HttpEndpoint::with_key("sk-hidden-42", &KEY, "https://x", AuthStyle::Bearer).unwrap();
        assert!(endpoint.has_key());
        assert!(!format!("{:?}", endpoint).contains("sk-hidden-42"));
    }
}
