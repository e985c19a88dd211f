//! Request-side types: where to send, how to sample, what to say.

use banter_core::config::{EndpointConfig, EndpointFlavor, GenerationConfig};
use reqwest::Url;
use reqwest::header::{HeaderName, HeaderValue};
use serde::Serialize;
use tracing::warn;

use crate::error::GenerationError;

/// A validated generation endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: String,
    flavor: EndpointFlavor,
    model: String,
    api_key: Option<String>,
    secret: Option<(String, String)>,
}

impl Endpoint {
    /// Validate an endpoint configuration.
    ///
    /// # Errors
    /// Returns [`GenerationError::InvalidEndpoint`] when the URL does not
    /// parse, is not `http`/`https`, or a header cannot be sent.
    pub fn from_config(config: &EndpointConfig) -> Result<Self, GenerationError> {
        let url = Url::parse(&config.url)
            .map_err(|e| GenerationError::InvalidEndpoint(format!("{}: {e}", config.url)))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(GenerationError::InvalidEndpoint(format!(
                "{}: expected an http(s) URL with a host",
                config.url
            )));
        }

        let endpoint = Self::unchecked(config, url.to_string());
        if let Some(key) = &endpoint.api_key {
            HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| GenerationError::InvalidEndpoint(format!("api key: {e}")))?;
        }
        if let Some((name, value)) = &endpoint.secret {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| GenerationError::InvalidEndpoint(format!("secret header: {e}")))?;
            HeaderValue::from_str(value)
                .map_err(|e| GenerationError::InvalidEndpoint(format!("secret value: {e}")))?;
        }
        Ok(endpoint)
    }

    /// Validate `config`, repairing only the parts that are unusable.
    ///
    /// A bad URL is replaced by the default URL and a bad credential is
    /// dropped; flavor, model and the remaining credentials are kept. The
    /// pipeline keeps running in degraded mode.
    #[must_use]
    pub fn from_config_or_default(config: &EndpointConfig) -> Self {
        let e = match Self::from_config(config) {
            Ok(endpoint) => return endpoint,
            Err(e) => e,
        };
        let url = match Url::parse(&config.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {
                url.to_string()
            }
            _ => EndpointConfig::default().url,
        };
        let mut endpoint = Self::unchecked(config, url);
        if endpoint
            .api_key
            .as_deref()
            .is_some_and(|key| HeaderValue::from_str(&format!("Bearer {key}")).is_err())
        {
            endpoint.api_key = None;
        }
        if endpoint.secret.as_ref().is_some_and(|(name, value)| {
            HeaderName::from_bytes(name.as_bytes()).is_err() || HeaderValue::from_str(value).is_err()
        }) {
            endpoint.secret = None;
        }
        warn!(error = %e, url = %endpoint.url, "Generation endpoint repaired");
        endpoint
    }

    fn unchecked(config: &EndpointConfig, url: String) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            url,
            flavor: config.flavor,
            model: config.model.clone(),
            api_key: non_empty(&config.api_key),
            secret: non_empty(&config.api_secret)
                .filter(|_| !config.secret_header.is_empty())
                .map(|v| (config.secret_header.clone(), v)),
        }
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Body flavor.
    #[must_use]
    pub fn flavor(&self) -> EndpointFlavor {
        self.flavor
    }

    /// Model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Bearer token, if configured.
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Secret header `(name, value)`, if configured.
    #[must_use]
    pub fn secret(&self) -> Option<(&str, &str)> {
        self.secret.as_ref().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sampling {
    /// Temperature.
    pub temperature: f32,
    /// Nucleus threshold.
    pub top_p: f32,
    /// Token budget.
    pub max_tokens: u32,
    /// Frequency penalty.
    pub frequency_penalty: f32,
    /// Presence penalty.
    pub presence_penalty: f32,
    /// Stop sequences.
    pub stop: Vec<String>,
}

impl From<&GenerationConfig> for Sampling {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
            stop: config.stop.clone(),
        }
    }
}

impl Default for Sampling {
    fn default() -> Self {
        Self::from(&GenerationConfig::default())
    }
}

/// One composed prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    /// Persona, rules and live context.
    pub system: String,
    /// History and the message to answer.
    pub user: String,
    /// Name of the character that will speak the reply, used to strip
    /// `Name:` prefixes from the output.
    pub speaker: String,
}

impl GenerationRequest {
    /// Create a request.
    #[must_use]
    pub fn new(system: impl Into<String>, user: impl Into<String>, speaker: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            speaker: speaker.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_endpoint_is_valid() {
        let endpoint = Endpoint::from_config(&EndpointConfig::default()).expect("valid");
        assert_eq!(endpoint.url(), "http://127.0.0.1:11434/api/generate");
        assert_eq!(endpoint.api_key(), None);
        assert_eq!(endpoint.secret(), None);
    }

    #[test]
    fn malformed_url_falls_back() {
        let config = EndpointConfig {
            url: "not a url".into(),
            model: "custom".into(),
            ..EndpointConfig::default()
        };
        assert!(matches!(
            Endpoint::from_config(&config),
            Err(GenerationError::InvalidEndpoint(_))
        ));
        let endpoint = Endpoint::from_config_or_default(&config);
        assert_eq!(endpoint.url(), EndpointConfig::default().url);
        assert_eq!(endpoint.model(), "custom");
    }

    #[test]
    fn fallback_keeps_flavor_model_and_credentials() {
        let config = EndpointConfig {
            url: "not a url".into(),
            flavor: EndpointFlavor::Chat,
            model: "custom".into(),
            api_key: "sk-1".into(),
            api_secret: "s3cret".into(),
            ..EndpointConfig::default()
        };
        let endpoint = Endpoint::from_config_or_default(&config);
        assert_eq!(endpoint.url(), EndpointConfig::default().url);
        assert_eq!(endpoint.flavor(), EndpointFlavor::Chat);
        assert_eq!(endpoint.model(), "custom");
        assert_eq!(endpoint.api_key(), Some("sk-1"));
        assert_eq!(endpoint.secret(), Some(("X-Api-Secret", "s3cret")));
    }

    #[test]
    fn bad_secret_header_drops_only_the_secret() {
        let config = EndpointConfig {
            url: "https://gen.example.com/v1/chat/completions".into(),
            flavor: EndpointFlavor::Chat,
            model: "custom".into(),
            api_key: "sk-1".into(),
            secret_header: "bad header".into(),
            api_secret: "x".into(),
        };
        let endpoint = Endpoint::from_config_or_default(&config);
        assert_eq!(endpoint.url(), "https://gen.example.com/v1/chat/completions");
        assert_eq!(endpoint.flavor(), EndpointFlavor::Chat);
        assert_eq!(endpoint.api_key(), Some("sk-1"));
        assert_eq!(endpoint.secret(), None);
    }

    #[test]
    fn non_http_scheme_rejected() {
        let config = EndpointConfig {
            url: "ftp://example.com/generate".into(),
            ..EndpointConfig::default()
        };
        assert!(Endpoint::from_config(&config).is_err());
    }

    #[test]
    fn credentials_only_when_non_empty() {
        let config = EndpointConfig {
            api_key: "sk-1".into(),
            api_secret: "s3cret".into(),
            ..EndpointConfig::default()
        };
        let endpoint = Endpoint::from_config(&config).expect("valid");
        assert_eq!(endpoint.api_key(), Some("sk-1"));
        assert_eq!(endpoint.secret(), Some(("X-Api-Secret", "s3cret")));

        let bad_header = EndpointConfig {
            secret_header: "bad header".into(),
            api_secret: "x".into(),
            ..EndpointConfig::default()
        };
        assert!(Endpoint::from_config(&bad_header).is_err());
    }
}
