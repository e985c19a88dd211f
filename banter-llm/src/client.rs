//! Generation client: one HTTP POST per reply, gated and time-boxed.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use banter_core::config::{EndpointConfig, EndpointFlavor, GenerationConfig};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::GenerationError;
use crate::prompt::sanitize_reply;
use crate::types::{Endpoint, GenerationRequest, Sampling};

/// Anything that can turn a prompt into a chat line.
///
/// The dispatch worker depends on this seam, not on HTTP.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate one sanitized reply.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// HTTP generation client with a concurrency gate and a per-call timeout.
pub struct GenerationClient {
    http: Client,
    endpoint: Endpoint,
    sampling: Sampling,
    gate: Semaphore,
    max_concurrent: usize,
    timeout: Duration,
}

impl std::fmt::Debug for GenerationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationClient")
            .field("endpoint", &self.endpoint.url())
            .field("flavor", &self.endpoint.flavor())
            .field("max_concurrent", &self.max_concurrent)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl GenerationClient {
    /// Create a client. `max_concurrent` is raised to at least 1.
    #[must_use]
    pub fn new(endpoint: Endpoint, sampling: Sampling, max_concurrent: usize, timeout: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            http: Client::new(),
            endpoint,
            sampling,
            gate: Semaphore::new(max_concurrent),
            max_concurrent,
            timeout,
        }
    }

    /// Build from configuration; an unusable endpoint is replaced by the
    /// default one.
    #[must_use]
    pub fn from_config(endpoint: &EndpointConfig, generation: &GenerationConfig) -> Self {
        Self::new(
            Endpoint::from_config_or_default(endpoint),
            Sampling::from(generation),
            generation.max_concurrent,
            generation.timeout(),
        )
    }

    /// Calls currently holding a gate slot.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.gate.available_permits()
    }

    /// The endpoint requests are sent to.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// JSON body for `request` in the configured flavor.
    #[must_use]
    pub fn build_body(&self, request: &GenerationRequest) -> Value {
        let s = &self.sampling;
        match self.endpoint.flavor() {
            EndpointFlavor::Flat => json!({
                "model": self.endpoint.model(),
                "prompt": format!("{}\n\n{}", request.system, request.user),
                "stream": false,
                "options": {
                    "temperature": s.temperature,
                    "top_p": s.top_p,
                    "num_predict": s.max_tokens,
                    "frequency_penalty": s.frequency_penalty,
                    "presence_penalty": s.presence_penalty,
                    "stop": s.stop,
                }
            }),
            EndpointFlavor::Chat => json!({
                "model": self.endpoint.model(),
                "messages": [
                    { "role": "system", "content": request.system },
                    { "role": "user", "content": request.user },
                ],
                "temperature": s.temperature,
                "max_tokens": s.max_tokens,
                "top_p": s.top_p,
                "frequency_penalty": s.frequency_penalty,
                "presence_penalty": s.presence_penalty,
                "stop": s.stop,
                "stream": false,
            }),
        }
    }

    async fn post(&self, body: &Value) -> Result<String, GenerationError> {
        let mut builder = self
            .http
            .post(self.endpoint.url())
            .header(CONTENT_TYPE, "application/json")
            .json(body);
        if let Some(key) = self.endpoint.api_key() {
            builder = builder.bearer_auth(key);
        }
        if let Some((name, value)) = self.endpoint.secret() {
            builder = builder.header(name, value);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if status != StatusCode::OK {
            return Err(GenerationError::Service {
                status: Some(status.as_u16()),
                message: text,
            });
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| GenerationError::MalformedResponse(format!("invalid JSON: {e}")))?;
        extract_reply(&json)
    }
}

#[async_trait]
impl TextGenerator for GenerationClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let _permit = self.gate.try_acquire().map_err(|_| GenerationError::Service {
            status: None,
            message: format!("{} generation calls already in flight", self.max_concurrent),
        })?;

        let body = self.build_body(request);
        let start = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, self.post(&body)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(
                u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        };
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(raw) => {
                let reply = sanitize_reply(&raw, &request.speaker).ok_or_else(|| {
                    GenerationError::MalformedResponse("reply is empty after clean-up".into())
                })?;
                debug!(speaker = %request.speaker, latency_ms, chars = reply.len(), "Reply generated");
                Ok(reply)
            }
            Err(e) => {
                debug!(speaker = %request.speaker, latency_ms, class = e.class(), error = %e, "Generation call failed");
                Err(e)
            }
        }
    }
}

/// Pull the reply text out of either response envelope.
///
/// # Errors
/// [`GenerationError::MalformedResponse`] when neither `response` nor
/// `choices[0].message.content` holds a string.
pub fn extract_reply(json: &Value) -> Result<String, GenerationError> {
    json.get("response")
        .and_then(Value::as_str)
        .or_else(|| json.pointer("/choices/0/message/content").and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| {
            GenerationError::MalformedResponse(
                "expected `response` or `choices[0].message.content`".into(),
            )
        })
}
