//! Configuration for the BANTER chat pipeline.
//!
//! Maps directly to `banter.toml`. Every field carries a serde default, so a
//! partial file (or an empty one) yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Top-level BANTER configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BanterConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Generation service endpoint and credentials.
    #[serde(default)]
    pub endpoint: EndpointConfig,
    /// Who answers and how many.
    #[serde(default)]
    pub chat: ChatConfig,
    /// Admission control.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Sampling parameters and call limits for generation.
    #[serde(default)]
    pub generation: GenerationConfig,
    /// Dispatch queue bounds.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Conversation memory.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Personality definitions.
    #[serde(default)]
    pub personality: PersonalityConfig,
    /// Reply delivery timing.
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

impl BanterConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `BanterError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::BanterError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML file, falling back to the built-in
    /// defaults when the file is missing or malformed.
    #[must_use]
    pub fn load_or_default(path: &Path) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Falling back to default configuration");
                Self::default()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Master switch for the whole pipeline.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log format: "pretty" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Wire format expected by the generation endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointFlavor {
    /// Single-prompt body (`model`, `prompt`, `stream`), Ollama style.
    #[default]
    Flat,
    /// Chat-completion body (`model`, `messages`, sampling fields).
    Chat,
}

/// Generation service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Full URL of the generation endpoint (scheme, host, port and path).
    #[serde(default = "default_endpoint_url")]
    pub url: String,
    /// Request body flavor.
    #[serde(default)]
    pub flavor: EndpointFlavor,
    /// Model name sent with every request.
    #[serde(default = "default_model")]
    pub model: String,
    /// Bearer token; empty disables the `Authorization` header.
    #[serde(default)]
    pub api_key: String,
    /// Name of the shared-secret header.
    #[serde(default = "default_secret_header")]
    pub secret_header: String,
    /// Shared-secret value; empty disables the secret header.
    #[serde(default)]
    pub api_secret: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: default_endpoint_url(),
            flavor: EndpointFlavor::Flat,
            model: default_model(),
            api_key: String::new(),
            secret_header: default_secret_header(),
            api_secret: String::new(),
        }
    }
}

/// Responder selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Say radius in world units; yell reaches twice as far.
    #[serde(default = "default_say_radius")]
    pub say_radius: f32,
    /// Upper bound on replies generated for a single message.
    #[serde(default = "default_3_usize")]
    pub max_replies_per_message: usize,
    /// Probability (0–1) that an admitted message gets any reply at all.
    #[serde(default = "default_1_0")]
    pub response_probability: f64,
    /// Let bots answer other bots.
    #[serde(default)]
    pub reply_to_bots: bool,
    /// Let bots of another team answer proximity and channel chat.
    #[serde(default)]
    pub cross_team_replies: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            say_radius: 25.0,
            max_replies_per_message: 3,
            response_probability: 1.0,
            reply_to_bots: false,
            cross_team_replies: false,
        }
    }
}

impl ChatConfig {
    /// Radius that applies to yelled messages.
    #[must_use]
    pub fn yell_radius(&self) -> f32 {
        self.say_radius * 2.0
    }
}

/// Admission control: global sliding window and per-class cooldowns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Length of the global window in seconds.
    #[serde(default = "default_60")]
    pub window_secs: u64,
    /// Messages admitted per window.
    #[serde(default = "default_30")]
    pub max_messages: u32,
    /// Minimum gap between two admitted messages from the same sender.
    #[serde(default = "default_3000")]
    pub player_cooldown_ms: u64,
    /// Minimum gap between two replies from the same bot.
    #[serde(default = "default_5000")]
    pub bot_cooldown_ms: u64,
    /// Minimum gap between any two generated replies.
    #[serde(default = "default_500")]
    pub global_cooldown_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_messages: 30,
            player_cooldown_ms: 3000,
            bot_cooldown_ms: 5000,
            global_cooldown_ms: 500,
        }
    }
}

impl RateLimitConfig {
    /// Window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Player cooldown.
    #[must_use]
    pub fn player_cooldown(&self) -> Duration {
        Duration::from_millis(self.player_cooldown_ms)
    }

    /// Bot cooldown.
    #[must_use]
    pub fn bot_cooldown(&self) -> Duration {
        Duration::from_millis(self.bot_cooldown_ms)
    }

    /// Global cooldown.
    #[must_use]
    pub fn global_cooldown(&self) -> Duration {
        Duration::from_millis(self.global_cooldown_ms)
    }
}

/// Sampling parameters and call limits for the generation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Maximum simultaneously in-flight generation calls.
    #[serde(default = "default_4_usize")]
    pub max_concurrent: usize,
    /// Hard timeout for a single call in milliseconds.
    #[serde(default = "default_15000")]
    pub timeout_ms: u64,
    /// Sampling temperature.
    #[serde(default = "default_0_8")]
    pub temperature: f32,
    /// Nucleus sampling threshold.
    #[serde(default = "default_0_9")]
    pub top_p: f32,
    /// Maximum tokens to generate.
    #[serde(default = "default_120")]
    pub max_tokens: u32,
    /// Frequency penalty.
    #[serde(default = "default_0_3")]
    pub frequency_penalty: f32,
    /// Presence penalty.
    #[serde(default = "default_0_3")]
    pub presence_penalty: f32,
    /// Stop sequences.
    #[serde(default)]
    pub stop: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            timeout_ms: 15_000,
            temperature: 0.8,
            top_p: 0.9,
            max_tokens: 120,
            frequency_penalty: 0.3,
            presence_penalty: 0.3,
            stop: Vec::new(),
        }
    }
}

impl GenerationConfig {
    /// Per-call timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Dispatch queue bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum outstanding jobs; further jobs are refused.
    #[serde(default = "default_50_usize")]
    pub max_size: usize,
    /// Jobs older than this are discarded unserviced.
    #[serde(default = "default_60000")]
    pub job_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 50,
            job_timeout_ms: 60_000,
        }
    }
}

impl QueueConfig {
    /// Job timeout.
    #[must_use]
    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }
}

/// Conversation memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Whether pair histories are recorded at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum tracked (sender, responder) pairs; 0 = unbounded.
    #[serde(default = "default_1000_usize")]
    pub max_pairs: usize,
    /// Maximum exchanges kept per pair.
    #[serde(default = "default_10_usize")]
    pub max_interactions_per_pair: usize,
    /// Entry time-to-live in seconds; 0 = no expiry.
    #[serde(default = "default_3600")]
    pub ttl_secs: u64,
    /// Maximum characters of rendered context.
    #[serde(default = "default_1200_usize")]
    pub max_context_length: usize,
    /// Interval between background sweeps in seconds.
    #[serde(default = "default_300")]
    pub sweep_interval_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_pairs: 1000,
            max_interactions_per_pair: 10,
            ttl_secs: 3600,
            max_context_length: 1200,
            sweep_interval_secs: 300,
        }
    }
}

impl MemoryConfig {
    /// Entry TTL, or `None` when entries never expire.
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }

    /// Sweep interval (never zero).
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Personality definitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonalityConfig {
    /// Path to the JSON personality document; `None` uses the built-in book.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Reply delivery timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Lower bound of the randomized reply delay.
    #[serde(default = "default_1500")]
    pub min_delay_ms: u64,
    /// Upper bound of the randomized reply delay.
    #[serde(default = "default_4000")]
    pub max_delay_ms: u64,
    /// How long a replying bot stays pacified after speaking.
    #[serde(default = "default_2500")]
    pub pacify_ms: u64,
    /// How long shutdown waits for in-flight work.
    #[serde(default = "default_5000")]
    pub shutdown_grace_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 1500,
            max_delay_ms: 4000,
            pacify_ms: 2500,
            shutdown_grace_ms: 5000,
        }
    }
}

impl DeliveryConfig {
    /// The delay band as `(min, max)`, with `max` never below `min`.
    #[must_use]
    pub fn delay_band(&self) -> (Duration, Duration) {
        let min = Duration::from_millis(self.min_delay_ms);
        let max = Duration::from_millis(self.max_delay_ms.max(self.min_delay_ms));
        (min, max)
    }

    /// Pacify window.
    #[must_use]
    pub fn pacify(&self) -> Duration {
        Duration::from_millis(self.pacify_ms)
    }

    /// Shutdown grace period.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }
fn default_endpoint_url() -> String { "http://127.0.0.1:11434/api/generate".to_string() }
fn default_model() -> String { "llama3.2:3b".to_string() }
fn default_secret_header() -> String { "X-Api-Secret".to_string() }
fn default_say_radius() -> f32 { 25.0 }
fn default_0_3() -> f32 { 0.3 }
fn default_0_8() -> f32 { 0.8 }
fn default_0_9() -> f32 { 0.9 }
fn default_1_0() -> f64 { 1.0 }
fn default_3_usize() -> usize { 3 }
fn default_4_usize() -> usize { 4 }
fn default_10_usize() -> usize { 10 }
fn default_50_usize() -> usize { 50 }
fn default_1000_usize() -> usize { 1000 }
fn default_1200_usize() -> usize { 1200 }
fn default_30() -> u32 { 30 }
fn default_120() -> u32 { 120 }
fn default_60() -> u64 { 60 }
fn default_300() -> u64 { 300 }
fn default_500() -> u64 { 500 }
fn default_1500() -> u64 { 1500 }
fn default_2500() -> u64 { 2500 }
fn default_3000() -> u64 { 3000 }
fn default_3600() -> u64 { 3600 }
fn default_4000() -> u64 { 4000 }
fn default_5000() -> u64 { 5000 }
fn default_15000() -> u64 { 15_000 }
fn default_60000() -> u64 { 60_000 }
