//! Settings schema for the query assistant.
//!
//! All settings structs use `#[serde(default)]` to allow partial configuration files.
//! Missing fields are filled with defaults and out-of-range numbers are clamped by
//! [`ModelConfig::sanitize`].

use serde::{Deserialize, Serialize};

/// Allowed sampling temperature range.
pub const TEMPERATURE_RANGE: (f32, f32) = (0.0, 1.0);
/// Allowed completion token budget range.
pub const MAX_TOKENS_RANGE: (u32, u32) = (256, 8192);
/// Maximum number of automatic repair attempts.
pub const MAX_RETRY_LIMIT: u32 = 5;

/// Root settings structure.
///
/// Loaded from `~/.querypilot/settings.toml` with environment variable interpolation support.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantSettings {
    /// Schema version for migrations
    pub version: u32,

    /// Whether queries are written by the assistant or by hand
    pub mode: QueryMode,

    /// Generative model connection
    pub model: ModelConfig,
}

/// Editing mode of the query workspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Natural-language prompts are turned into queries.
    Ai,
    /// Queries are typed directly.
    #[default]
    Expert,
}

impl std::fmt::Display for QueryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryMode::Ai => write!(f, "ai"),
            QueryMode::Expert => write!(f, "expert"),
        }
    }
}

impl std::str::FromStr for QueryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ai" => Ok(QueryMode::Ai),
            "expert" => Ok(QueryMode::Expert),
            other => Err(format!("unknown mode '{}', expected 'ai' or 'expert'", other)),
        }
    }
}

/// Connection and sampling settings of the generative model.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Provider label, e.g. "openai-compatible"
    pub provider: String,

    /// Base URL of the chat completions API (supports $ENV_VAR syntax)
    pub endpoint: String,

    /// API key (supports $ENV_VAR syntax)
    pub credential: String,

    /// Model identifier sent with each request
    pub model_name: String,

    /// Sampling temperature (0.0 - 1.0)
    pub temperature: f32,

    /// Completion token budget (256 - 8192)
    pub max_tokens: u32,

    /// Automatic repair attempts after a failed execution (0 - 5)
    pub retry_limit: u32,
}

impl ModelConfig {
    /// Clamp numeric fields into their allowed ranges.
    pub fn sanitize(mut self) -> Self {
        let defaults = Self::default();
        self.temperature = if self.temperature.is_finite() {
            self.temperature.clamp(TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1)
        } else {
            defaults.temperature
        };
        self.max_tokens = self.max_tokens.clamp(MAX_TOKENS_RANGE.0, MAX_TOKENS_RANGE.1);
        self.retry_limit = self.retry_limit.min(MAX_RETRY_LIMIT);
        self
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let credential = if self.credential.is_empty() {
            "<empty>"
        } else {
            "<redacted>"
        };
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("credential", &credential)
            .field("model_name", &self.model_name)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("retry_limit", &self.retry_limit)
            .finish()
    }
}

// =============================================================================
// Default implementations
// =============================================================================

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            version: 1,
            mode: QueryMode::default(),
            model: ModelConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai-compatible".to_string(),
            endpoint: String::new(),
            credential: String::new(),
            model_name: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            max_tokens: 2048,
            retry_limit: 2,
        }
    }
}
