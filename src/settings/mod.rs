//! TOML-based settings for the query assistant.
//!
//! Settings are loaded from `~/.querypilot/settings.toml` with environment variable
//! interpolation support. Credentials fall back to `QUERYPILOT_API_KEY` and
//! `OPENAI_API_KEY` through the `get_with_env_fallback` helper.
//!
//! # Usage
//!
//! ```rust,ignore
//! use querypilot_lib::settings::{QueryMode, SettingsManager};
//!
//! let manager = SettingsManager::new().await?;
//! manager.set_mode(QueryMode::Ai).await?;
//! let config = manager.model_config().await;
//! ```

pub mod loader;
pub mod schema;

pub use loader::{get_with_env_fallback, settings_path, SettingsManager, CREDENTIAL_ENV_VARS};
pub use schema::{AssistantSettings, ModelConfig, QueryMode};
