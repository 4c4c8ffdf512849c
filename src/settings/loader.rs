//! Settings loading, saving, and environment variable interpolation.
//!
//! The `SettingsManager` handles:
//! - Loading settings from `~/.querypilot/settings.toml`
//! - Resolving `$VAR` and `${VAR}` environment variable references
//! - Atomic file writes with temp file + rename
//! - First-run template generation

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::RwLock;

use super::schema::{AssistantSettings, ModelConfig, QueryMode};

/// Embedded template for first-run generation.
const TEMPLATE: &str = include_str!("template.toml");

/// Environment variables consulted when no credential is configured.
pub const CREDENTIAL_ENV_VARS: &[&str] = &["QUERYPILOT_API_KEY", "OPENAI_API_KEY"];

/// Get the path to the global settings file.
pub fn settings_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".querypilot")
        .join("settings.toml")
}

/// Manages settings loading, interpolation, and persistence.
///
/// The cache holds settings as written by the user; `$VAR` references are
/// resolved on read so secrets from the environment never reach the file.
pub struct SettingsManager {
    settings: RwLock<AssistantSettings>,
    path: PathBuf,
}

impl SettingsManager {
    /// Create a new SettingsManager, loading from disk if available.
    pub async fn new() -> Result<Self> {
        Self::with_path(settings_path()).await
    }

    /// Create a SettingsManager backed by a specific file.
    pub async fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = Self::load_from_path(&path).await?;
        Ok(Self {
            settings: RwLock::new(settings),
            path,
        })
    }

    /// In-memory manager for tests and embedding; writes go to `path`.
    pub fn from_settings(settings: AssistantSettings, path: impl Into<PathBuf>) -> Self {
        Self {
            settings: RwLock::new(settings),
            path: path.into(),
        }
    }

    /// Load settings from a specific path. An unreadable or corrupt file falls
    /// back to defaults.
    async fn load_from_path(path: &Path) -> Result<AssistantSettings> {
        if !path.exists() {
            tracing::debug!("Settings file not found at {:?}, using defaults", path);
            return Ok(AssistantSettings::default());
        }

        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!("Unreadable settings at {:?}, using defaults: {}", path, e);
                return Ok(AssistantSettings::default());
            }
        };

        let mut settings: AssistantSettings = match toml::from_str(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Invalid settings at {:?}, using defaults: {}", path, e);
                return Ok(AssistantSettings::default());
            }
        };
        settings.model = settings.model.sanitize();

        tracing::info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Resolve $ENV_VAR references in string fields.
    fn resolve_env_vars(settings: &mut AssistantSettings) {
        fn resolve(value: &mut String) {
            if let Some(resolved) = resolve_env_ref(value) {
                *value = resolved;
            }
        }

        resolve(&mut settings.model.endpoint);
        resolve(&mut settings.model.credential);
    }

    /// Get the current settings with environment references resolved.
    pub async fn get(&self) -> AssistantSettings {
        let mut settings = self.settings.read().await.clone();
        Self::resolve_env_vars(&mut settings);
        settings
    }

    pub async fn mode(&self) -> QueryMode {
        self.settings.read().await.mode
    }

    /// Model config ready for use: references resolved, credential falling
    /// back to the environment.
    pub async fn model_config(&self) -> ModelConfig {
        let mut config = self.get().await.model;
        let configured = Some(config.credential.clone());
        config.credential =
            get_with_env_fallback(&configured, CREDENTIAL_ENV_VARS, None).unwrap_or_default();
        config
    }

    /// Replace all settings and persist to disk.
    pub async fn update(&self, mut new_settings: AssistantSettings) -> Result<()> {
        new_settings.model = new_settings.model.sanitize();
        *self.settings.write().await = new_settings.clone();
        self.save(&new_settings).await
    }

    /// Switch the query mode and persist.
    pub async fn set_mode(&self, mode: QueryMode) -> Result<()> {
        let mut settings = self.settings.read().await.clone();
        settings.mode = mode;
        self.update(settings).await
    }

    /// Replace the model config and persist. Values are clamped first.
    pub async fn set_model_config(&self, config: ModelConfig) -> Result<()> {
        let mut settings = self.settings.read().await.clone();
        settings.model = config;
        self.update(settings).await
    }

    /// Set the repair budget (clamped to the allowed range) and persist.
    pub async fn set_retry_limit(&self, retry_limit: u32) -> Result<u32> {
        let mut settings = self.settings.read().await.clone();
        settings.model.retry_limit = retry_limit;
        self.update(settings).await?;
        Ok(self.settings.read().await.model.retry_limit)
    }

    async fn save(&self, settings: &AssistantSettings) -> Result<()> {
        let toml_string =
            toml::to_string_pretty(settings).context("Failed to serialize settings")?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Atomic write: write to temp file, then rename
        let temp_path = self.path.with_extension("toml.tmp");
        tokio::fs::write(&temp_path, &toml_string).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        tracing::info!("Saved settings to {:?}", self.path);
        Ok(())
    }

    /// Reset to defaults and persist.
    pub async fn reset(&self) -> Result<()> {
        self.update(AssistantSettings::default()).await
    }

    /// Check if settings file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Get the settings file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ensure settings file exists, creating from template if needed.
    ///
    /// Returns `true` if a new file was created.
    pub async fn ensure_settings_file(&self) -> Result<bool> {
        if self.path.exists() {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&self.path, TEMPLATE).await?;
        tracing::info!("Generated settings template at {:?}", self.path);
        Ok(true)
    }

    /// Reload settings from disk.
    pub async fn reload(&self) -> Result<()> {
        let settings = Self::load_from_path(&self.path).await?;
        *self.settings.write().await = settings;
        Ok(())
    }
}

/// Resolve a $ENV_VAR or ${ENV_VAR} reference.
///
/// Returns `Some(resolved)` if the value starts with `$` and the env var exists.
/// Returns `None` if no env var reference or env var not set.
fn resolve_env_ref(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let reference = trimmed.strip_prefix('$')?;

    let var_name = reference
        .strip_prefix('{')
        .and_then(|inner| inner.strip_suffix('}'))
        .unwrap_or(reference);

    std::env::var(var_name).ok()
}

/// Get a setting value with environment variable fallback.
///
/// Priority order:
/// 1. Settings value (if set and non-empty)
/// 2. Environment variable (first match from list)
/// 3. Default value
pub fn get_with_env_fallback(
    setting: &Option<String>,
    env_vars: &[&str],
    default: Option<String>,
) -> Option<String> {
    if let Some(v) = setting {
        if !v.trim().is_empty() {
            return Some(v.clone());
        }
    }

    for env_var in env_vars {
        if let Ok(v) = std::env::var(env_var) {
            if !v.is_empty() {
                return Some(v);
            }
        }
    }

    default
}
