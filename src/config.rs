//! Application-level configuration loading, including the rank-based phase duration table.

use std::{env, fs, io::ErrorKind, path::PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{info, warn};

use crate::state::durations::{
    DEFAULT_FALLBACK_TIER, DEFAULT_PHASE_DURATIONS, PhaseDurationTable, PhaseDurations,
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "WRITING_ARENA_CONFIG_PATH";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    durations: PhaseDurationTable,
    auto_advance: bool,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        tiers = app_config.durations.tiers().count(),
                        auto_advance = app_config.auto_advance,
                        "loaded phase durations from config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a configuration document.
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let raw = serde_json::from_str::<RawConfig>(contents)?;
        raw.try_into()
    }

    /// Rank-to-duration table used when entering a phase.
    pub fn durations(&self) -> &PhaseDurationTable {
        &self.durations
    }

    /// Whether the server checks for a transition after each submission.
    pub fn auto_advance(&self) -> bool {
        self.auto_advance
    }

    /// Builder-style override used by tests and embedders.
    pub fn with_auto_advance(mut self, auto_advance: bool) -> Self {
        self.auto_advance = auto_advance;
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            durations: PhaseDurationTable::default(),
            auto_advance: true,
        }
    }
}

/// Errors raised while interpreting the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file is not valid JSON for the expected shape.
    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),
    /// Zero durations, or a fallback tier missing from the table.
    #[error(
        "invalid phase duration table: every duration must be positive and the fallback tier `{0}` must be listed"
    )]
    InvalidDurations(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(default)]
    phase_durations: Option<RawDurations>,
    #[serde(default = "default_auto_advance")]
    auto_advance: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
/// JSON representation of the phase duration table.
struct RawDurations {
    #[serde(default = "default_durations")]
    defaults: PhaseDurations,
    #[serde(default = "default_fallback_tier")]
    fallback_tier: String,
    tiers: IndexMap<String, PhaseDurations>,
}

impl TryFrom<RawConfig> for AppConfig {
    type Error = ConfigError;

    fn try_from(value: RawConfig) -> Result<Self, Self::Error> {
        let durations = match value.phase_durations {
            Some(raw) => {
                PhaseDurationTable::new(raw.defaults, raw.fallback_tier.clone(), raw.tiers)
                    .ok_or(ConfigError::InvalidDurations(raw.fallback_tier))?
            }
            None => PhaseDurationTable::default(),
        };

        Ok(Self {
            durations,
            auto_advance: value.auto_advance,
        })
    }
}

fn default_auto_advance() -> bool {
    true
}

fn default_durations() -> PhaseDurations {
    DEFAULT_PHASE_DURATIONS
}

fn default_fallback_tier() -> String {
    DEFAULT_FALLBACK_TIER.to_owned()
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::Phase;

    #[test]
    fn empty_document_uses_defaults() {
        let config = AppConfig::from_json("{}").unwrap();
        assert!(config.auto_advance());
        assert_eq!(config.durations(), &PhaseDurationTable::default());
    }

    #[test]
    fn custom_tiers_replace_the_builtin_table() {
        let config = AppConfig::from_json(
            r#"{
                "auto_advance": false,
                "phase_durations": {
                    "fallback_tier": "Gold",
                    "tiers": {
                        "Gold": [300, 180, 240],
                        "Diamond": [420, 200, 300]
                    }
                }
            }"#,
        )
        .unwrap();

        assert!(!config.auto_advance());
        let table = config.durations();
        assert_eq!(table.duration_for(Some("Diamond I"), Phase::Writing), 420);
        assert_eq!(table.duration_for(Some("Bronze I"), Phase::Writing), 300);
        assert_eq!(table.duration_for(None, Phase::Revision), 240);
    }

    #[test]
    fn zero_duration_is_rejected() {
        let err = AppConfig::from_json(
            r#"{"phase_durations": {"tiers": {"Silver": [0, 180, 180]}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDurations(tier) if tier == "Silver"));
    }

    #[test]
    fn fallback_tier_must_be_listed() {
        let err = AppConfig::from_json(r#"{"phase_durations": {"tiers": {"Gold": [1, 1, 1]}}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDurations(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            AppConfig::from_json(r#"{"colors": []}"#),
            Err(ConfigError::Json(_))
        ));
    }
}
