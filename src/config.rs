use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::category::Granularity;
use crate::consolidate::AccuracyPolicy;
use crate::reduce::MIN_ELAPSED_SECS;

/// Application configuration loaded from TOML config file.
/// All fields have defaults; the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Directory input file names are resolved against.
    pub input_dir: Option<PathBuf>,
    /// Directory output tables are written to.
    pub output_dir: Option<PathBuf>,
    /// Category granularity for every step of a run.
    pub granularity: Granularity,
    /// Vote reduction settings.
    pub reduce: ReduceConfig,
    /// Consolidation settings.
    pub consolidate: ConsolidateConfig,
}

/// Vote reduction configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ReduceConfig {
    /// Minimum volunteer accuracy, percent (0–100).
    pub accuracy_cut: u32,
    /// Classifications at or below this many seconds are not counted.
    pub min_elapsed_secs: f64,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            accuracy_cut: 0,
            min_elapsed_secs: MIN_ELAPSED_SECS,
        }
    }
}

/// Consolidation configuration.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ConsolidateConfig {
    /// Minimum votes per subject. 0 disables the cut.
    pub retirement_limit: u32,
    /// Minimum agreement fraction (0.0–1.0).
    pub agreement_cut: f64,
    /// Accuracy flag written when consensus, model, or truth is unknown.
    pub unknown_accuracy: AccuracyPolicy,
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("accuracy cut must be a percent between 0 and 100, got {0}")]
    AccuracyCut(u32),
    #[error("agreement cut must be between 0.0 and 1.0, got {0}")]
    AgreementCut(f64),
    #[error("minimum elapsed time must be a non-negative number of seconds, got {0}")]
    MinElapsed(f64),
}

/// Accuracy cut as a fraction.
pub fn accuracy_fraction(percent: u32) -> Result<f64, ConfigError> {
    if percent > 100 {
        return Err(ConfigError::AccuracyCut(percent));
    }
    Ok(percent as f64 / 100.0)
}

pub fn validate_agreement_cut(cut: f64) -> Result<f64, ConfigError> {
    if cut.is_finite() && (0.0..=1.0).contains(&cut) {
        Ok(cut)
    } else {
        Err(ConfigError::AgreementCut(cut))
    }
}

pub fn validate_min_elapsed(secs: f64) -> Result<f64, ConfigError> {
    if secs.is_finite() && secs >= 0.0 {
        Ok(secs)
    } else {
        Err(ConfigError::MinElapsed(secs))
    }
}

impl AppConfig {
    /// Load config from `~/.config/ntn-consensus/config.toml`.
    /// Returns default config if file doesn't exist.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from an explicit path.
    /// Logs a warning and falls back to defaults if the file can't be read or parsed.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    /// Input directory, defaulting to the working directory.
    pub fn input_dir(&self) -> PathBuf {
        self.input_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Output directory, defaulting to the working directory.
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
