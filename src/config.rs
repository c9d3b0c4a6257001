use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML config: {details}")]
    Parse { details: String },
    #[error("configuration invalid: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MatchingConfig {
    /// Minimum compatibility that reinforces the learning sink.
    #[serde(default = "default_learning_threshold")]
    pub learning_threshold: f64,
    #[serde(default = "default_learning_threshold")]
    pub group_learning_threshold: f64,
    #[serde(default = "default_location_weight")]
    pub location_weight: f64,
    #[serde(default = "default_timing_weight")]
    pub timing_weight: f64,
    /// Predictive modifier: weight of the location/timing presence flags.
    #[serde(default = "default_presence_weight")]
    pub presence_weight: f64,
    /// Predictive modifier: weight of the interest overlap ratio.
    #[serde(default = "default_interest_weight")]
    pub interest_weight: f64,
    /// Projected vectors with a smaller norm are left unnormalized.
    #[serde(default = "default_norm_epsilon")]
    pub norm_epsilon: f64,
    #[serde(default = "default_min_group_members")]
    pub min_group_members: usize,
    #[serde(default = "default_max_entities")]
    pub max_entities: usize,
    #[serde(default = "default_accessibility")]
    pub default_accessibility: f64,
    #[serde(default = "default_vibe_match")]
    pub default_vibe_match: f64,
    #[serde(default = "default_true")]
    pub predictive_enabled: bool,
    /// Online scoring writes converted states back to the offline cache.
    #[serde(default = "default_true")]
    pub refresh_cache: bool,
}

const fn default_learning_threshold() -> f64 {
    0.5
}

const fn default_location_weight() -> f64 {
    0.6
}

const fn default_timing_weight() -> f64 {
    0.4
}

const fn default_presence_weight() -> f64 {
    0.6
}

const fn default_interest_weight() -> f64 {
    0.4
}

const fn default_norm_epsilon() -> f64 {
    1e-4
}

const fn default_min_group_members() -> usize {
    2
}

const fn default_max_entities() -> usize {
    64
}

const fn default_accessibility() -> f64 {
    0.7
}

const fn default_vibe_match() -> f64 {
    0.5
}

const fn default_true() -> bool {
    true
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            learning_threshold: default_learning_threshold(),
            group_learning_threshold: default_learning_threshold(),
            location_weight: default_location_weight(),
            timing_weight: default_timing_weight(),
            presence_weight: default_presence_weight(),
            interest_weight: default_interest_weight(),
            norm_epsilon: default_norm_epsilon(),
            min_group_members: default_min_group_members(),
            max_entities: default_max_entities(),
            default_accessibility: default_accessibility(),
            default_vibe_match: default_vibe_match(),
            predictive_enabled: true,
            refresh_cache: true,
        }
    }
}

impl MatchingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = [
            ("learning-threshold", self.learning_threshold),
            ("group-learning-threshold", self.group_learning_threshold),
            ("location-weight", self.location_weight),
            ("timing-weight", self.timing_weight),
            ("presence-weight", self.presence_weight),
            ("interest-weight", self.interest_weight),
            ("default-accessibility", self.default_accessibility),
            ("default-vibe-match", self.default_vibe_match),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Validation(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if ((self.location_weight + self.timing_weight) - 1.0).abs() > 1e-9 {
            return Err(ConfigError::Validation(
                "location-weight and timing-weight must sum to 1".into(),
            ));
        }
        if ((self.presence_weight + self.interest_weight) - 1.0).abs() > 1e-9 {
            return Err(ConfigError::Validation(
                "presence-weight and interest-weight must sum to 1".into(),
            ));
        }
        if !(self.norm_epsilon.is_finite() && self.norm_epsilon > 0.0) {
            return Err(ConfigError::Validation(
                "norm-epsilon must be a positive number".into(),
            ));
        }
        if self.min_group_members < 2 {
            return Err(ConfigError::Validation(
                "min-group-members cannot be lower than 2".into(),
            ));
        }
        if self.max_entities == 0 {
            return Err(ConfigError::Validation(
                "max-entities must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: MatchingConfig = toml::from_str(contents).map_err(|err| ConfigError::Parse {
            details: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }
}

pub fn load_config(path: &Path) -> Result<MatchingConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    MatchingConfig::from_toml_str(&contents)
}
