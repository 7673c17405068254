//! Engine configuration.
//!
//! Immutable after construction; share one instance behind an `Arc` across
//! every component of an engine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceConfig {
    /// L2 distance cutoff for a positive match (lower = stricter).
    #[serde(default = "default_recognition_threshold")]
    pub recognition_threshold: f32,

    /// Samples needed before an enrollment can be finalized.
    #[serde(default = "default_required_enrollment_samples")]
    pub required_enrollment_samples: usize,

    /// Minimum face bounding-box side, in pixels.
    #[serde(default = "default_min_face_size")]
    pub min_face_size: u32,

    /// Maximum head roll (estimated from the eye line), in degrees.
    #[serde(default = "default_max_roll_angle")]
    pub max_roll_angle: f32,

    /// Maximum L2 distance between consecutive enrollment samples.
    #[serde(default = "default_consistency_bound")]
    pub consistency_bound: f32,

    /// Embedding dimensionality produced by the deployed model.
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Format tag written into every exported record.
    #[serde(default = "default_format_version")]
    pub format_version: String,
}

fn default_recognition_threshold() -> f32 {
    1.0
}

fn default_required_enrollment_samples() -> usize {
    5
}

fn default_min_face_size() -> u32 {
    80
}

fn default_max_roll_angle() -> f32 {
    20.0
}

fn default_consistency_bound() -> f32 {
    0.9
}

fn default_embedding_dim() -> usize {
    192
}

fn default_format_version() -> String {
    "1".to_string()
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            recognition_threshold: default_recognition_threshold(),
            required_enrollment_samples: default_required_enrollment_samples(),
            min_face_size: default_min_face_size(),
            max_roll_angle: default_max_roll_angle(),
            consistency_bound: default_consistency_bound(),
            embedding_dim: default_embedding_dim(),
            format_version: default_format_version(),
        }
    }
}

impl FaceConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let config: FaceConfig = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&src)?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `FACEID_*` environment overrides. Unparsable values are ignored.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (environment-shaped keys).
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        override_parsed(&lookup, "FACEID_RECOGNITION_THRESHOLD", &mut self.recognition_threshold);
        override_parsed(&lookup, "FACEID_REQUIRED_SAMPLES", &mut self.required_enrollment_samples);
        override_parsed(&lookup, "FACEID_MIN_FACE_SIZE", &mut self.min_face_size);
        override_parsed(&lookup, "FACEID_MAX_ROLL_ANGLE", &mut self.max_roll_angle);
        override_parsed(&lookup, "FACEID_CONSISTENCY_BOUND", &mut self.consistency_bound);
        override_parsed(&lookup, "FACEID_EMBEDDING_DIM", &mut self.embedding_dim);
        if let Some(v) = lookup("FACEID_FORMAT_VERSION") {
            self.format_version = v;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.recognition_threshold.is_finite() && self.recognition_threshold > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "recognition_threshold must be a positive number, got {}",
                self.recognition_threshold
            )));
        }
        if !(self.consistency_bound.is_finite() && self.consistency_bound > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "consistency_bound must be a positive number, got {}",
                self.consistency_bound
            )));
        }
        if self.required_enrollment_samples == 0 {
            return Err(ConfigError::Invalid(
                "required_enrollment_samples must be at least 1".into(),
            ));
        }
        if self.embedding_dim == 0 {
            return Err(ConfigError::Invalid("embedding_dim must be at least 1".into()));
        }
        if !(self.max_roll_angle.is_finite() && self.max_roll_angle >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "max_roll_angle must be a non-negative number of degrees, got {}",
                self.max_roll_angle
            )));
        }
        if self.format_version.trim().is_empty() {
            return Err(ConfigError::Invalid("format_version must not be empty".into()));
        }
        Ok(())
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key).map(|v| v.trim().parse::<T>()) {
        Some(Ok(v)) => *slot = v,
        Some(Err(_)) => tracing::warn!(key, "ignoring unparsable config override"),
        None => {}
    }
}
