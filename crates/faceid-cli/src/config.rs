use faceid_core::{ConfigError, FaceConfig};
use std::path::PathBuf;

/// CLI settings, loaded from environment variables.
pub struct Settings {
    /// Optional TOML file with engine configuration (`FACEID_CONFIG`).
    pub config_path: Option<PathBuf>,
    /// JSON gallery of enrolled identities (`FACEID_GALLERY`).
    pub gallery_path: PathBuf,
}

impl Settings {
    /// Load settings from `FACEID_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("faceid");

        let gallery_path = std::env::var("FACEID_GALLERY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("gallery.json"));

        Self {
            config_path: std::env::var("FACEID_CONFIG").ok().map(PathBuf::from),
            gallery_path,
        }
    }

    /// Engine configuration: config file (if any), then environment overrides.
    pub fn face_config(&self) -> Result<FaceConfig, ConfigError> {
        let base = match &self.config_path {
            Some(path) => FaceConfig::load(path)?,
            None => FaceConfig::default(),
        };
        let config = base.with_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
