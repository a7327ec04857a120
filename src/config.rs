//! Configuration for the file service.
//!
//! [`GhostConfig`] is loaded from a TOML file and then overridden from the
//! environment. Every field has a default suitable for a single-node setup
//! using the disk driver:
//!
//! ```toml
//! project_dir = "."
//! use_db_driver = false
//! database_path = "data/storage.sqlite"
//! max_file_size = 20971520
//! max_model_file_size = 524288000
//! model_extension = ".model"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants;
use crate::ghost::FileLimits;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings that should be logged but don't prevent operation.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if there are any warnings.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Process-wide file service settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GhostConfig {
    /// Root the disk driver resolves relative paths against.
    #[serde(default = "default_project_dir")]
    pub project_dir: PathBuf,
    /// Default driver choice for scopes built by the registry.
    #[serde(default)]
    pub use_db_driver: bool,
    /// SQLite database file, relative to `project_dir` unless absolute.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Ceiling for regular files, in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Ceiling for files ending in `model_extension`, in bytes.
    #[serde(default = "default_max_model_file_size")]
    pub max_model_file_size: u64,
    #[serde(default = "default_model_extension")]
    pub model_extension: String,
    /// Upper bound on cached entries; unbounded when absent.
    #[serde(default)]
    pub cache_max_entries: Option<u64>,
}

fn default_project_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_database_path() -> PathBuf {
    PathBuf::from(constants::DEFAULT_DATABASE_PATH)
}

fn default_max_file_size() -> u64 {
    constants::DEFAULT_MAX_FILE_SIZE
}

fn default_max_model_file_size() -> u64 {
    constants::DEFAULT_MAX_MODEL_FILE_SIZE
}

fn default_model_extension() -> String {
    constants::DEFAULT_MODEL_EXTENSION.to_string()
}

impl Default for GhostConfig {
    fn default() -> Self {
        Self {
            project_dir: default_project_dir(),
            use_db_driver: false,
            database_path: default_database_path(),
            max_file_size: default_max_file_size(),
            max_model_file_size: default_max_model_file_size(),
            model_extension: default_model_extension(),
            cache_max_entries: None,
        }
    }
}

impl GhostConfig {
    /// Load configuration from the specified TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read (IO error)
    /// - The file contains invalid TOML syntax
    /// - A field has an invalid type or is unknown
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: GhostConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply `GHOST_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an override is set but cannot be parsed.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if an override is set but cannot be parsed.
    pub fn apply_env_with(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(dir) = get("GHOST_PROJECT_DIR") {
            self.project_dir = PathBuf::from(dir);
        }
        if let Some(flag) = get("GHOST_USE_DB_DRIVER") {
            self.use_db_driver = parse_bool(&flag)
                .with_context(|| format!("Invalid GHOST_USE_DB_DRIVER: {flag}"))?;
        }
        if let Some(path) = get("GHOST_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(size) = get("GHOST_MAX_FILE_SIZE") {
            self.max_file_size = size
                .parse()
                .with_context(|| format!("Invalid GHOST_MAX_FILE_SIZE: {size}"))?;
        }
        if let Some(size) = get("GHOST_MAX_MODEL_FILE_SIZE") {
            self.max_model_file_size = size
                .parse()
                .with_context(|| format!("Invalid GHOST_MAX_MODEL_FILE_SIZE: {size}"))?;
        }

        Ok(self)
    }

    /// Absolute-or-project-relative location of the SQLite file.
    pub fn resolved_database_path(&self) -> PathBuf {
        if self.database_path.is_absolute() {
            self.database_path.clone()
        } else {
            self.project_dir.join(&self.database_path)
        }
    }

    /// Size ceilings handed to every scope.
    pub fn file_limits(&self) -> FileLimits {
        FileLimits {
            max_file_size: self.max_file_size,
            max_model_file_size: self.max_model_file_size,
            model_extension: self.model_extension.clone(),
        }
    }

    /// Validate configuration.
    ///
    /// Returns a `ValidationResult` containing any non-fatal warnings.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A size ceiling is 0
    /// - The model ceiling is lower than the regular ceiling
    /// - The model extension does not start with `.`
    pub fn validate(&self) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.max_file_size == 0 {
            errors.push("max_file_size cannot be 0".to_string());
        }
        if self.max_model_file_size == 0 {
            errors.push("max_model_file_size cannot be 0".to_string());
        }
        if self.max_model_file_size < self.max_file_size {
            errors.push(format!(
                "max_model_file_size ({}) must be >= max_file_size ({})",
                self.max_model_file_size, self.max_file_size
            ));
        }
        if !self.model_extension.starts_with('.') || self.model_extension.len() < 2 {
            errors.push(format!(
                "model_extension must look like '.model' (got: '{}')",
                self.model_extension
            ));
        }

        if self.cache_max_entries == Some(0) {
            warnings.push(
                "cache_max_entries is 0, every read will go to the storage driver".to_string(),
            );
        }
        if !self.project_dir.exists() {
            warnings.push(format!(
                "Project directory does not exist yet: {}",
                self.project_dir.display()
            ));
        }

        if !errors.is_empty() {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }

        Ok(ValidationResult { warnings })
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("expected a boolean"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let config: GhostConfig = toml::from_str("").unwrap();
        assert_eq!(config.project_dir, PathBuf::from("."));
        assert!(!config.use_db_driver);
        assert_eq!(config.max_file_size, constants::DEFAULT_MAX_FILE_SIZE);
        assert_eq!(config.model_extension, ".model");
        assert!(config.cache_max_entries.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
project_dir = "/srv/bots"
use_db_driver = true
database_path = "/var/lib/ghost.sqlite"
max_file_size = 1024
max_model_file_size = 4096
model_extension = ".bin"
cache_max_entries = 500
"#;
        let config: GhostConfig = toml::from_str(toml_str).unwrap();
        assert!(config.use_db_driver);
        assert_eq!(config.max_file_size, 1024);
        assert_eq!(config.max_model_file_size, 4096);
        assert_eq!(config.model_extension, ".bin");
        assert_eq!(config.cache_max_entries, Some(500));
        assert_eq!(
            config.resolved_database_path(),
            PathBuf::from("/var/lib/ghost.sqlite")
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: std::result::Result<GhostConfig, _> = toml::from_str("max_size = 3");
        assert!(result.is_err());
    }

    #[test]
    fn test_relative_database_path_resolves_under_project() {
        let config = GhostConfig {
            project_dir: PathBuf::from("/srv/bots"),
            ..GhostConfig::default()
        };
        assert_eq!(
            config.resolved_database_path(),
            PathBuf::from("/srv/bots/data/storage.sqlite")
        );
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("GHOST_USE_DB_DRIVER", "true"),
            ("GHOST_MAX_FILE_SIZE", "2048"),
            ("GHOST_PROJECT_DIR", ""),
        ]
        .into_iter()
        .collect();

        let config = GhostConfig::default()
            .apply_env_with(|key| vars.get(key).map(|v| (*v).to_string()))
            .unwrap();

        assert!(config.use_db_driver);
        assert_eq!(config.max_file_size, 2048);
        // Empty values are ignored
        assert_eq!(config.project_dir, PathBuf::from("."));
    }

    #[test]
    fn test_env_override_invalid_number() {
        let result = GhostConfig::default().apply_env_with(|key| {
            (key == "GHOST_MAX_FILE_SIZE").then(|| "lots".to_string())
        });
        let err = result.unwrap_err().to_string();
        assert!(err.contains("GHOST_MAX_FILE_SIZE"));
    }

    #[test]
    fn test_validate_defaults() {
        assert!(GhostConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_model_limit_below_regular() {
        let config = GhostConfig {
            max_file_size: 100,
            max_model_file_size: 10,
            ..GhostConfig::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("max_model_file_size"));
    }

    #[test]
    fn test_validate_bad_extension() {
        let config = GhostConfig {
            model_extension: "model".to_string(),
            ..GhostConfig::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("model_extension"));
    }

    #[test]
    fn test_validate_zero_cache_warns() {
        let config = GhostConfig {
            cache_max_entries: Some(0),
            ..GhostConfig::default()
        };
        let result = config.validate().unwrap();
        assert!(result.has_warnings());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ghost.toml");
        std::fs::write(&path, "use_db_driver = true\n").unwrap();

        let config = GhostConfig::load_from(&path).unwrap();
        assert!(config.use_db_driver);
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = GhostConfig::load_from("/nonexistent/ghost.toml")
            .unwrap_err()
            .to_string();
        assert!(err.contains("Failed to read config file"));
    }
}
