//! Configuration source loading and composition

use crate::validation::Validate;
use crate::{ApplicationConfig, ConfigResult};
use std::path::{Path, PathBuf};

/// A layer of configuration applied on top of the values below it
pub trait ConfigurationSource {
    /// Apply this source to `config`
    ///
    /// # Errors
    /// Returns configuration loading errors
    fn apply(&self, config: &mut ApplicationConfig) -> ConfigResult<()>;

    /// Get the name of this configuration source
    fn name(&self) -> &str;

    /// Get the priority of this source (higher number = higher priority)
    fn priority(&self) -> u8;
}

/// `TASKAUDIT_*` environment variables
pub struct EnvironmentSource;

impl ConfigurationSource for EnvironmentSource {
    fn apply(&self, config: &mut ApplicationConfig) -> ConfigResult<()> {
        config.apply_env_overrides();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "environment"
    }

    fn priority(&self) -> u8 {
        100 // Environment variables override everything
    }
}

/// TOML file; missing sections and fields keep their defaults
pub struct TomlFileSource {
    path: PathBuf,
    required: bool,
}

impl TomlFileSource {
    /// A file that must exist
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            required: true,
        }
    }

    /// A file that is skipped when absent
    pub fn optional<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            required: false,
        }
    }
}

impl ConfigurationSource for TomlFileSource {
    fn apply(&self, config: &mut ApplicationConfig) -> ConfigResult<()> {
        if !self.required && !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "Optional config file not found");
            return Ok(());
        }

        let content = std::fs::read_to_string(&self.path)?;
        *config = toml::from_str(&content)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "toml_file"
    }

    fn priority(&self) -> u8 {
        50 // Below env vars, above defaults
    }
}

type ConfigSources = Vec<Box<dyn ConfigurationSource>>;

/// Configuration loader that layers sources over the compiled-in defaults
pub struct ConfigurationLoader {
    sources: ConfigSources,
}

impl ConfigurationLoader {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Defaults, then the optional file, then environment overrides
    pub fn standard(config_file: Option<&Path>) -> Self {
        let loader = Self::new().add_source(Box::new(EnvironmentSource));
        match config_file {
            Some(path) => loader.add_source(Box::new(TomlFileSource::new(path))),
            None => loader.add_source(Box::new(TomlFileSource::optional("taskaudit.toml"))),
        }
    }

    #[must_use]
    pub fn add_source(mut self, source: Box<dyn ConfigurationSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Apply every source in priority order and validate the result
    ///
    /// # Errors
    /// Returns the first source failure or a validation error
    pub fn load(&self) -> ConfigResult<ApplicationConfig> {
        let mut config = ApplicationConfig::default();

        let mut sorted_sources = self.sources.iter().collect::<Vec<_>>();
        sorted_sources.sort_by_key(|source| source.priority());

        for source in sorted_sources {
            source.apply(&mut config).inspect_err(|e| {
                tracing::warn!("Failed to load from source {}: {}", source.name(), e);
            })?;
            tracing::debug!("Loaded configuration from source: {}", source.name());
        }

        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigurationLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[ingestion]\nchunk_size = 25\n\n[embedding]\nmodel = \"mini\"").unwrap();

        let config = ConfigurationLoader::new()
            .add_source(Box::new(TomlFileSource::new(file.path())))
            .load()
            .unwrap();

        assert_eq!(config.ingestion.chunk_size, 25);
        assert_eq!(config.ingestion.vector_batch_size, 50);
        assert_eq!(config.embedding.model, "mini");
        assert_eq!(config.database.port, 5432);
    }

    #[test]
    fn test_missing_optional_file_is_skipped() {
        let config = ConfigurationLoader::new()
            .add_source(Box::new(TomlFileSource::optional(
                "/definitely/not/here/taskaudit.toml",
            )))
            .load()
            .unwrap();
        assert_eq!(config.ingestion.chunk_size, 100);
    }

    #[test]
    fn test_missing_required_file_is_an_error() {
        let result = ConfigurationLoader::new()
            .add_source(Box::new(TomlFileSource::new("/definitely/not/here.toml")))
            .load();
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[ingestion]\nvector_batch_size = 0").unwrap();

        let result = ConfigurationLoader::new()
            .add_source(Box::new(TomlFileSource::new(file.path())))
            .load();
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[ingestion\nchunk_size = ").unwrap();

        let result = ConfigurationLoader::new()
            .add_source(Box::new(TomlFileSource::new(file.path())))
            .load();
        assert!(matches!(result, Err(crate::ConfigError::TomlParsing(_))));
    }
}
