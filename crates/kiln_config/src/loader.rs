//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::EngineConfig;
use std::path::Path;

/// Name of the configuration file looked up in a project directory.
pub const CONFIG_FILE: &str = "kiln.toml";

/// Loads and validates `kiln.toml` from a project directory.
///
/// A missing file is not an error: the defaults are returned instead.
pub fn load_config(project_dir: &Path) -> Result<EngineConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE);
    match std::fs::read_to_string(&config_path) {
        Ok(content) => load_config_from_str(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EngineConfig::default()),
        Err(source) => Err(ConfigError::Read {
            path: config_path,
            source,
        }),
    }
}

/// Parses and validates a `kiln.toml` configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = toml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.engine.name.trim().is_empty() {
        return Err(ConfigError::MissingField("engine.name"));
    }
    if config.engine.output_extension.trim().is_empty() {
        return Err(ConfigError::MissingField("engine.output_extension"));
    }
    if config.engine.output_extension.starts_with('.') {
        return Err(ConfigError::Invalid {
            field: "engine.output_extension",
            reason: "must not start with '.'",
        });
    }
    if config
        .engine
        .source_extensions
        .iter()
        .any(|ext| ext.trim().is_empty())
    {
        return Err(ConfigError::Invalid {
            field: "engine.source_extensions",
            reason: "contains an empty entry",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn parse_empty_config() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.engine.output_extension, "css");
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[engine]
name = "styles"
source_extensions = ["src"]
output_extension = "out"
skip_partials = false

[cache]
enabled = false
dir = "/var/cache/kiln"
digest = "theme-v3"

[options]
include_paths = ["vendor", "node_modules"]
source_map = true

[options.settings]
precision = "5"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.engine.name, "styles");
        assert_eq!(config.engine.source_extensions, vec!["src"]);
        assert_eq!(config.engine.output_extension, "out");
        assert!(!config.engine.skip_partials);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.dir, Some(PathBuf::from("/var/cache/kiln")));
        assert_eq!(config.cache.digest.as_deref(), Some("theme-v3"));
        assert_eq!(config.options.include_paths.len(), 2);
        assert!(config.options.source_map);
        assert_eq!(config.options.setting("precision"), Some("5"));
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        let err = load_config_from_str("[engine\nname = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn empty_output_extension_rejected() {
        let err = load_config_from_str("[engine]\noutput_extension = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn dotted_output_extension_rejected() {
        let err = load_config_from_str("[engine]\noutput_extension = \".css\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn empty_source_extension_rejected() {
        let err =
            load_config_from_str("[engine]\nsource_extensions = [\"scss\", \"\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.engine.name, "default");
    }

    #[test]
    fn loads_file_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[engine]\nname = \"site\"\n",
        )
        .unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.engine.name, "site");
    }
}
