//! Configuration types deserialized from `kiln.toml`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The top-level engine configuration parsed from `kiln.toml`.
///
/// Every section is optional; an empty file yields [`EngineConfig::default`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    /// Source selection and output naming.
    #[serde(default)]
    pub engine: EngineSection,
    /// Persistent cache settings.
    #[serde(default)]
    pub cache: CacheSection,
    /// Base options handed to every compilation unit.
    #[serde(default)]
    pub options: CompileOptions,
}

/// Which input files are entry points and how their outputs are named.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// Engine name; namespaces the default cache directory.
    #[serde(default = "default_name")]
    pub name: String,
    /// Extensions (without the dot) of files that are compiled.
    #[serde(default = "default_source_extensions")]
    pub source_extensions: Vec<String>,
    /// Extension given to each source's default output.
    #[serde(default = "default_output_extension")]
    pub output_extension: String,
    /// Never treat files whose name starts with `_` as entry points.
    #[serde(default = "default_true")]
    pub skip_partials: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            source_extensions: default_source_extensions(),
            output_extension: default_output_extension(),
            skip_partials: true,
        }
    }
}

/// Persistent cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// Whether the persistent cache is used at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cache directory; defaults to `<system temp>/kiln-cache/<engine name>`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Collaborator-supplied digest appended to every cache key.
    #[serde(default)]
    pub digest: Option<String>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            digest: None,
        }
    }
}

/// Immutable per-unit compile configuration.
///
/// The engine clones the base value for every compilation unit; a
/// transformation that fans one source out into several outputs hands each
/// unit its own adjusted copy through the builder methods.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOptions {
    /// Extra directories the transformation resolves imports against.
    #[serde(default)]
    pub include_paths: Vec<PathBuf>,
    /// Whether a source map should be produced alongside the output.
    #[serde(default)]
    pub source_map: bool,
    /// Transformation-specific named settings.
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

impl CompileOptions {
    /// Returns a copy with `path` appended to the include paths.
    pub fn with_include_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.include_paths.push(path.into());
        self
    }

    /// Returns a copy with source maps switched on or off.
    pub fn with_source_map(mut self, enabled: bool) -> Self {
        self.source_map = enabled;
        self
    }

    /// Returns a copy with the named setting set to `value`.
    pub fn with_setting(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(name.into(), value.into());
        self
    }

    /// Looks up a named setting.
    pub fn setting(&self, name: &str) -> Option<&str> {
        self.settings.get(name).map(String::as_str)
    }
}

impl EngineConfig {
    /// Resolves the persistent cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        match &self.cache.dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir()
                .join("kiln-cache")
                .join(&self.engine.name),
        }
    }

    /// Returns `true` if `extension` marks an entry-point source.
    pub fn is_source_extension(&self, extension: &str) -> bool {
        self.engine
            .source_extensions
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(extension))
    }
}

fn default_name() -> String {
    "default".to_string()
}

fn default_source_extensions() -> Vec<String> {
    vec!["scss".to_string(), "sass".to_string()]
}

fn default_output_extension() -> String {
    "css".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.engine.name, "default");
        assert_eq!(config.engine.output_extension, "css");
        assert!(config.engine.skip_partials);
        assert!(config.cache.enabled);
        assert!(config.cache.digest.is_none());
        assert_eq!(config.options, CompileOptions::default());
    }

    #[test]
    fn default_cache_dir_is_namespaced() {
        let mut config = EngineConfig::default();
        config.engine.name = "styles".to_string();
        assert!(config.cache_dir().ends_with("kiln-cache/styles"));
    }

    #[test]
    fn explicit_cache_dir_wins() {
        let mut config = EngineConfig::default();
        config.cache.dir = Some(PathBuf::from("/var/cache/kiln"));
        assert_eq!(config.cache_dir(), PathBuf::from("/var/cache/kiln"));
    }

    #[test]
    fn source_extension_match_ignores_case() {
        let config = EngineConfig::default();
        assert!(config.is_source_extension("SCSS"));
        assert!(!config.is_source_extension("css"));
    }

    #[test]
    fn builder_produces_independent_copies() {
        let base = CompileOptions::default().with_include_path("vendor");
        let mapped = base.clone().with_source_map(true).with_setting("precision", "5");
        assert!(!base.source_map);
        assert!(mapped.source_map);
        assert_eq!(mapped.setting("precision"), Some("5"));
        assert_eq!(base.setting("precision"), None);
        assert_eq!(mapped.include_paths, vec![PathBuf::from("vendor")]);
    }
}
