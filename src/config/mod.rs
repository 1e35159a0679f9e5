//! Configuration handling
//!
//! Parses divide.toml: one `[[plugin]]` table per splitting pass, plus
//! optional `[html]`, `[output]` and `[runtime]` tables.

mod schema;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::loader::{RenderOptions, RuntimeGlobals};
use crate::plugins::{DividePlugin, HtmlOptions, PluginManager};

pub use schema::*;

/// Default config file name
pub const CONFIG_FILE: &str = "divide.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Splitting passes, run in order
    #[serde(rename = "plugin")]
    pub plugins: Vec<DivideOptions>,

    /// Chunk filter of the generated page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<HtmlOptions>,

    pub output: OutputOptions,

    pub runtime: RuntimeGlobals,

    /// Directory containing the config file
    #[serde(skip)]
    pub root: PathBuf,
}

impl Config {
    /// Load configuration from a file path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let canonical_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        let content = fs::read_to_string(&canonical_path)
            .with_context(|| format!("Failed to read config file: {}", canonical_path.display()))?;

        let mut config = Self::parse(&content)
            .with_context(|| format!("Failed to parse {}", canonical_path.display()))?;

        config.root = canonical_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        debug!("Loaded {} plugin tables from {}", config.plugins.len(), canonical_path.display());

        Ok(config)
    }

    /// Parse configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Load `path` if it exists, the built-in defaults otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No config at {}, using defaults", path.display());
            Ok(Self::default_config())
        }
    }

    /// Create a default configuration: one asynchronous pass in three groups
    pub fn default_config() -> Self {
        Self {
            plugins: vec![DivideOptions {
                divide: Some(NumberLike::Int(3)),
                ..DivideOptions::default()
            }],
            root: PathBuf::from("."),
            ..Self::default()
        }
    }

    /// One plugin instance per `[[plugin]]` table
    pub fn plugin_manager(&self) -> PluginManager {
        let mut manager = PluginManager::new();
        for options in &self.plugins {
            manager.register(Arc::new(DividePlugin::new(options.policy())));
        }
        manager
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            pathinfo: self.output.pathinfo,
            globals: self.runtime.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::split::SplitMode;
    use std::io::Write;

    #[test]
    fn test_parse_plugin_tables() {
        let config = Config::parse(
            r#"
[[plugin]]
divide = 3
chunks = "app"

[[plugin]]
size = "100"
async = false
chunks = ["login", "admin-*"]
exclude_chunks = ["admin-legacy"]

[html]
chunks = ["login"]

[output]
pathinfo = true
"#,
        )
        .unwrap();

        assert_eq!(config.plugins.len(), 2);
        assert_eq!(config.plugins[0].policy().mode, SplitMode::Count(3));
        assert!(config.plugins[0].asynchronous);

        let second = config.plugins[1].policy();
        assert_eq!(second.mode, SplitMode::MaxSize(102400.0));
        assert!(!second.asynchronous);
        assert!(second.include.as_ref().unwrap().matches("admin-users"));
        assert!(second.exclude.matches("admin-legacy"));

        assert_eq!(config.html.as_ref().unwrap().chunks, Some(vec!["login".to_string()]));
        assert!(config.render_options().pathinfo);
        assert_eq!(config.plugin_manager().len(), 2);
    }

    #[test]
    fn test_camel_case_aliases() {
        let config = Config::parse(
            r#"
[[plugin]]
maxSize = 50
excludeChunks = ["vendor"]
divideMode = "ceil"
"#,
        )
        .unwrap();

        let policy = config.plugins[0].policy();
        assert_eq!(policy.mode, SplitMode::MaxSize(51200.0));
        assert!(policy.exclude.matches("vendor"));
        assert!(policy.group_count.is_custom());
    }

    #[test]
    fn test_runtime_names_can_be_overridden() {
        let config = Config::parse(
            r#"
[runtime]
require = "__require__"
"#,
        )
        .unwrap();

        assert_eq!(config.runtime.require, "__require__");
        assert_eq!(config.runtime.ensure, "__webpack_require__.e");
        assert!(config.plugins.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "[[plugin]]\ndivide = 2").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.root, dir.path());
        assert_eq!(config.plugins[0].divide_count(), 2);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[[plugin]\ndivide = ").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse"));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join(CONFIG_FILE)).unwrap();

        assert_eq!(config.plugins.len(), 1);
        assert_eq!(config.plugins[0].policy().mode, SplitMode::Count(3));
    }
}
