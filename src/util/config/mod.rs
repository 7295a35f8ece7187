//! Loader configuration
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high -> low):
//! 1. CLI arguments
//! 2. Environment variables (STRATUM_PATH, STRATUM_THROW_ON_CYCLE)
//! 3. Config file (stratum.toml)
//! 4. Default values
//! ```
//!
//! # Usage
//!
//! ```rust
//! use stratum::util::config::LoaderConfig;
//!
//! let config = LoaderConfig::from_toml_str(r#"search_paths = ["/lib/"]"#).unwrap();
//! assert_eq!(config.extension, ".js");
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Environment variable holding `:`-separated search paths.
pub const ENV_PATH: &str = "STRATUM_PATH";

/// Environment variable switching cycle breaking off.
pub const ENV_THROW_ON_CYCLE: &str = "STRATUM_THROW_ON_CYCLE";

/// Per-loader configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Base paths tried in order for non-relative ids
    #[serde(default)]
    pub search_paths: Vec<String>,
    /// Fail on the first cycle instead of breaking it
    #[serde(default)]
    pub throw_on_cycle: bool,
    /// Location relative ids resolve against when the caller has none
    #[serde(default)]
    pub base: String,
    /// Appended to ids that do not already end with it
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Log every loader event through `tracing`
    #[serde(default)]
    pub debug: bool,
}

fn default_extension() -> String {
    ".js".to_string()
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            throw_on_cycle: false,
            base: String::new(),
            extension: default_extension(),
            debug: false,
        }
    }
}

impl LoaderConfig {
    /// Config with the given search paths and defaults otherwise
    pub fn with_search_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            search_paths: paths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::ParseError)
    }

    /// Load a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(ConfigError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(ENV_PATH).ok().as_deref(),
            std::env::var(ENV_THROW_ON_CYCLE).ok().as_deref(),
        );
    }

    /// Apply overrides given as raw environment values
    pub fn apply_overrides(
        &mut self,
        path: Option<&str>,
        throw_on_cycle: Option<&str>,
    ) {
        if let Some(path) = path {
            let paths: Vec<String> = path
                .split(':')
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
            if !paths.is_empty() {
                self.search_paths = paths;
            }
        }
        if let Some(flag) = throw_on_cycle {
            self.throw_on_cycle = matches!(flag.trim(), "1" | "true" | "yes" | "on");
        }
    }
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    ParseError(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Config parse error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}
