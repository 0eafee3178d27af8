//! Layered configuration.
//!
//! Settings are resolved from, in increasing precedence:
//! - built-in defaults
//! - `.livemark/settings.toml`, found by walking up from the current directory
//! - environment variables
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `LM_` and use double
//! underscores to separate nested levels:
//! - `LM_WATCHER__DRAIN_LIMIT=64` sets `watcher.drain_limit`
//! - `LM_LOGGING__DEFAULT=debug` sets `logging.default`
//! - `LM_STYLE_FILE=dark.css` sets `style_file`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::watcher::DEFAULT_DRAIN_LIMIT;

const CONFIG_DIR: &str = ".livemark";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "LM_";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Per-user state directory holding the custom stylesheet
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Stylesheet file name, relative to `state_dir`
    #[serde(default = "default_style_file")]
    pub style_file: String,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherConfig {
    /// Prefix for the watcher's thread names
    #[serde(default = "default_thread_name")]
    pub thread_name: String,

    /// Maximum raw events merged into one dispatch round
    #[serde(default = "default_drain_limit")]
    pub drain_limit: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level for all modules: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `livemark::watcher = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("livemark")
}
fn default_style_file() -> String {
    "app.css".to_string()
}
fn default_thread_name() -> String {
    "livemark".to_string()
}
fn default_drain_limit() -> usize {
    DEFAULT_DRAIN_LIMIT
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            state_dir: default_state_dir(),
            style_file: default_style_file(),
            watcher: WatcherConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            thread_name: default_thread_name(),
            drain_limit: default_drain_limit(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| Path::new(CONFIG_DIR).join(CONFIG_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring env overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nesting levels; single underscores
            // stay part of the field name.
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .map(|key| key.as_str().to_lowercase().replace("__", ".").into()),
            )
            .extract()
            .map_err(Box::new)
    }

    /// Find `.livemark/settings.toml` in the current directory or an ancestor
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .map(|ancestor| ancestor.join(CONFIG_DIR))
            .find(|dir| dir.is_dir())
            .map(|dir| dir.join(CONFIG_FILE))
    }

    /// Full path of the custom stylesheet
    pub fn style_path(&self) -> PathBuf {
        self.state_dir.join(&self.style_file)
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file in the current directory
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        Self::init_config_file_in(Path::new("."), force)
    }

    pub fn init_config_file_in(
        root: &Path,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = root.join(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}
