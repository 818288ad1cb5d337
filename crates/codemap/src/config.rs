//! Configuration for codemap.
//!
//! Loads settings from `.codemap.toml` in the workspace root. Uses figment
//! for layered configuration with provenance tracking.

use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default directories to exclude from indexing and watching.
pub const DEFAULT_EXCLUDE_DIRS: &[&str] = &["node_modules", "vendor", "zig-out", "__pycache__"];

/// Codemap configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Additional directories to exclude from indexing (merged with defaults).
    #[serde(default)]
    pub exclude_dirs: Vec<String>,

    /// Whether to respect the root .gitignore when indexing (default: true).
    #[serde(default = "default_respect_gitignore")]
    pub respect_gitignore: bool,

    /// Debounce window for watcher re-index, in milliseconds (default: 500).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Language server command overrides.
    #[serde(default)]
    pub lsp: LspConfig,
}

/// Overrides for language server executables. Empty fields fall back to the
/// well-known command names on PATH.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LspConfig {
    #[serde(default)]
    pub go_path: Option<String>,
    #[serde(default)]
    pub python_path: Option<String>,
    #[serde(default)]
    pub typescript_path: Option<String>,
    #[serde(default)]
    pub lua_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exclude_dirs: Vec::new(),
            respect_gitignore: default_respect_gitignore(),
            debounce_ms: default_debounce_ms(),
            lsp: LspConfig::default(),
        }
    }
}

fn default_respect_gitignore() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    500
}

impl Config {
    /// Load configuration from `.codemap.toml` in the given root directory.
    ///
    /// Returns default config if the file doesn't exist. Parse errors are
    /// reported to stderr and fall back to defaults rather than aborting.
    pub fn load(root: &Path) -> Self {
        let config_path = root.join(".codemap.toml");

        let figment = Figment::from(Serialized::defaults(Config::default()));
        let figment = if config_path.exists() {
            figment.merge(Toml::file(&config_path))
        } else {
            figment
        };

        match figment.extract() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load {}: {}", config_path.display(), e);
                Config::default()
            }
        }
    }

    /// All excluded directory names: defaults plus configured extras.
    pub fn excluded_dirs(&self) -> Vec<String> {
        let mut dirs: Vec<String> = DEFAULT_EXCLUDE_DIRS.iter().map(|s| s.to_string()).collect();
        for extra in &self.exclude_dirs {
            if !dirs.contains(extra) {
                dirs.push(extra.clone());
            }
        }
        dirs
    }
}
