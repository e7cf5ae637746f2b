//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variables consulted for the API key, in order
pub const API_KEY_ENV_VARS: &[&str] = &["PARLEY_API_KEY", "OPENAI_API_KEY"];

/// Model used when neither flags nor config name one
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Configuration for parley
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default model to use
    pub model: Option<String>,
    /// Base URL of the OpenAI-compatible endpoint
    pub base_url: Option<String>,
    /// Request search-augmented answers by default
    pub search: Option<bool>,
    /// Characters between intermediate checkpoints while streaming
    pub checkpoint_granularity: Option<usize>,
    /// Where conversation logs are stored
    pub data_dir: Option<String>,
    /// API key (alternative to environment variables)
    pub api_key: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parley")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PARLEY_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, falling back to defaults on any problem
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            model: Some(DEFAULT_MODEL.to_string()),
            base_url: Some(parley_ai::providers::openai::DEFAULT_BASE_URL.to_string()),
            search: Some(false),
            checkpoint_granularity: Some(parley_engine::checkpoint::DEFAULT_CHECKPOINT_GRANULARITY),
            data_dir: None,
            api_key: None,
        };

        default_config.save_to(&path)?;
        Ok(path)
    }

    /// API key from config, then environment
    pub fn api_key(&self) -> Option<String> {
        self.api_key_with(|var| std::env::var(var).ok())
    }

    fn api_key_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| API_KEY_ENV_VARS.iter().find_map(|var| lookup(var)))
    }

    /// Directory holding conversation logs
    pub fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => expand_home(dir),
            None => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("parley")
                .join("conversations"),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# parley configuration file
# Place at ~/.config/parley/config.toml or point PARLEY_CONFIG_PATH at it

# Default model to use
model = "gpt-4o-mini"

# OpenAI-compatible endpoint
base_url = "https://api.openai.com/v1"

# Ask for search-augmented answers with citations
search = false

# Characters streamed between intermediate saves of a partial answer
checkpoint_granularity = 100

# Where conversations are stored (optional)
# data_dir = "~/.local/share/parley/conversations"

# API key (optional - PARLEY_API_KEY or OPENAI_API_KEY also work)
# api_key = "sk-..."
"#
}
