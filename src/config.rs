//! Configuration management for pdf-assistant.
//!
//! Loads config from YAML files in standard locations. Every section
//! falls back to defaults, so an empty or missing file is valid.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Please set the {0} environment variable.")]
    MissingApiKey(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadsConfig {
    pub dir: PathBuf,
    /// Upper bound on a multipart request body.
    pub max_bytes: usize,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("uploads"),
            max_bytes: 32 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub host: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub timeout_secs: Option<u64>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            host: "https://generativelanguage.googleapis.com".into(),
            model: "gemini-1.5-flash-001".into(),
            api_key_env: "GOOGLE_API_KEY".into(),
            temperature: 0.4,
            top_p: 1.0,
            top_k: 32,
            timeout_secs: None,
        }
    }
}

impl GeminiConfig {
    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        self.api_key_from(std::env::var(&self.api_key_env).ok())
    }

    /// Unset and blank values are both missing.
    fn api_key_from(&self, value: Option<String>) -> Result<String, ConfigError> {
        value
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingApiKey(self.api_key_env.clone()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    /// Words per minute; 200 is the engine's natural pace.
    pub rate: u32,
    pub voice_index: usize,
    pub model_path: String,
    pub voices_path: String,
    pub tokenizer_path: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate: 200,
            voice_index: 0,
            model_path: String::new(),
            voices_path: String::new(),
            tokenizer_path: String::new(),
        }
    }
}

impl SpeechConfig {
    /// Resolve a configured path, falling back to `default_name` in the working directory.
    pub fn resolve(configured: &str, default_name: &str) -> PathBuf {
        if configured.is_empty() {
            std::env::current_dir().unwrap_or_default().join(default_name)
        } else {
            PathBuf::from(configured)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub uploads: UploadsConfig,
    pub gemini: GeminiConfig,
    pub speech: SpeechConfig,
    pub departments: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            uploads: UploadsConfig::default(),
            gemini: GeminiConfig::default(),
            speech: SpeechConfig::default(),
            departments: vec![
                "General".into(),
                "Human Resources".into(),
                "Finance".into(),
                "Legal".into(),
                "Engineering".into(),
            ],
        }
    }
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/pdf-assistant/config.yaml
    /// 3. /etc/pdf-assistant/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/pdf-assistant/config.yaml")),
                Some(PathBuf::from("/etc/pdf-assistant/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }
}
