//! TOML configuration file loading
//!
//! Supports `~/.config/eikaiwa/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct EikaiwaConfigFile {
    /// Backend API configuration
    #[serde(default)]
    pub api: ApiFileConfig,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryFileConfig,

    /// Voice input/output configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Chat behaviour
    #[serde(default)]
    pub chat: ChatFileConfig,
}

/// Backend API configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiFileConfig {
    /// Backend base URL (e.g. "http://localhost:8000")
    pub base_url: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Response cache lifetime in seconds
    pub cache_ttl_secs: Option<u64>,

    /// Maximum cached responses
    pub cache_max_entries: Option<usize>,
}

/// Retry configuration
#[derive(Debug, Default, Deserialize)]
pub struct RetryFileConfig {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub retry_non_idempotent: Option<bool>,
}

/// Voice configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Remote TTS voice (e.g. "Kore")
    pub voice_name: Option<String>,

    /// BCP-47 language code (e.g. "en-US")
    pub language_code: Option<String>,

    /// Speaking rate multiplier
    pub speaking_rate: Option<f32>,

    /// Recognition session timeout in seconds
    pub recognition_timeout_secs: Option<u64>,

    /// Use the remote TTS provider before the on-device voice
    pub remote_tts: Option<bool>,
}

/// Chat configuration
#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    pub enable_grammar_check: Option<bool>,
    pub history_limit: Option<usize>,
}

/// Load the TOML config file from `path`, or from the standard path
///
/// Returns `EikaiwaConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file(path: Option<&Path>) -> EikaiwaConfigFile {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_file_path) else {
        return EikaiwaConfigFile::default();
    };

    if !path.exists() {
        return EikaiwaConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                EikaiwaConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            EikaiwaConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/eikaiwa/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "eikaiwa", "eikaiwa")
        .map(|d| d.config_dir().join("config.toml"))
}
