//! Configuration management
//!
//! Precedence, lowest first: built-in defaults, the TOML file, environment
//! variables. CLI flags are applied on top by the binary.

pub mod file;

use std::path::Path;
use std::time::Duration;

use crate::client::RetryPolicy;
use crate::client::cache::{DEFAULT_MAX_ENTRIES, DEFAULT_TTL};
use crate::voice::tts::clamp_speaking_rate;
use crate::{Error, Result};

use self::file::EikaiwaConfigFile;

/// Voice core configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Backend API configuration
    pub api: ApiConfig,

    /// Retry policy for backend calls
    pub retry: RetryPolicy,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// Chat configuration
    pub chat: ChatConfig,
}

/// Backend API configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL the `/api/*` paths are resolved against
    pub base_url: String,

    /// Per-attempt request timeout
    pub timeout: Duration,

    /// Lifetime of cached GET responses
    pub cache_ttl: Duration,

    /// Maximum cached responses
    pub cache_max_entries: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout: Duration::from_secs(30),
            cache_ttl: DEFAULT_TTL,
            cache_max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Remote TTS voice identifier
    pub voice_name: String,

    /// Language for synthesis and recognition
    pub language_code: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub speaking_rate: f32,

    /// Recognition session timeout
    pub recognition_timeout: Duration,

    /// Try the remote provider before the on-device voice
    pub remote_tts_enabled: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice_name: "Kore".to_string(),
            language_code: "en-US".to_string(),
            speaking_rate: 1.0,
            recognition_timeout: Duration::from_secs(10),
            remote_tts_enabled: true,
        }
    }
}

/// Chat configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Ask the backend for grammar feedback
    pub enable_grammar_check: bool,

    /// Messages of history sent with each request
    pub history_limit: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enable_grammar_check: true,
            history_limit: 10,
        }
    }
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// `path` overrides the standard config file location.
    ///
    /// # Errors
    ///
    /// Returns error if an environment override has an invalid value
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        config.apply_file(file::load_config_file(path));
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay values present in the TOML file
    pub fn apply_file(&mut self, file: EikaiwaConfigFile) {
        if let Some(v) = file.api.base_url {
            self.api.base_url = v;
        }
        if let Some(v) = file.api.timeout_secs {
            self.api.timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.api.cache_ttl_secs {
            self.api.cache_ttl = Duration::from_secs(v);
        }
        if let Some(v) = file.api.cache_max_entries {
            self.api.cache_max_entries = v;
        }

        if let Some(v) = file.retry.max_attempts {
            self.retry.max_attempts = v.max(1);
        }
        if let Some(v) = file.retry.base_delay_ms {
            self.retry.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = file.retry.max_delay_ms {
            self.retry.max_delay = Duration::from_millis(v);
        }
        if let Some(v) = file.retry.retry_non_idempotent {
            self.retry.retry_non_idempotent = v;
        }

        if let Some(v) = file.voice.voice_name {
            self.voice.voice_name = v;
        }
        if let Some(v) = file.voice.language_code {
            self.voice.language_code = v;
        }
        if let Some(v) = file.voice.speaking_rate {
            self.voice.speaking_rate = clamp_speaking_rate(v);
        }
        if let Some(v) = file.voice.recognition_timeout_secs {
            self.voice.recognition_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.voice.remote_tts {
            self.voice.remote_tts_enabled = v;
        }

        if let Some(v) = file.chat.enable_grammar_check {
            self.chat.enable_grammar_check = v;
        }
        if let Some(v) = file.chat.history_limit {
            self.chat.history_limit = v;
        }
    }

    /// Overlay environment variables read through `lookup`
    ///
    /// # Errors
    ///
    /// Returns error if a numeric or boolean variable cannot be parsed
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("EIKAIWA_API_URL") {
            self.api.base_url = v;
        }
        if let Some(v) = lookup("EIKAIWA_TIMEOUT_SECS") {
            let secs: u64 = v
                .parse()
                .map_err(|_| Error::Config(format!("EIKAIWA_TIMEOUT_SECS is not a number: {v}")))?;
            self.api.timeout = Duration::from_secs(secs);
        }
        if let Some(v) = lookup("EIKAIWA_VOICE") {
            self.voice.voice_name = v;
        }
        if let Some(v) = lookup("EIKAIWA_LANGUAGE") {
            self.voice.language_code = v;
        }
        if let Some(v) = lookup("EIKAIWA_SPEAKING_RATE") {
            let rate: f32 = v.parse().map_err(|_| {
                Error::Config(format!("EIKAIWA_SPEAKING_RATE is not a number: {v}"))
            })?;
            self.voice.speaking_rate = clamp_speaking_rate(rate);
        }
        if let Some(v) = lookup("EIKAIWA_REMOTE_TTS") {
            self.voice.remote_tts_enabled = parse_bool(&v).ok_or_else(|| {
                Error::Config(format!("EIKAIWA_REMOTE_TTS is not a boolean: {v}"))
            })?;
        }

        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
