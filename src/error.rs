//! Error types for the voice core

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for voice core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice core
#[derive(Debug, Error)]
pub enum Error {
    /// Connectivity failure or non-5xx HTTP failure
    #[error("network error: {0}")]
    Network(String),

    /// Request did not complete before the deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Provider reported a server-side failure (5xx)
    #[error("api error {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Status text or response body
        message: String,
    },

    /// Input rejected before any network call
    #[error("validation error: {0}")]
    Validation(String),

    /// Speech engine reported an error
    #[error("speech recognition error: {0}")]
    SpeechRecognition(RecognitionErrorKind),

    /// Audio decode or playback failure
    #[error("speech synthesis error: {0}")]
    SpeechSynthesis(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Audio payload was not valid base64
    #[error("audio decode error: {0}")]
    Decode(#[from] base64::DecodeError),

    /// Uncategorized failure
    #[error("{0}")]
    Unknown(String),
}

/// Coarse error categories surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Api,
    Validation,
    SpeechRecognition,
    SpeechSynthesis,
    Unknown,
}

/// Classified speech engine error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecognitionErrorKind {
    /// Engine heard nothing
    NoSpeech,
    /// Microphone could not be opened
    AudioCapture,
    /// Microphone permission denied
    NotAllowed,
    /// Engine could not reach its recognition service
    Network,
    /// Any other engine code
    Unknown,
}

impl RecognitionErrorKind {
    /// Classify a raw engine error code (e.g. `"no-speech"`)
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "no-speech" => Self::NoSpeech,
            "audio-capture" => Self::AudioCapture,
            "not-allowed" | "service-not-allowed" => Self::NotAllowed,
            "network" => Self::Network,
            _ => Self::Unknown,
        }
    }

    /// Message shown to the user for this error
    #[must_use]
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::NoSpeech => "No speech was detected. Please try speaking again.",
            Self::AudioCapture => "No microphone was found. Please check your audio input device.",
            Self::NotAllowed => {
                "Microphone access was denied. Please allow microphone permission and try again."
            }
            Self::Network => {
                "A network error occurred during speech recognition. Please check your connection."
            }
            Self::Unknown => "Speech recognition failed. Please try again.",
        }
    }
}

impl fmt::Display for RecognitionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoSpeech => "no speech detected",
            Self::AudioCapture => "audio capture failed",
            Self::NotAllowed => "microphone not allowed",
            Self::Network => "recognition network failure",
            Self::Unknown => "unknown recognition failure",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Category of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::Http(_) => ErrorKind::Network,
            Self::Api { .. } => ErrorKind::Api,
            Self::Validation(_) => ErrorKind::Validation,
            Self::SpeechRecognition(_) => ErrorKind::SpeechRecognition,
            Self::SpeechSynthesis(_) | Self::Decode(_) => ErrorKind::SpeechSynthesis,
            Self::Config(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Toml(_)
            | Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Whether a failed request may be attempted again
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation(_))
    }

    /// Message suitable for showing inline in place of a reply
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::SpeechRecognition(kind) => kind.user_message().to_string(),
            Self::Timeout(_) => {
                "The server took too long to respond. Please try again.".to_string()
            }
            _ => match self.kind() {
                ErrorKind::Network => {
                    "Could not reach the server. Please check your connection and try again."
                        .to_string()
                }
                ErrorKind::Api => {
                    "The server encountered an error. Please try again later.".to_string()
                }
                ErrorKind::Validation => "Please enter a message before sending.".to_string(),
                ErrorKind::SpeechSynthesis => "Audio playback failed.".to_string(),
                ErrorKind::SpeechRecognition | ErrorKind::Unknown => {
                    "An unexpected error occurred. Please try again.".to_string()
                }
            },
        }
    }
}
