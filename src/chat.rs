//! Conversation backend client
//!
//! Typed calls to the chat endpoints, all routed through the shared
//! [`ResilientClient`]. POSTs carry an idempotency key that stays the same
//! across the retries of one call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{HttpRequest, IDEMPOTENCY_KEY_HEADER, ResilientClient};
use crate::config::{ChatConfig, VoiceConfig};
use crate::voice::tts::{SynthesisResult, TtsResponse, clamp_speaking_rate};
use crate::{Error, Result};

pub const RESPOND_PATH: &str = "/api/respond";
pub const RESPOND_WITH_AUDIO_PATH: &str = "/api/respond-with-audio";
pub const WELCOME_PATH: &str = "/api/welcome";
pub const STATUS_PATH: &str = "/api/status";
pub const HEALTH_PATH: &str = "/health";

/// Speaker of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Some(Utc::now()),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Some(Utc::now()),
        }
    }
}

/// Ordered conversation log
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
}

impl ConversationHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Record a completed exchange
    pub fn push_exchange(&mut self, user: impl Into<String>, reply: impl Into<String>) {
        self.push(ChatMessage::user(user));
        self.push(ChatMessage::assistant(reply));
    }

    /// The last `limit` messages, oldest first
    #[must_use]
    pub fn recent(&self, limit: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(limit);
        &self.messages[start..]
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Body of `POST /api/respond` and `/api/respond-with-audio`
#[derive(Debug, Serialize)]
struct RespondRequest<'a> {
    text: &'a str,
    conversation_history: &'a [ChatMessage],
    enable_grammar_check: bool,
    timestamp: DateTime<Utc>,
}

/// Reply from `POST /api/respond`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    #[serde(default)]
    pub suggestions: Option<Vec<String>>,
    #[serde(default)]
    pub grammar_feedback: Option<Value>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub processing_time: Option<f64>,
}

/// Reply with synthesized audio from `POST /api/respond-with-audio`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CombinedReply {
    pub reply: String,
    #[serde(default)]
    pub audio_data: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub use_browser_tts: bool,
    /// Text to speak on-device if the audio is unusable
    #[serde(default)]
    pub fallback_text: String,
    #[serde(default)]
    pub processing_time: f64,
}

impl CombinedReply {
    /// Text for the on-device voice
    #[must_use]
    pub fn speech_text(&self) -> &str {
        if self.fallback_text.trim().is_empty() {
            &self.reply
        } else {
            &self.fallback_text
        }
    }

    /// Decode the attached audio.
    ///
    /// Undecodable audio yields a fallback result rather than an error.
    #[must_use]
    pub fn synthesis(&self) -> SynthesisResult {
        let response = TtsResponse {
            audio_data: Some(self.audio_data.clone()),
            content_type: Some(self.content_type.clone()),
            use_browser_tts: self.use_browser_tts,
            ..TtsResponse::default()
        };

        SynthesisResult::from_response(response).unwrap_or_else(|e| {
            tracing::info!(error = %e, "combined reply audio unusable");
            SynthesisResult::fallback()
        })
    }
}

/// Backend configuration flags from `GET /api/status`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ServiceStatus {
    #[serde(default)]
    pub gemini_configured: bool,
    #[serde(default)]
    pub google_credentials_configured: bool,
    #[serde(default)]
    pub gemini_tts_configured: bool,
    #[serde(default)]
    pub tts_configured: bool,
}

/// `GET /health` payload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub service: String,
}

/// Client for the conversation endpoints
pub struct ChatClient {
    client: Arc<ResilientClient>,
    config: ChatConfig,
}

impl ChatClient {
    #[must_use]
    pub const fn new(client: Arc<ResilientClient>, config: ChatConfig) -> Self {
        Self { client, config }
    }

    /// Ask for a reply to `text`.
    ///
    /// Only the most recent messages of `history` are sent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for blank text, otherwise any error of
    /// [`ResilientClient::request`]
    pub async fn respond(&self, text: &str, history: &ConversationHistory) -> Result<ChatReply> {
        let request = self.respond_request(RESPOND_PATH.to_string(), text, history)?;
        tracing::debug!(history = history.len(), "requesting reply");
        self.client.request_json(request).await
    }

    /// Ask for a reply plus synthesized audio in one round trip
    ///
    /// # Errors
    ///
    /// Same as [`Self::respond`]
    pub async fn respond_with_audio(
        &self,
        text: &str,
        history: &ConversationHistory,
        voice: &VoiceConfig,
    ) -> Result<CombinedReply> {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("voice_name", &voice.voice_name)
            .append_pair(
                "speaking_rate",
                &clamp_speaking_rate(voice.speaking_rate).to_string(),
            )
            .finish();

        let request =
            self.respond_request(format!("{RESPOND_WITH_AUDIO_PATH}?{query}"), text, history)?;
        self.client.request_json(request).await
    }

    /// Opening message from the tutor
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    pub async fn welcome(&self) -> Result<String> {
        let reply: ChatReply = self.client.get_json(WELCOME_PATH).await?;
        Ok(reply.reply)
    }

    /// Which backend services are configured
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    pub async fn status(&self) -> Result<ServiceStatus> {
        self.client.get_json(STATUS_PATH).await
    }

    /// Backend liveness
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    pub async fn health(&self) -> Result<HealthStatus> {
        self.client.get_json(HEALTH_PATH).await
    }

    fn respond_request(
        &self,
        url: String,
        text: &str,
        history: &ConversationHistory,
    ) -> Result<HttpRequest> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Validation("message text is empty".to_string()));
        }

        let body = serde_json::to_value(RespondRequest {
            text,
            conversation_history: history.recent(self.config.history_limit),
            enable_grammar_check: self.config.enable_grammar_check,
            timestamp: Utc::now(),
        })?;

        Ok(HttpRequest::post(url, body)
            .with_header(IDEMPOTENCY_KEY_HEADER, uuid::Uuid::new_v4().to_string()))
    }
}
