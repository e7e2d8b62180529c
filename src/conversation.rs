//! Voice conversation loop
//!
//! Ties capture, chat and TTS together: listen for an utterance, send it to
//! the tutor, speak the reply. Chat failures become an inline message; TTS
//! failures are swallowed by the pipeline.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::Result;
use crate::chat::{ChatClient, ConversationHistory};
use crate::voice::{SpeechCaptureController, TtsPipeline};

/// Result of one conversational turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The tutor replied
    Replied {
        user_text: String,
        reply: String,
        /// Whether any voice played the reply
        spoken: bool,
    },
    /// Recognition finished without speech
    NothingHeard,
    /// Message to show in place of a reply
    Failed { message: String },
}

/// A spoken conversation with the tutor
pub struct VoiceConversation {
    capture: SpeechCaptureController,
    chat: ChatClient,
    tts: TtsPipeline,
    history: Mutex<ConversationHistory>,
    listen_timeout: Duration,
}

impl VoiceConversation {
    #[must_use]
    pub fn new(
        capture: SpeechCaptureController,
        chat: ChatClient,
        tts: TtsPipeline,
        listen_timeout: Duration,
    ) -> Self {
        Self {
            capture,
            chat,
            tts,
            history: Mutex::new(ConversationHistory::new()),
            listen_timeout,
        }
    }

    #[must_use]
    pub const fn capture(&self) -> &SpeechCaptureController {
        &self.capture
    }

    #[must_use]
    pub const fn tts(&self) -> &TtsPipeline {
        &self.tts
    }

    /// Copy of the conversation so far
    #[must_use]
    pub fn history(&self) -> ConversationHistory {
        self.lock_history().clone()
    }

    /// Capture one utterance
    ///
    /// # Errors
    ///
    /// See [`SpeechCaptureController::listen`]
    pub async fn listen(&self) -> Result<Option<String>> {
        self.capture.listen(self.listen_timeout).await
    }

    /// Send `text` to the tutor and record the exchange
    ///
    /// # Errors
    ///
    /// Returns error if the chat request fails; history is left unchanged
    pub async fn send(&self, text: &str) -> Result<String> {
        let history = self.history();
        let reply = self.chat.respond(text, &history).await?;

        self.lock_history().push_exchange(text.trim(), reply.reply.clone());
        Ok(reply.reply)
    }

    /// Speak a reply through the TTS pipeline
    pub async fn speak_reply(&self, reply: &str) -> bool {
        self.tts.speak(reply).await
    }

    /// Send `text` and speak the reply
    pub async fn reply_to(&self, text: &str) -> TurnOutcome {
        match self.send(text).await {
            Ok(reply) => {
                let spoken = self.speak_reply(&reply).await;
                TurnOutcome::Replied {
                    user_text: text.trim().to_string(),
                    reply,
                    spoken,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "chat request failed");
                TurnOutcome::Failed {
                    message: e.user_message(),
                }
            }
        }
    }

    /// Send `text` asking for reply audio in the same round trip
    pub async fn reply_to_with_audio(&self, text: &str) -> TurnOutcome {
        let history = self.history();
        let combined = match self
            .chat
            .respond_with_audio(text, &history, self.tts.voice())
            .await
        {
            Ok(combined) => combined,
            Err(e) => {
                tracing::warn!(error = %e, "chat request failed");
                return TurnOutcome::Failed {
                    message: e.user_message(),
                };
            }
        };

        self.lock_history()
            .push_exchange(text.trim(), combined.reply.clone());

        let spoken = self
            .tts
            .play_synthesis(combined.synthesis(), combined.speech_text())
            .await;

        TurnOutcome::Replied {
            user_text: text.trim().to_string(),
            reply: combined.reply,
            spoken,
        }
    }

    /// Listen, reply and speak
    pub async fn turn(&self) -> TurnOutcome {
        match self.listen().await {
            Ok(Some(text)) => self.reply_to(&text).await,
            Ok(None) => TurnOutcome::NothingHeard,
            Err(e) => TurnOutcome::Failed {
                message: e.user_message(),
            },
        }
    }

    /// Stop listening and silence the on-device voice
    pub fn interrupt(&self) {
        self.capture.stop();
        self.tts.stop_speaking();
    }

    fn lock_history(&self) -> MutexGuard<'_, ConversationHistory> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
