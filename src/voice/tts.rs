//! Text-to-speech delivery
//!
//! [`TtsPipeline::speak`] sanitizes text, asks the backend to synthesize it,
//! wraps raw PCM into WAV, and plays the clip. Any failure on that path drops
//! down to the on-device [`SpeechSynthesizer`]; TTS errors are never surfaced.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::client::{ResilientClient, truncate};
use crate::config::VoiceConfig;

use super::playback::{AudioClip, AudioOutput, PlaybackHandle};
use super::sanitize::sanitize;
use super::synth::SpeechSynthesizer;
use super::wav::{PcmFormat, pcm_to_wav};

/// Slowest speaking rate the provider accepts
pub const MIN_SPEAKING_RATE: f32 = 0.25;

/// Fastest speaking rate the provider accepts
pub const MAX_SPEAKING_RATE: f32 = 4.0;

/// Backend synthesis endpoint
pub const TTS_PATH: &str = "/api/tts";

/// Clamp a speaking rate into the provider's accepted range
#[must_use]
pub fn clamp_speaking_rate(rate: f32) -> f32 {
    if rate.is_nan() {
        1.0
    } else {
        rate.clamp(MIN_SPEAKING_RATE, MAX_SPEAKING_RATE)
    }
}

/// Body of `POST /api/tts`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_name: String,
    pub language_code: String,
    pub speaking_rate: f32,
}

impl SynthesisRequest {
    #[must_use]
    pub fn new(text: impl Into<String>, voice: &VoiceConfig) -> Self {
        Self {
            text: text.into(),
            voice_name: voice.voice_name.clone(),
            language_code: voice.language_code.clone(),
            speaking_rate: clamp_speaking_rate(voice.speaking_rate),
        }
    }
}

/// Synthesis payload as returned by the backend
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TtsResponse {
    /// Base64 audio
    #[serde(default)]
    pub audio_data: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Provider asks the client to use its own voice
    #[serde(default)]
    pub use_browser_tts: bool,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u16>,
    #[serde(default)]
    pub bits_per_sample: Option<u16>,
}

/// Decoded synthesis outcome
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynthesisResult {
    pub audio_bytes: Vec<u8>,
    pub content_type: String,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub bits_per_sample: Option<u16>,
    pub use_fallback: bool,
}

impl SynthesisResult {
    /// A result that sends delivery straight to the on-device voice
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            use_fallback: true,
            ..Self::default()
        }
    }

    /// Decode a backend response.
    ///
    /// A response flagged `use_browser_tts` is not decoded.
    ///
    /// # Errors
    ///
    /// Returns error if the audio is not valid base64
    pub fn from_response(response: TtsResponse) -> Result<Self> {
        if response.use_browser_tts {
            return Ok(Self::fallback());
        }

        let audio_bytes = match response.audio_data.as_deref().map(str::trim) {
            Some(data) if !data.is_empty() => BASE64.decode(data)?,
            _ => Vec::new(),
        };

        Ok(Self {
            audio_bytes,
            content_type: response.content_type.unwrap_or_default(),
            sample_rate: response.sample_rate,
            channels: response.channels,
            bits_per_sample: response.bits_per_sample,
            use_fallback: false,
        })
    }

    /// Whether there is remote audio to play
    #[must_use]
    pub fn is_playable(&self) -> bool {
        !self.use_fallback && !self.audio_bytes.is_empty()
    }

    /// PCM layout if the content type declares raw PCM.
    ///
    /// Explicit fields win over content type parameters, which win over the
    /// 24 kHz mono 16-bit defaults.
    #[must_use]
    pub fn pcm_format(&self) -> Option<PcmFormat> {
        let declared = parse_pcm_content_type(&self.content_type)?;
        Some(PcmFormat {
            sample_rate: self.sample_rate.unwrap_or(declared.sample_rate),
            channels: self.channels.unwrap_or(declared.channels),
            bits_per_sample: self.bits_per_sample.unwrap_or(declared.bits_per_sample),
        })
    }

    /// Playable clip: PCM is wrapped in WAV, anything else passes through
    #[must_use]
    pub fn into_clip(self) -> AudioClip {
        match self.pcm_format() {
            Some(format) => AudioClip::new(pcm_to_wav(&self.audio_bytes, format), "audio/wav"),
            None => {
                let content_type = if self.content_type.is_empty() {
                    "audio/mpeg".to_string()
                } else {
                    self.content_type
                };
                AudioClip::new(self.audio_bytes, content_type)
            }
        }
    }
}

/// Parse a content type such as `audio/L16;codec=pcm;rate=24000`.
///
/// Returns `None` unless the type denotes raw PCM.
#[must_use]
pub fn parse_pcm_content_type(content_type: &str) -> Option<PcmFormat> {
    let lowered = content_type.to_ascii_lowercase();
    let mut parts = lowered.split(';').map(str::trim);
    let mime = parts.next().unwrap_or_default();

    let mut format = PcmFormat::default();
    let mut codec_pcm = false;

    for param in parts {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match key.trim() {
            "codec" | "codecs" => codec_pcm |= value == "pcm",
            "rate" => {
                if let Ok(rate) = value.parse() {
                    format.sample_rate = rate;
                }
            }
            "channels" => {
                if let Ok(channels) = value.parse() {
                    format.channels = channels;
                }
            }
            _ => {}
        }
    }

    let is_pcm = codec_pcm || matches!(mime, "audio/pcm" | "audio/l16" | "audio/raw" | "audio/x-raw");
    is_pcm.then_some(format)
}

/// Sanitize, synthesize remotely, play, or fall back to the on-device voice
pub struct TtsPipeline {
    client: Arc<ResilientClient>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    output: Arc<dyn AudioOutput>,
    voice: VoiceConfig,
    queue: tokio::sync::Mutex<()>,
}

impl TtsPipeline {
    #[must_use]
    pub fn new(
        client: Arc<ResilientClient>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        output: Arc<dyn AudioOutput>,
        voice: VoiceConfig,
    ) -> Self {
        Self {
            client,
            synthesizer,
            output,
            voice,
            queue: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub const fn voice(&self) -> &VoiceConfig {
        &self.voice
    }

    /// Speak `raw_text`.
    ///
    /// Returns `true` if either the remote clip or the on-device voice
    /// played. Calls are served one at a time, in order.
    pub async fn speak(&self, raw_text: &str) -> bool {
        let Some(cleaned) = clean(raw_text) else {
            return false;
        };

        let _turn = self.queue.lock().await;

        if !self.voice.remote_tts_enabled {
            return self.speak_on_device(&cleaned).await;
        }

        match self.synthesize(&cleaned).await {
            Ok(result) => self.deliver(result, &cleaned).await,
            Err(e) => {
                tracing::info!(error = %e, "remote synthesis failed, using on-device voice");
                self.speak_on_device(&cleaned).await
            }
        }
    }

    /// Play an already fetched synthesis result, falling back to speaking
    /// `text` on-device
    pub async fn play_synthesis(&self, result: SynthesisResult, text: &str) -> bool {
        let cleaned = sanitize(text);
        let _turn = self.queue.lock().await;
        self.deliver(result, &cleaned).await
    }

    /// Request synthesis of already sanitized `text` from the backend
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the audio cannot be decoded
    pub async fn synthesize(&self, text: &str) -> Result<SynthesisResult> {
        let request = SynthesisRequest::new(text, &self.voice);
        tracing::debug!(
            text = truncate(text, 40),
            voice = %request.voice_name,
            rate = request.speaking_rate,
            "requesting remote synthesis"
        );

        let response: TtsResponse = self.client.post_json(TTS_PATH, &request).await?;
        SynthesisResult::from_response(response)
    }

    /// Cancel on-device speech
    pub fn stop_speaking(&self) {
        self.synthesizer.cancel();
    }

    /// Whether the on-device voice is speaking
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.synthesizer.is_speaking()
    }

    async fn deliver(&self, result: SynthesisResult, cleaned: &str) -> bool {
        if !result.is_playable() {
            tracing::debug!(
                use_fallback = result.use_fallback,
                "no remote audio, using on-device voice"
            );
            return self.speak_on_device(cleaned).await;
        }

        match self.play_remote(result).await {
            Ok(()) => true,
            Err(e) => {
                tracing::info!(error = %e, "remote audio playback failed, using on-device voice");
                self.speak_on_device(cleaned).await
            }
        }
    }

    async fn play_remote(&self, result: SynthesisResult) -> Result<()> {
        let clip = result.into_clip();
        tracing::debug!(
            content_type = %clip.content_type,
            bytes = clip.bytes.len(),
            "playing remote audio"
        );

        let mut handle = PlaybackHandle::new(Arc::clone(&self.output), clip)?;
        handle.play().await
    }

    async fn speak_on_device(&self, cleaned: &str) -> bool {
        if cleaned.is_empty() {
            return false;
        }
        self.synthesizer
            .speak(
                cleaned,
                clamp_speaking_rate(self.voice.speaking_rate),
                &self.voice.language_code,
            )
            .await
    }
}

fn clean(raw_text: &str) -> Option<String> {
    if raw_text.trim().is_empty() {
        return None;
    }
    let cleaned = sanitize(raw_text);
    if cleaned.is_empty() {
        tracing::debug!("nothing speakable after sanitizing");
        return None;
    }
    Some(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speaking_rate_clamped() {
        assert!((clamp_speaking_rate(0.1) - 0.25).abs() < f32::EPSILON);
        assert!((clamp_speaking_rate(5.0) - 4.0).abs() < f32::EPSILON);
        assert!((clamp_speaking_rate(1.5) - 1.5).abs() < f32::EPSILON);
        assert!((clamp_speaking_rate(f32::NAN) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn request_uses_wire_field_names() {
        let voice = VoiceConfig {
            speaking_rate: 10.0,
            ..VoiceConfig::default()
        };
        let body = serde_json::to_value(SynthesisRequest::new("hello", &voice)).unwrap();
        assert_eq!(body["text"], "hello");
        assert_eq!(body["voice_name"], "Kore");
        assert_eq!(body["language_code"], "en-US");
        assert_eq!(body["speaking_rate"], 4.0);
    }

    #[test]
    fn pcm_content_types() {
        let gemini = parse_pcm_content_type("audio/L16;codec=pcm;rate=24000").unwrap();
        assert_eq!(gemini, PcmFormat::default());

        let stereo = parse_pcm_content_type("audio/pcm; rate=16000; channels=2").unwrap();
        assert_eq!(stereo.sample_rate, 16000);
        assert_eq!(stereo.channels, 2);

        assert!(parse_pcm_content_type("audio/raw").is_some());
        assert!(parse_pcm_content_type("audio/x-custom;codec=pcm").is_some());
        assert!(parse_pcm_content_type("audio/mpeg").is_none());
        assert!(parse_pcm_content_type("").is_none());
    }

    #[test]
    fn browser_tts_flag_skips_decoding() {
        let result = SynthesisResult::from_response(TtsResponse {
            audio_data: Some("not base64 at all!".into()),
            use_browser_tts: true,
            ..TtsResponse::default()
        })
        .unwrap();
        assert!(result.use_fallback);
        assert!(!result.is_playable());
    }

    #[test]
    fn invalid_base64_is_an_error() {
        let err = SynthesisResult::from_response(TtsResponse {
            audio_data: Some("%%%".into()),
            content_type: Some("audio/mpeg".into()),
            ..TtsResponse::default()
        })
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::SpeechSynthesis);
    }

    #[test]
    fn pcm_is_wrapped_as_wav() {
        let result = SynthesisResult {
            audio_bytes: vec![0; 480],
            content_type: "audio/L16;codec=pcm;rate=24000".into(),
            ..SynthesisResult::default()
        };
        let clip = result.into_clip();
        assert_eq!(clip.content_type, "audio/wav");
        assert_eq!(clip.bytes.len(), 44 + 480);
        assert_eq!(&clip.bytes[0..4], b"RIFF");
    }

    #[test]
    fn explicit_fields_override_content_type() {
        let result = SynthesisResult {
            audio_bytes: vec![0; 4],
            content_type: "audio/pcm;rate=16000".into(),
            sample_rate: Some(8000),
            ..SynthesisResult::default()
        };
        assert_eq!(result.pcm_format().unwrap().sample_rate, 8000);
    }

    #[test]
    fn encoded_audio_passes_through() {
        let result = SynthesisResult {
            audio_bytes: vec![0xFF, 0xFB],
            content_type: "audio/mpeg".into(),
            ..SynthesisResult::default()
        };
        let clip = result.into_clip();
        assert_eq!(clip.bytes, vec![0xFF, 0xFB]);
        assert_eq!(clip.content_type, "audio/mpeg");
    }

    #[test]
    fn blank_text_not_cleaned() {
        assert_eq!(clean(""), None);
        assert_eq!(clean("   "), None);
        assert_eq!(clean("🎉"), None);
        assert_eq!(clean("**hi**").as_deref(), Some("hi"));
    }
}
