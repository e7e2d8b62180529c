//! Voice input and output
//!
//! Speech capture, text sanitizing, PCM to WAV wrapping, and the TTS
//! delivery pipeline with its playback and on-device synthesis backends.

pub mod capture;
pub mod playback;
pub mod recognizer;
pub mod sanitize;
pub mod synth;
pub mod tts;
pub mod wav;

pub use capture::{
    CaptureEvent, CaptureState, EngineEvent, EngineEventSender, RecognitionResult,
    RecognitionSession, SpeechCaptureController, SpeechEngine,
};
pub use playback::{AudioClip, AudioOutput, PlaybackEnd, PlaybackHandle, ResourceId, SystemPlayer};
pub use recognizer::CommandEngine;
pub use sanitize::{sanitize, sanitize_opt};
pub use synth::{CommandSynthesizer, SpeechSynthesizer, UnavailableSynthesizer};
pub use tts::{
    MAX_SPEAKING_RATE, MIN_SPEAKING_RATE, SynthesisRequest, SynthesisResult, TtsPipeline,
    TtsResponse, clamp_speaking_rate, parse_pcm_content_type,
};
pub use wav::{PcmFormat, WAV_HEADER_LEN, pcm_to_wav};
