//! On-device speech synthesis
//!
//! The last link of the fallback chain. [`CommandSynthesizer`] drives a
//! system TTS binary; [`UnavailableSynthesizer`] stands in when none exists.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;

/// Words per minute at a speaking rate of 1.0
const BASE_WORDS_PER_MINUTE: f32 = 175.0;

/// Platform speech synthesizer
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Speak `text`, resolving once the utterance finishes.
    ///
    /// Returns whether the utterance was spoken successfully.
    async fn speak(&self, text: &str, rate: f32, language: &str) -> bool;

    /// Cancel the current utterance and anything queued
    fn cancel(&self);

    /// Whether an utterance is in progress
    fn is_speaking(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Engine {
    /// macOS `say`
    Say,
    /// `espeak-ng` or `espeak`
    Espeak,
}

/// Cancel handles for the utterances currently in flight
#[derive(Debug, Default)]
struct Utterances {
    next_id: AtomicU64,
    active: Mutex<HashMap<u64, oneshot::Sender<()>>>,
}

impl Utterances {
    fn begin(&self) -> (u64, oneshot::Receiver<()>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        (id, rx)
    }

    fn finish(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn cancel_all(&self) {
        for (_, cancel) in self.lock().drain() {
            let _ = cancel.send(());
        }
    }

    fn any(&self) -> bool {
        !self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<()>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Synthesizer backed by a system text-to-speech command
pub struct CommandSynthesizer {
    program: PathBuf,
    engine: Engine,
    utterances: Utterances,
}

impl CommandSynthesizer {
    /// Find a TTS command on `PATH`
    #[must_use]
    pub fn detect() -> Option<Self> {
        [
            ("say", Engine::Say),
            ("espeak-ng", Engine::Espeak),
            ("espeak", Engine::Espeak),
        ]
        .into_iter()
        .find_map(|(name, engine)| {
            which::which(name).ok().map(|program| {
                tracing::debug!(program = %program.display(), "found on-device synthesizer");
                Self {
                    program,
                    engine,
                    utterances: Utterances::default(),
                }
            })
        })
    }

    /// Command arguments; the text itself is written to stdin so it can
    /// never be parsed as an option
    fn args(&self, rate: f32, language: &str) -> Vec<String> {
        let wpm = words_per_minute(rate).to_string();
        match self.engine {
            Engine::Say => vec!["-r".into(), wpm, "-f".into(), "-".into()],
            Engine::Espeak => {
                let voice = language.split(['-', '_']).next().unwrap_or("en");
                vec![
                    "-s".into(),
                    wpm,
                    "-v".into(),
                    voice.to_ascii_lowercase(),
                    "--stdin".into(),
                ]
            }
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    async fn speak(&self, text: &str, rate: f32, language: &str) -> bool {
        let mut child = match tokio::process::Command::new(&self.program)
            .args(self.args(rate, language))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(error = %e, "failed to start on-device synthesizer");
                return false;
            }
        };

        let (id, cancel_rx) = self.utterances.begin();

        // Dropping stdin after the write closes it so the engine starts speaking
        if let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(text.as_bytes()).await
        {
            tracing::warn!(error = %e, "failed to pass text to on-device synthesizer");
            self.utterances.finish(id);
            let _ = child.kill().await;
            return false;
        }

        let spoken = tokio::select! {
            status = child.wait() => match status {
                Ok(s) => s.success(),
                Err(e) => {
                    tracing::warn!(error = %e, "on-device synthesizer failed");
                    false
                }
            },
            _ = cancel_rx => {
                let _ = child.kill().await;
                tracing::debug!("on-device speech cancelled");
                false
            }
        };

        self.utterances.finish(id);
        spoken
    }

    fn cancel(&self) {
        self.utterances.cancel_all();
    }

    fn is_speaking(&self) -> bool {
        self.utterances.any()
    }
}

/// Synthesizer used when the platform has no speech engine
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableSynthesizer;

#[async_trait]
impl SpeechSynthesizer for UnavailableSynthesizer {
    async fn speak(&self, _text: &str, _rate: f32, _language: &str) -> bool {
        tracing::debug!("no on-device synthesizer available");
        false
    }

    fn cancel(&self) {}

    fn is_speaking(&self) -> bool {
        false
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn words_per_minute(rate: f32) -> u32 {
    (BASE_WORDS_PER_MINUTE * rate).round().max(1.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_scales_words_per_minute() {
        assert_eq!(words_per_minute(1.0), 175);
        assert_eq!(words_per_minute(2.0), 350);
        assert_eq!(words_per_minute(0.25), 44);
    }

    fn synth(engine: Engine) -> CommandSynthesizer {
        CommandSynthesizer {
            program: PathBuf::from("tts"),
            engine,
            utterances: Utterances::default(),
        }
    }

    #[test]
    fn espeak_args_use_language_prefix() {
        assert_eq!(
            synth(Engine::Espeak).args(1.0, "en-US"),
            vec!["-s", "175", "-v", "en", "--stdin"]
        );
    }

    #[test]
    fn text_is_read_from_stdin() {
        // A reply like "-wout" must not turn into an option
        assert_eq!(synth(Engine::Say).args(1.0, "en-US"), vec!["-r", "175", "-f", "-"]);
        assert_eq!(
            synth(Engine::Espeak).args(2.0, "fr_FR").last().map(String::as_str),
            Some("--stdin")
        );
    }

    #[test]
    fn overlapping_utterances_tracked_separately() {
        let utterances = Utterances::default();
        let (first, mut first_rx) = utterances.begin();
        let (second, mut second_rx) = utterances.begin();
        assert_ne!(first, second);

        utterances.finish(first);
        assert!(utterances.any());

        utterances.cancel_all();
        assert!(second_rx.try_recv().is_ok());
        assert!(first_rx.try_recv().is_err());
        assert!(!utterances.any());

        utterances.finish(second);
        assert!(!utterances.any());
    }

    #[tokio::test]
    async fn unavailable_synthesizer_reports_failure() {
        let synth = UnavailableSynthesizer;
        assert!(!synth.speak("hello", 1.0, "en-US").await);
        assert!(!synth.is_speaking());
    }
}
