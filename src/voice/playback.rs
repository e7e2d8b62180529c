//! Audio playback of synthesized clips
//!
//! Playback goes through an [`AudioOutput`], which turns a byte buffer into a
//! temporary playable resource. [`PlaybackHandle`] scopes that resource: it
//! is released exactly once, when playback ends, fails, is stopped, or the
//! handle is dropped.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::sync::oneshot;

use crate::{Error, Result};

/// Encoded audio ready for playback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl AudioClip {
    #[must_use]
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
        }
    }
}

/// Identifier of a temporary playable resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId(pub String);

impl ResourceId {
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("clip:{}", uuid::Uuid::new_v4()))
    }
}

/// How a started playback finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEnd {
    /// Played to completion (or was stopped)
    Ended,
    /// Failed mid-playback
    Error(String),
}

/// Platform audio output capability
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Register a clip as a playable resource
    ///
    /// # Errors
    ///
    /// Returns error if the resource cannot be created
    fn create_resource(&self, clip: AudioClip) -> Result<ResourceId>;

    /// Start playing a resource.
    ///
    /// Resolves once playback has started. The returned receiver fires when
    /// playback ends or fails.
    ///
    /// # Errors
    ///
    /// Returns error if playback could not start
    async fn play(&self, resource: &ResourceId) -> Result<oneshot::Receiver<PlaybackEnd>>;

    /// Halt playback of a resource, if playing
    fn stop(&self, resource: &ResourceId);

    /// Release the resource's backing storage
    fn revoke(&self, resource: &ResourceId);
}

/// A playable clip whose backing resource lives as long as the handle
pub struct PlaybackHandle {
    output: Arc<dyn AudioOutput>,
    resource: Option<ResourceId>,
}

impl PlaybackHandle {
    /// Register `clip` with `output`
    ///
    /// # Errors
    ///
    /// Returns error if the output cannot create the resource
    pub fn new(output: Arc<dyn AudioOutput>, clip: AudioClip) -> Result<Self> {
        let resource = output.create_resource(clip)?;
        tracing::debug!(resource = %resource.0, "playback resource created");

        Ok(Self {
            output,
            resource: Some(resource),
        })
    }

    #[must_use]
    pub const fn resource(&self) -> Option<&ResourceId> {
        self.resource.as_ref()
    }

    /// Play to completion.
    ///
    /// The resource is released whether playback ends normally or fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SpeechSynthesis`] if playback could not start or
    /// failed part way through
    pub async fn play(&mut self) -> Result<()> {
        let Some(resource) = self.resource.clone() else {
            return Err(Error::SpeechSynthesis(
                "playback resource already released".to_string(),
            ));
        };

        let finished = match self.output.play(&resource).await {
            Ok(rx) => rx,
            Err(e) => {
                self.release();
                return Err(Error::SpeechSynthesis(format!("playback failed to start: {e}")));
            }
        };

        tracing::debug!(resource = %resource.0, "playback started");

        let outcome = finished.await;
        self.release();

        match outcome {
            Ok(PlaybackEnd::Ended) => {
                tracing::debug!(resource = %resource.0, "playback ended");
                Ok(())
            }
            Ok(PlaybackEnd::Error(e)) => {
                Err(Error::SpeechSynthesis(format!("playback error: {e}")))
            }
            Err(_) => Err(Error::SpeechSynthesis(
                "audio output dropped playback without finishing".to_string(),
            )),
        }
    }

    /// Stop playback and release the resource
    pub fn stop(&mut self) {
        if let Some(resource) = &self.resource {
            self.output.stop(resource);
        }
        self.release();
    }

    /// Release the resource; later calls do nothing
    pub fn release(&mut self) {
        if let Some(resource) = self.resource.take() {
            tracing::trace!(resource = %resource.0, "playback resource released");
            self.output.revoke(&resource);
        }
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Players tried in order, with the arguments placed before the file path
const WAV_PLAYERS: &[(&str, &[&str])] = &[
    ("afplay", &[]),
    ("paplay", &[]),
    ("aplay", &["-q"]),
    ("ffplay", &["-nodisp", "-autoexit", "-loglevel", "quiet"]),
];

const COMPRESSED_PLAYERS: &[(&str, &[&str])] = &[
    ("afplay", &[]),
    ("ffplay", &["-nodisp", "-autoexit", "-loglevel", "quiet"]),
    ("mpg123", &["-q"]),
];

/// [`AudioOutput`] that plays clips with a system command-line player.
///
/// Each resource is a temporary file deleted on revoke.
#[derive(Default)]
pub struct SystemPlayer {
    files: Mutex<HashMap<ResourceId, NamedTempFile>>,
    playing: Mutex<HashMap<ResourceId, oneshot::Sender<()>>>,
}

impl SystemPlayer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn files(&self) -> MutexGuard<'_, HashMap<ResourceId, NamedTempFile>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn playing(&self) -> MutexGuard<'_, HashMap<ResourceId, oneshot::Sender<()>>> {
        self.playing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn path_of(&self, resource: &ResourceId) -> Option<PathBuf> {
        self.files().get(resource).map(|f| f.path().to_path_buf())
    }
}

#[async_trait]
impl AudioOutput for SystemPlayer {
    fn create_resource(&self, clip: AudioClip) -> Result<ResourceId> {
        let mut file = tempfile::Builder::new()
            .prefix("eikaiwa-")
            .suffix(extension_for(&clip.content_type))
            .tempfile()?;
        file.write_all(&clip.bytes)?;
        file.flush()?;

        let id = ResourceId::generate();
        self.files().insert(id.clone(), file);
        Ok(id)
    }

    async fn play(&self, resource: &ResourceId) -> Result<oneshot::Receiver<PlaybackEnd>> {
        let path = self
            .path_of(resource)
            .ok_or_else(|| Error::SpeechSynthesis(format!("unknown resource {}", resource.0)))?;

        let is_wav = path.extension().is_some_and(|e| e == "wav");
        let (program, args) = find_player(if is_wav { WAV_PLAYERS } else { COMPRESSED_PLAYERS })
            .ok_or_else(|| Error::SpeechSynthesis("no audio player found on PATH".to_string()))?;

        let mut child = tokio::process::Command::new(&program)
            .args(args)
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        tracing::debug!(player = %program.display(), path = %path.display(), "spawned audio player");

        let (done_tx, done_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        self.playing().insert(resource.clone(), stop_tx);

        tokio::spawn(async move {
            let end = tokio::select! {
                status = child.wait() => match status {
                    Ok(s) if s.success() => PlaybackEnd::Ended,
                    Ok(s) => PlaybackEnd::Error(format!("player exited with {s}")),
                    Err(e) => PlaybackEnd::Error(e.to_string()),
                },
                _ = stop_rx => {
                    let _ = child.kill().await;
                    PlaybackEnd::Ended
                }
            };
            let _ = done_tx.send(end);
        });

        Ok(done_rx)
    }

    fn stop(&self, resource: &ResourceId) {
        if let Some(stop) = self.playing().remove(resource) {
            let _ = stop.send(());
        }
    }

    fn revoke(&self, resource: &ResourceId) {
        self.playing().remove(resource);
        self.files().remove(resource);
    }
}

fn find_player(candidates: &[(&str, &'static [&'static str])]) -> Option<(PathBuf, &'static [&'static str])> {
    candidates
        .iter()
        .find_map(|(name, args)| which::which(name).ok().map(|path| (path, *args)))
}

/// File suffix matching a MIME type, so players can sniff the format
#[must_use]
pub fn extension_for(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "audio/mpeg" | "audio/mp3" => ".mp3",
        "audio/ogg" | "audio/opus" => ".ogg",
        "audio/webm" => ".webm",
        "audio/flac" => ".flac",
        "audio/aac" | "audio/mp4" => ".m4a",
        _ => ".wav",
    }
}
