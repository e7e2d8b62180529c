//! Speech recognition through an external command
//!
//! [`CommandEngine`] runs a recognizer program (a whisper wrapper, a
//! cloud STT script) and reads its stdout. Each line replaces the current
//! hypothesis; the last line becomes the final result once the program
//! closes stdout. A failing exit is reported as `audio-capture`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

use super::capture::{EngineEvent, EngineEventSender, RecognitionResult, SpeechEngine};
use crate::error::RecognitionErrorKind;
use crate::{Error, Result};

/// [`SpeechEngine`] backed by a recognizer command
#[derive(Debug)]
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl CommandEngine {
    /// Resolve `program` on `PATH`
    ///
    /// # Errors
    ///
    /// Returns error if the program cannot be found
    pub fn new(program: &str, args: Vec<String>) -> Result<Self> {
        let program = which::which(program)
            .map_err(|e| Error::Config(format!("recognizer {program} not found: {e}")))?;

        Ok(Self {
            program,
            args,
            stop: Mutex::new(None),
        })
    }
}

impl SpeechEngine for CommandEngine {
    fn start(&self, events: EngineEventSender) -> Result<()> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                tracing::warn!(program = %self.program.display(), error = %e, "failed to start recognizer");
                Error::SpeechRecognition(RecognitionErrorKind::AudioCapture)
            })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        *self.stop.lock().unwrap_or_else(PoisonError::into_inner) = Some(stop_tx);

        let _ = events.send(EngineEvent::Start);
        tokio::spawn(run_recognizer(child, events, stop_rx));
        Ok(())
    }

    fn stop(&self) {
        if let Some(stop) = self
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = stop.send(());
        }
    }
}

async fn run_recognizer(
    mut child: Child,
    events: EngineEventSender,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let Some(stdout) = child.stdout.take() else {
        let _ = events.send(EngineEvent::End);
        return;
    };
    let mut lines = BufReader::new(stdout).lines();
    let mut last = String::new();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    line.clone_into(&mut last);
                    let _ = events.send(EngineEvent::Result(vec![RecognitionResult::interim(line)]));
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read recognizer output");
                    break;
                }
            },
            _ = &mut stop_rx => {
                tracing::debug!("recognizer stopped");
                let _ = child.kill().await;
                let _ = events.send(EngineEvent::End);
                return;
            }
        }
    }

    let status = tokio::select! {
        status = child.wait() => status,
        _ = stop_rx => {
            let _ = child.kill().await;
            let _ = events.send(EngineEvent::End);
            return;
        }
    };

    match status {
        Ok(status) if status.success() => {
            if !last.is_empty() {
                let _ = events.send(EngineEvent::Result(vec![RecognitionResult::final_result(last)]));
            }
        }
        Ok(status) => {
            tracing::warn!(code = ?status.code(), "recognizer exited with failure");
            let _ = events.send(EngineEvent::Error("audio-capture".to_string()));
        }
        Err(e) => {
            tracing::warn!(error = %e, "recognizer failed");
            let _ = events.send(EngineEvent::Error("audio-capture".to_string()));
        }
    }
    let _ = events.send(EngineEvent::End);
}
