//! Speech capture session control
//!
//! Wraps a platform speech recognizer ([`SpeechEngine`]) in a controller
//! that runs at most one bounded recognition session at a time. Engine
//! callbacks arrive as [`EngineEvent`]s on a per-session channel and are
//! applied strictly in delivery order by a driver task, which also enforces
//! the session timeout.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::error::RecognitionErrorKind;
use crate::{Error, Result};

/// How long to wait for the engine to end after a final result
const FINAL_RESULT_GRACE: Duration = Duration::from_millis(1500);

/// Capacity of the lifecycle event channel
const EVENT_CAPACITY: usize = 64;

/// State of the capture controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// No session running
    Idle,
    /// Engine started, accepting results
    Listening,
    /// Stop requested or final result received, waiting for the engine to end
    Stopping,
    /// Engine reported an error; transient, always followed by `Idle`
    Error,
}

/// One recognition hypothesis delivered by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub transcript: String,
    pub is_final: bool,
}

impl RecognitionResult {
    #[must_use]
    pub fn interim(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: false,
        }
    }

    #[must_use]
    pub fn final_result(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: true,
        }
    }
}

/// Callback from the platform speech engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine began capturing audio
    Start,
    /// Current hypotheses for the whole utterance
    Result(Vec<RecognitionResult>),
    /// Engine error code (e.g. `"no-speech"`, `"not-allowed"`)
    Error(String),
    /// Engine finished
    End,
}

/// Sender handed to the engine for one session
pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;

/// Platform speech recognition capability
///
/// Implementations must deliver events for a session on the sender passed to
/// `start`, and should send [`EngineEvent::End`] once capture finishes.
pub trait SpeechEngine: Send + Sync {
    /// Begin a recognition session
    ///
    /// # Errors
    ///
    /// Returns error if the engine could not start
    fn start(&self, events: EngineEventSender) -> Result<()>;

    /// Ask the engine to finish the current session
    fn stop(&self);
}

/// Lifecycle notifications published by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Controller moved to a new state
    StateChanged(CaptureState),
    /// Transcript replaced by a newer hypothesis
    Transcript { text: String, is_final: bool },
    /// Engine reported an error
    Failed(RecognitionErrorKind),
    /// Session hit its deadline while still listening
    TimedOut,
}

/// Snapshot of the current recognition session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionSession {
    pub state: CaptureState,
    pub transcript: String,
    pub started_at: Option<Instant>,
    pub timeout: Duration,
}

#[derive(Debug)]
struct Inner {
    state: CaptureState,
    transcript: String,
    started_at: Option<Instant>,
    timeout: Duration,
    /// Incremented on every start; events for older sessions are dropped
    session_id: u64,
    /// Engine `stop` already invoked for this session
    engine_stop_sent: bool,
    /// Session torn down by the caller (stop or timeout), not the engine
    teardown: bool,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            state: CaptureState::Idle,
            transcript: String::new(),
            started_at: None,
            timeout: Duration::ZERO,
            session_id: 0,
            engine_stop_sent: false,
            teardown: false,
        }
    }
}

/// What the driver should do after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// Final result seen; allow a short grace period for the engine to end
    Finalizing,
    Done,
}

struct Shared {
    engine: Arc<dyn SpeechEngine>,
    inner: Mutex<Inner>,
    events: broadcast::Sender<CaptureEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: CaptureEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn handle(&self, session: u64, event: EngineEvent) -> Flow {
        match event {
            EngineEvent::Start => {
                tracing::debug!(session, "speech engine started");
                Flow::Continue
            }
            EngineEvent::Result(results) => self.on_result(session, &results),
            EngineEvent::Error(code) => {
                self.on_error(session, &code);
                Flow::Done
            }
            EngineEvent::End => {
                self.on_end(session);
                Flow::Done
            }
        }
    }

    fn on_result(&self, session: u64, results: &[RecognitionResult]) -> Flow {
        let text: String = results.iter().map(|r| r.transcript.as_str()).collect();
        let text = text.trim().to_string();
        let is_final = results.last().is_some_and(|r| r.is_final);

        {
            let mut inner = self.lock();
            if inner.session_id != session || inner.state != CaptureState::Listening {
                return Flow::Continue;
            }
            inner.transcript.clone_from(&text);
            if is_final {
                inner.state = CaptureState::Stopping;
            }
        }

        tracing::debug!(session, is_final, chars = text.len(), "transcript updated");
        self.emit(CaptureEvent::Transcript { text, is_final });

        if is_final {
            self.emit(CaptureEvent::StateChanged(CaptureState::Stopping));
            Flow::Finalizing
        } else {
            Flow::Continue
        }
    }

    fn on_error(&self, session: u64, code: &str) {
        let kind = RecognitionErrorKind::from_code(code);
        {
            let mut inner = self.lock();
            if inner.session_id != session {
                return;
            }
            inner.state = CaptureState::Error;
        }

        tracing::warn!(session, code, ?kind, "speech recognition error");
        self.emit(CaptureEvent::StateChanged(CaptureState::Error));
        self.emit(CaptureEvent::Failed(kind));
        self.to_idle(session);
    }

    fn on_end(&self, session: u64) {
        {
            let inner = self.lock();
            if inner.session_id != session
                || !matches!(inner.state, CaptureState::Listening | CaptureState::Stopping)
            {
                return;
            }
        }

        tracing::debug!(session, "speech engine ended");
        self.to_idle(session);
    }

    fn on_deadline(&self, session: u64) {
        let (was_listening, send_stop) = {
            let mut inner = self.lock();
            if inner.session_id != session
                || !matches!(inner.state, CaptureState::Listening | CaptureState::Stopping)
            {
                return;
            }
            let was_listening = inner.state == CaptureState::Listening;
            let send_stop = !inner.engine_stop_sent;
            inner.engine_stop_sent = true;
            if was_listening {
                inner.teardown = true;
            }
            (was_listening, send_stop)
        };

        if was_listening {
            tracing::info!(session, "recognition session timed out");
            self.emit(CaptureEvent::TimedOut);
        }
        if send_stop {
            self.engine.stop();
        }
        self.to_idle(session);
    }

    fn on_channel_closed(&self, session: u64) {
        tracing::debug!(session, "speech engine dropped its event channel");
        self.to_idle(session);
    }

    fn to_idle(&self, session: u64) {
        {
            let mut inner = self.lock();
            if inner.session_id != session || inner.state == CaptureState::Idle {
                return;
            }
            inner.state = CaptureState::Idle;
            if inner.teardown {
                inner.transcript.clear();
            }
        }
        self.emit(CaptureEvent::StateChanged(CaptureState::Idle));
    }
}

/// Controller for one-at-a-time speech recognition sessions
pub struct SpeechCaptureController {
    shared: Arc<Shared>,
}

impl SpeechCaptureController {
    #[must_use]
    pub fn new(engine: Arc<dyn SpeechEngine>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                engine,
                inner: Mutex::new(Inner::default()),
                events,
            }),
        }
    }

    /// Start a recognition session bounded by `timeout`.
    ///
    /// Returns `false` without touching the engine unless the controller is
    /// `Idle`, and also when the engine refuses to start.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, timeout: Duration) -> bool {
        let (tx, rx) = mpsc::unbounded_channel();

        let session = {
            let mut inner = self.shared.lock();
            if inner.state != CaptureState::Idle {
                tracing::debug!(state = ?inner.state, "start ignored, session already active");
                return false;
            }
            inner.session_id += 1;
            inner.state = CaptureState::Listening;
            inner.transcript.clear();
            inner.started_at = Some(Instant::now());
            inner.timeout = timeout;
            inner.engine_stop_sent = false;
            inner.teardown = false;
            inner.session_id
        };

        if let Err(e) = self.shared.engine.start(tx) {
            tracing::warn!(session, error = %e, "speech engine failed to start");
            {
                let mut inner = self.shared.lock();
                inner.state = CaptureState::Error;
            }
            self.shared
                .emit(CaptureEvent::StateChanged(CaptureState::Error));
            self.shared
                .emit(CaptureEvent::Failed(RecognitionErrorKind::Unknown));
            self.shared.to_idle(session);
            return false;
        }

        tracing::debug!(
            session,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "recognition session started"
        );
        self.shared
            .emit(CaptureEvent::StateChanged(CaptureState::Listening));

        tokio::spawn(drive(Arc::clone(&self.shared), session, rx, timeout));
        true
    }

    /// Ask the engine to finish the current session.
    ///
    /// Only acts while `Listening`; returns whether a stop was issued.
    pub fn stop(&self) -> bool {
        let session = {
            let mut inner = self.shared.lock();
            if inner.state != CaptureState::Listening {
                return false;
            }
            inner.state = CaptureState::Stopping;
            inner.engine_stop_sent = true;
            inner.teardown = true;
            inner.session_id
        };

        tracing::debug!(session, "stopping recognition session");
        self.shared.engine.stop();
        self.shared
            .emit(CaptureEvent::StateChanged(CaptureState::Stopping));
        true
    }

    /// Clear the transcript without changing state
    pub fn clear_transcript(&self) {
        self.shared.lock().transcript.clear();
    }

    /// Listen for one utterance and return its final transcript.
    ///
    /// Resolves with `None` if the session ends without any speech, for
    /// example after a timeout or an explicit stop with nothing heard.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if a session is already running
    /// - [`Error::SpeechRecognition`] if the engine reports an error
    pub async fn listen(&self, timeout: Duration) -> Result<Option<String>> {
        let mut events = self.subscribe();

        if !self.start(timeout) {
            return match self.state() {
                CaptureState::Idle => Err(Error::SpeechRecognition(RecognitionErrorKind::Unknown)),
                _ => Err(Error::Validation(
                    "a recognition session is already running".to_string(),
                )),
            };
        }

        let mut last = String::new();
        loop {
            match events.recv().await {
                Ok(CaptureEvent::Transcript { text, is_final }) => {
                    if is_final {
                        return Ok(non_empty(text));
                    }
                    last = text;
                }
                Ok(CaptureEvent::Failed(kind)) => return Err(Error::SpeechRecognition(kind)),
                Ok(CaptureEvent::StateChanged(CaptureState::Idle)) => {
                    return Ok(non_empty(last));
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Ok(non_empty(last)),
            }
        }
    }

    /// Receive lifecycle and transcript events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.shared.events.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> CaptureState {
        self.shared.lock().state
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.state() == CaptureState::Listening
    }

    #[must_use]
    pub fn transcript(&self) -> String {
        self.shared.lock().transcript.clone()
    }

    #[must_use]
    pub fn session(&self) -> RecognitionSession {
        let inner = self.shared.lock();
        RecognitionSession {
            state: inner.state,
            transcript: inner.transcript.clone(),
            started_at: inner.started_at,
            timeout: inner.timeout,
        }
    }
}

impl Drop for SpeechCaptureController {
    fn drop(&mut self) {
        let send_stop = {
            let mut inner = self.shared.lock();
            let active = matches!(inner.state, CaptureState::Listening | CaptureState::Stopping);
            let send = active && !inner.engine_stop_sent;
            inner.engine_stop_sent |= send;
            send
        };
        if send_stop {
            self.shared.engine.stop();
        }
    }
}

/// Apply engine events for one session until it ends or times out
async fn drive(
    shared: Arc<Shared>,
    session: u64,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
    timeout: Duration,
) {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    shared.on_channel_closed(session);
                    break;
                };
                match shared.handle(session, event) {
                    Flow::Continue => {}
                    Flow::Finalizing => {
                        let grace = Instant::now() + FINAL_RESULT_GRACE;
                        if grace < deadline.deadline() {
                            deadline.as_mut().reset(grace);
                        }
                    }
                    Flow::Done => break,
                }
            }
            () = &mut deadline => {
                shared.on_deadline(session);
                break;
            }
        }
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() { None } else { Some(text) }
}
