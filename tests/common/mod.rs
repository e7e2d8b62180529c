//! Shared test utilities: deterministic fakes for every platform seam

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use eikaiwa_voice::client::{
    ClientSettings, HttpRequest, HttpResponse, ResilientClient, RetryPolicy, Transport,
};
use eikaiwa_voice::config::VoiceConfig;
use eikaiwa_voice::voice::{
    AudioClip, AudioOutput, EngineEvent, EngineEventSender, PlaybackEnd, ResourceId,
    SpeechEngine, SpeechSynthesizer, TtsPipeline,
};
use eikaiwa_voice::{Error, Result};

/// One scripted transport outcome
pub enum Reply {
    Respond(HttpResponse),
    NetworkError(String),
    /// Never completes
    Hang,
}

/// Transport that replays a script and records every request
#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Option<HttpResponse>>,
    calls: Mutex<Vec<(Instant, HttpRequest)>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_json(&self, status: u16, body: Value) {
        self.push(Reply::Respond(HttpResponse::json(status, &body)));
    }

    pub fn push_error(&self, message: &str) {
        self.push(Reply::NetworkError(message.to_string()));
    }

    pub fn push_hang(&self) {
        self.push(Reply::Hang);
    }

    pub fn push(&self, reply: Reply) {
        self.script.lock().unwrap().push_back(reply);
    }

    /// Response used once the script runs out
    pub fn always_json(&self, status: u16, body: Value) {
        *self.fallback.lock().unwrap() = Some(HttpResponse::json(status, &body));
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.calls.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.calls.lock().unwrap().push((Instant::now(), request));

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::NetworkError(message)) => Err(Error::Network(message)),
            Some(Reply::Hang) => std::future::pending().await,
            None => self
                .fallback
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| Error::Network("no scripted response".to_string())),
        }
    }
}

/// Client settings with short, test-friendly delays
pub fn test_settings() -> ClientSettings {
    ClientSettings {
        timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            retry_non_idempotent: true,
        },
        cache_ttl: Duration::from_secs(300),
        cache_max_entries: 100,
    }
}

pub fn client(transport: &Arc<FakeTransport>, settings: ClientSettings) -> Arc<ResilientClient> {
    Arc::new(ResilientClient::new(transport.clone(), settings))
}

/// Speech engine that records calls and lets the test inject callbacks
#[derive(Default)]
pub struct FakeEngine {
    sender: Mutex<Option<EngineEventSender>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    fail_start: AtomicBool,
    end_on_stop: AtomicBool,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Engine that answers `stop` with an `End` event, like a real recognizer
    pub fn ending_on_stop() -> Arc<Self> {
        let engine = Self::default();
        engine.end_on_stop.store(true, Ordering::SeqCst);
        Arc::new(engine)
    }

    pub fn failing() -> Arc<Self> {
        let engine = Self::default();
        engine.fail_start.store(true, Ordering::SeqCst);
        Arc::new(engine)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Deliver an engine callback for the current session
    pub fn emit(&self, event: EngineEvent) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            let _ = sender.send(event);
        }
    }
}

impl SpeechEngine for FakeEngine {
    fn start(&self, events: EngineEventSender) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::Unknown("microphone busy".to_string()));
        }
        *self.sender.lock().unwrap() = Some(events);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.end_on_stop.load(Ordering::SeqCst) {
            self.emit(EngineEvent::End);
        }
    }
}

/// On-device synthesizer that reports a fixed outcome
pub struct FakeSynth {
    succeeds: bool,
    spoken: Mutex<Vec<(String, f32, String)>>,
    cancels: AtomicUsize,
}

impl FakeSynth {
    pub fn new(succeeds: bool) -> Arc<Self> {
        Arc::new(Self {
            succeeds,
            spoken: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
        })
    }

    pub fn utterances(&self) -> Vec<String> {
        self.spoken.lock().unwrap().iter().map(|(t, _, _)| t.clone()).collect()
    }

    pub fn calls(&self) -> Vec<(String, f32, String)> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynth {
    async fn speak(&self, text: &str, rate: f32, language: &str) -> bool {
        self.spoken
            .lock()
            .unwrap()
            .push((text.to_string(), rate, language.to_string()));
        self.succeeds
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn is_speaking(&self) -> bool {
        false
    }
}

/// How [`FakeOutput`] plays a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayBehavior {
    Ends,
    FailsToStart,
    ErrorsMidway,
    /// Ends after the given delay
    EndsAfter(Duration),
}

/// Audio output that records resource lifetimes
pub struct FakeOutput {
    behavior: PlayBehavior,
    created: Mutex<Vec<(ResourceId, AudioClip)>>,
    revoked: Mutex<Vec<ResourceId>>,
    plays: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeOutput {
    pub fn new(behavior: PlayBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            created: Mutex::new(Vec::new()),
            revoked: Mutex::new(Vec::new()),
            plays: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        })
    }

    pub fn clips(&self) -> Vec<AudioClip> {
        self.created.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn resources(&self) -> Vec<ResourceId> {
        self.created.lock().unwrap().iter().map(|(r, _)| r.clone()).collect()
    }

    pub fn revoked(&self) -> Vec<ResourceId> {
        self.revoked.lock().unwrap().clone()
    }

    pub fn plays(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioOutput for FakeOutput {
    fn create_resource(&self, clip: AudioClip) -> Result<ResourceId> {
        let id = ResourceId::generate();
        self.created.lock().unwrap().push((id.clone(), clip));
        Ok(id)
    }

    async fn play(&self, _resource: &ResourceId) -> Result<oneshot::Receiver<PlaybackEnd>> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        match self.behavior {
            PlayBehavior::Ends => {
                let _ = tx.send(PlaybackEnd::Ended);
            }
            PlayBehavior::FailsToStart => {
                return Err(Error::SpeechSynthesis("autoplay blocked".to_string()));
            }
            PlayBehavior::ErrorsMidway => {
                let _ = tx.send(PlaybackEnd::Error("decoder error".to_string()));
            }
            PlayBehavior::EndsAfter(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(PlaybackEnd::Ended);
                });
            }
        }
        Ok(rx)
    }

    fn stop(&self, _resource: &ResourceId) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn revoke(&self, resource: &ResourceId) {
        self.revoked.lock().unwrap().push(resource.clone());
    }
}

/// Pipeline over fakes with default voice settings
pub fn pipeline(
    transport: &Arc<FakeTransport>,
    synth: &Arc<FakeSynth>,
    output: &Arc<FakeOutput>,
) -> TtsPipeline {
    pipeline_with_voice(transport, synth, output, VoiceConfig::default())
}

pub fn pipeline_with_voice(
    transport: &Arc<FakeTransport>,
    synth: &Arc<FakeSynth>,
    output: &Arc<FakeOutput>,
    voice: VoiceConfig,
) -> TtsPipeline {
    TtsPipeline::new(
        client(transport, test_settings()),
        synth.clone(),
        output.clone(),
        voice,
    )
}

pub fn base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
