//! Voice pipeline integration tests
//!
//! Tests sanitizing, PCM wrapping and speech delivery without audio hardware

use std::io::Cursor;
use std::time::Duration;

use serde_json::json;

use eikaiwa_voice::config::VoiceConfig;
use eikaiwa_voice::voice::{PcmFormat, SynthesisResult, WAV_HEADER_LEN, pcm_to_wav, sanitize};

mod common;

use common::{FakeOutput, FakeSynth, FakeTransport, PlayBehavior, base64, pipeline};

/// 16-bit little-endian sine wave samples
fn sine_pcm(frequency: f32, samples: usize, sample_rate: u32) -> Vec<u8> {
    (0..samples)
        .flat_map(|i| {
            let t = i as f32 / sample_rate as f32;
            let value = (0.5 * (2.0 * std::f32::consts::PI * frequency * t).sin() * 32767.0) as i16;
            value.to_le_bytes()
        })
        .collect()
}

fn pcm_reply(pcm: &[u8]) -> serde_json::Value {
    json!({
        "audio_data": base64(pcm),
        "content_type": "audio/L16;codec=pcm;rate=24000",
        "use_browser_tts": false
    })
}

#[test]
fn test_sanitize_examples() {
    assert_eq!(sanitize("😊🎉💡🚀"), "");
    assert_eq!(sanitize("**bold** *italic* `code`"), "bold italic code");
    assert_eq!(sanitize("# Title\n- item1\n- item2"), "Title item1 item2");
}

#[test]
fn test_sanitize_is_idempotent() {
    let inputs = [
        "",
        "plain text",
        "**Great job!** 🎉 Let's try *another* sentence.",
        "> quoted\n1. first\n2. second",
        "[link](https://example.com) and ![img](a.png)",
        "```\nlet x = 1;\n```\nAfter the code",
        "<b>bold</b> &amp; __underline__ ~~gone~~",
        "***nested** emphasis*",
        "____",
        "`` double ` tick ``",
        "  spaced\t\tout \n\n text  ",
    ];

    for input in inputs {
        let once = sanitize(input);
        assert_eq!(sanitize(&once), once, "not idempotent for {input:?}");
    }
}

#[test]
fn test_pcm_to_wav_header() {
    let pcm = sine_pcm(440.0, 2400, 24000);
    let wav = pcm_to_wav(&pcm, PcmFormat::default());

    assert_eq!(wav.len(), WAV_HEADER_LEN + pcm.len());
    assert_eq!(&wav[0..4], b"RIFF");
    assert_eq!(&wav[8..12], b"WAVE");

    let reader = hound::WavReader::new(Cursor::new(&wav)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 24000);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(reader.len(), 2400);
}

#[test]
fn test_pcm_to_wav_empty_payload() {
    let wav = pcm_to_wav(&[], PcmFormat::default());
    assert_eq!(wav.len(), WAV_HEADER_LEN);
}

#[tokio::test(start_paused = true)]
async fn test_speak_empty_text_makes_no_request() {
    let transport = FakeTransport::new();
    let synth = FakeSynth::new(true);
    let output = FakeOutput::new(PlayBehavior::Ends);
    let tts = pipeline(&transport, &synth, &output);

    assert!(!tts.speak("").await);
    assert!(!tts.speak("   ").await);
    assert!(!tts.speak("🎉🚀").await);

    assert_eq!(transport.calls(), 0);
    assert!(synth.utterances().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_browser_tts_flag_uses_on_device_voice() {
    let transport = FakeTransport::new();
    transport.push_json(200, json!({"audio_data": "", "use_browser_tts": true}));
    let synth = FakeSynth::new(true);
    let output = FakeOutput::new(PlayBehavior::Ends);
    let tts = pipeline(&transport, &synth, &output);

    assert!(tts.speak("**Nice** work! 👍").await);

    assert_eq!(synth.utterances(), vec!["Nice work!".to_string()]);
    assert!(output.clips().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fallback_reports_synthesizer_failure() {
    let transport = FakeTransport::new();
    transport.push_json(200, json!({"use_browser_tts": true}));
    let synth = FakeSynth::new(false);
    let output = FakeOutput::new(PlayBehavior::Ends);
    let tts = pipeline(&transport, &synth, &output);

    assert!(!tts.speak("Hello").await);
    assert_eq!(synth.utterances().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pcm_reply_plays_as_wav_and_releases_once() {
    let pcm = sine_pcm(220.0, 4800, 24000);
    let transport = FakeTransport::new();
    transport.push_json(200, pcm_reply(&pcm));
    let synth = FakeSynth::new(true);
    let output = FakeOutput::new(PlayBehavior::Ends);
    let tts = pipeline(&transport, &synth, &output);

    assert!(tts.speak("How was your weekend?").await);

    let clips = output.clips();
    assert_eq!(clips.len(), 1);
    assert_eq!(clips[0].content_type, "audio/wav");
    assert_eq!(clips[0].bytes.len(), WAV_HEADER_LEN + pcm.len());

    let spec = hound::WavReader::new(Cursor::new(&clips[0].bytes))
        .unwrap()
        .spec();
    assert_eq!(spec.sample_rate, 24000);

    assert_eq!(output.plays(), 1);
    assert_eq!(output.revoked(), output.resources());
    assert!(synth.utterances().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_pcm_rate_taken_from_content_type() {
    let transport = FakeTransport::new();
    transport.push_json(
        200,
        json!({
            "audio_data": base64(&[0u8; 64]),
            "content_type": "audio/pcm;rate=16000;channels=2"
        }),
    );
    let synth = FakeSynth::new(true);
    let output = FakeOutput::new(PlayBehavior::Ends);
    let tts = pipeline(&transport, &synth, &output);

    assert!(tts.speak("Stereo").await);

    let clip = &output.clips()[0];
    let spec = hound::WavReader::new(Cursor::new(&clip.bytes)).unwrap().spec();
    assert_eq!(spec.sample_rate, 16000);
    assert_eq!(spec.channels, 2);
}

#[tokio::test(start_paused = true)]
async fn test_encoded_audio_played_as_is() {
    let mp3 = vec![0xFF, 0xFB, 0x90, 0x64, 0x00];
    let transport = FakeTransport::new();
    transport.push_json(
        200,
        json!({"audio_data": base64(&mp3), "content_type": "audio/mpeg"}),
    );
    let synth = FakeSynth::new(true);
    let output = FakeOutput::new(PlayBehavior::Ends);
    let tts = pipeline(&transport, &synth, &output);

    assert!(tts.speak("Hello").await);

    let clips = output.clips();
    assert_eq!(clips[0].bytes, mp3);
    assert_eq!(clips[0].content_type, "audio/mpeg");
}

#[tokio::test(start_paused = true)]
async fn test_request_body_carries_voice_settings() {
    let transport = FakeTransport::new();
    transport.push_json(200, json!({"use_browser_tts": true}));
    let synth = FakeSynth::new(true);
    let output = FakeOutput::new(PlayBehavior::Ends);
    let voice = VoiceConfig {
        voice_name: "Puck".to_string(),
        language_code: "en-GB".to_string(),
        speaking_rate: 9.0,
        ..VoiceConfig::default()
    };
    let tts = common::pipeline_with_voice(&transport, &synth, &output, voice);

    tts.speak("## Lesson one").await;

    let request = &transport.requests()[0];
    assert_eq!(request.url, "/api/tts");
    let body = request.body.as_ref().unwrap();
    assert_eq!(body["text"], "Lesson one");
    assert_eq!(body["voice_name"], "Puck");
    assert_eq!(body["language_code"], "en-GB");
    assert_eq!(body["speaking_rate"], 4.0);

    let (_, rate, language) = synth.calls()[0].clone();
    assert!((rate - 4.0).abs() < f32::EPSILON);
    assert_eq!(language, "en-GB");
}

#[tokio::test(start_paused = true)]
async fn test_network_failure_falls_back_after_retries() {
    let transport = FakeTransport::new();
    for _ in 0..3 {
        transport.push_error("connection refused");
    }
    let synth = FakeSynth::new(true);
    let output = FakeOutput::new(PlayBehavior::Ends);
    let tts = pipeline(&transport, &synth, &output);

    assert!(tts.speak("Fallback please").await);

    assert_eq!(transport.calls(), 3);
    assert_eq!(synth.utterances(), vec!["Fallback please".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_falls_back() {
    let transport = FakeTransport::new();
    for _ in 0..3 {
        transport.push_hang();
    }
    let synth = FakeSynth::new(true);
    let output = FakeOutput::new(PlayBehavior::Ends);
    let tts = pipeline(&transport, &synth, &output);

    assert!(tts.speak("Too slow").await);
    assert_eq!(synth.utterances().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_server_error_falls_back() {
    let transport = FakeTransport::new();
    transport.always_json(500, json!({"detail": "TTS quota exceeded"}));
    let synth = FakeSynth::new(true);
    let output = FakeOutput::new(PlayBehavior::Ends);
    let tts = pipeline(&transport, &synth, &output);

    assert!(tts.speak("Hello").await);
    assert_eq!(synth.utterances().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_or_empty_audio_falls_back() {
    for reply in [
        json!({"audio_data": "***", "content_type": "audio/mpeg"}),
        json!({"audio_data": "", "content_type": "audio/mpeg"}),
        json!({}),
    ] {
        let transport = FakeTransport::new();
        transport.push_json(200, reply);
        let synth = FakeSynth::new(true);
        let output = FakeOutput::new(PlayBehavior::Ends);
        let tts = pipeline(&transport, &synth, &output);

        assert!(tts.speak("Hello").await);
        assert_eq!(synth.utterances().len(), 1);
        assert!(output.clips().is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn test_play_start_failure_falls_back_and_releases() {
    let transport = FakeTransport::new();
    transport.push_json(200, pcm_reply(&[0u8; 32]));
    let synth = FakeSynth::new(true);
    let output = FakeOutput::new(PlayBehavior::FailsToStart);
    let tts = pipeline(&transport, &synth, &output);

    assert!(tts.speak("Blocked").await);

    assert_eq!(synth.utterances().len(), 1);
    assert_eq!(output.revoked().len(), 1);
    assert_eq!(output.revoked(), output.resources());
}

#[tokio::test(start_paused = true)]
async fn test_mid_playback_error_falls_back_and_releases() {
    let transport = FakeTransport::new();
    transport.push_json(200, pcm_reply(&[0u8; 32]));
    let synth = FakeSynth::new(false);
    let output = FakeOutput::new(PlayBehavior::ErrorsMidway);
    let tts = pipeline(&transport, &synth, &output);

    assert!(!tts.speak("Glitch").await);

    assert_eq!(synth.utterances().len(), 1);
    assert_eq!(output.revoked().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_remote_disabled_skips_request() {
    let transport = FakeTransport::new();
    let synth = FakeSynth::new(true);
    let output = FakeOutput::new(PlayBehavior::Ends);
    let voice = VoiceConfig {
        remote_tts_enabled: false,
        ..VoiceConfig::default()
    };
    let tts = common::pipeline_with_voice(&transport, &synth, &output, voice);

    assert!(tts.speak("Local only").await);
    assert_eq!(transport.calls(), 0);
    assert_eq!(synth.utterances(), vec!["Local only".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_speak_calls_are_serialized() {
    let transport = FakeTransport::new();
    transport.always_json(200, pcm_reply(&[0u8; 32]));
    let synth = FakeSynth::new(true);
    let output = FakeOutput::new(PlayBehavior::EndsAfter(Duration::from_secs(2)));
    let tts = pipeline(&transport, &synth, &output);

    let (first, second) = tokio::join!(tts.speak("First"), tts.speak("Second"));
    assert!(first && second);

    let times = transport.call_times();
    assert_eq!(times.len(), 2);
    assert!(times[1] - times[0] >= Duration::from_secs(2));

    let texts: Vec<String> = transport
        .requests()
        .iter()
        .map(|r| r.body.as_ref().unwrap()["text"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(texts, vec!["First", "Second"]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_speaking_cancels_on_device_voice() {
    let transport = FakeTransport::new();
    let synth = FakeSynth::new(true);
    let output = FakeOutput::new(PlayBehavior::Ends);
    let tts = pipeline(&transport, &synth, &output);

    tts.stop_speaking();

    assert_eq!(synth.cancels(), 1);
    assert!(!tts.is_speaking());
    assert_eq!(output.stops(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_play_synthesis_fallback_speaks_sanitized_text() {
    let transport = FakeTransport::new();
    let synth = FakeSynth::new(true);
    let output = FakeOutput::new(PlayBehavior::Ends);
    let tts = pipeline(&transport, &synth, &output);

    assert!(
        tts.play_synthesis(SynthesisResult::fallback(), "*Well* done 🎉")
            .await
    );

    assert_eq!(synth.utterances(), vec!["Well done".to_string()]);
    assert_eq!(transport.calls(), 0);
}
