//! Eikaiwa Voice - voice I/O core for an English conversation tutor
//!
//! This library provides:
//! - Speech capture sessions over a platform recognizer
//! - Resilient access to the tutor backend (timeout, retry, TTL cache)
//! - Speech delivery with remote synthesis and an on-device fallback
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 VoiceConversation                     │
//! │   listen  │  send  │  speak reply                     │
//! └──────┬──────────────┬──────────────────┬─────────────┘
//!        │              │                  │
//! ┌──────▼──────┐ ┌─────▼──────┐ ┌─────────▼────────────┐
//! │  Capture    │ │ ChatClient │ │ TtsPipeline          │
//! │  controller │ │            │ │ sanitize → synth →   │
//! │             │ │            │ │ PCM→WAV → play │ voice│
//! └─────────────┘ └─────┬──────┘ └─────────┬────────────┘
//!                       │                  │
//!                ┌──────▼──────────────────▼──────┐
//!                │ ResilientClient → Transport    │
//!                └────────────────────────────────┘
//! ```

pub mod chat;
pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod voice;

pub use chat::{ChatClient, ChatMessage, ConversationHistory};
pub use client::{ClientSettings, ResilientClient, RetryPolicy};
pub use config::Config;
pub use conversation::{TurnOutcome, VoiceConversation};
pub use error::{Error, ErrorKind, RecognitionErrorKind, Result};
pub use voice::{SpeechCaptureController, TtsPipeline};
