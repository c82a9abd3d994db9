//! # Sound Link
//!
//! Streams raw audio from one PC to another over a single TCP connection.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              SENDER PC                               │
//! │  ┌─────────────┐      ┌──────────────────────────────────────────┐   │
//! │  │ Input device│ ───▶ │ Capture thread (audio::capture)          │   │
//! │  └─────────────┘      │  f32 samples ─▶ encode to AudioFormat    │   │
//! │                       └────────────────────┬─────────────────────┘   │
//! │                                            │ CaptureEvent            │
//! │                                            ▼                         │
//! │  ┌──────────────────────────────────────────────────────────────┐    │
//! │  │ Sender control task (network::sender)                        │    │
//! │  │  ConnectionListener ─▶ StreamingSession ─▶ peer socket       │    │
//! │  │  Idle ─ Listening ─ Connected ─ Streaming ─ Stopped          │    │
//! │  └──────────────────────────────────────────────────────────────┘    │
//! │         ▲ start / stop / device            │ SessionEvent            │
//! │  ┌──────┴───────────────────────────────────▼──────────────────┐     │
//! │  │ HTTP control UI (ui) ─ SenderLayout: Editable / ReadOnly    │     │
//! │  └─────────────────────────────────────────────────────────────┘     │
//! └────────────────────────────────────┬─────────────────────────────────┘
//!                                      │ TCP: settings header, audio, stop
//!                                      ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                             RECEIVER PC                              │
//! │  StreamReceiver (network::receiver) ─▶ AudioPlayback ─▶ Output device│
//! │  ReceiverLayout tracks format, mute, buffer size and played time     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod ui;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Codec announced in the settings header
    pub const DEFAULT_CODEC: &str = "audio/pcm";

    /// Capture events buffered between the capture thread and the session
    pub const DEFAULT_CAPTURE_QUEUE: usize = 256;

    /// Playback buffer length in milliseconds
    pub const DEFAULT_PLAYBACK_BUFFER_MS: u32 = 200;

    /// Default port for the HTTP control UI
    pub const DEFAULT_HTTP_PORT: u16 = 8080;
}
