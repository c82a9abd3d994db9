//! Error types for the audio streaming application

use thiserror::Error;

use crate::network::SessionState;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Capture stream failed to start: {0}")]
    CaptureStart(String),

    #[error("Capture stream stopped with error: {0}")]
    Capture(String),

    #[error("Playback stream failed: {0}")]
    Playback(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("No local address could be bound: {0}")]
    Bind(String),

    #[error("Listener is not bound")]
    NotBound,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Sender controller is gone")]
    ControllerClosed,
}

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Settings header does not start with '{{{{{{'")]
    MissingMarker,

    #[error("Settings header has {0} fields, expected 6")]
    FieldCount(usize),

    #[error("Invalid {field} in settings header: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("Settings header is not valid UTF-8")]
    NotUtf8,

    #[error("Unknown frame kind: {0:#04x}")]
    UnknownFrameKind(u8),

    #[error("Frame payload too large: {0} bytes")]
    FrameTooLarge(usize),
}

/// Streaming session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Cannot {op} while session is {state}")]
    InvalidState { op: &'static str, state: SessionState },

    #[error("Invalid audio format: {0}")]
    InvalidFormat(String),

    #[error("Capture error: {0}")]
    Capture(#[from] AudioError),

    #[error("Peer write failed: {0}")]
    PeerWrite(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
