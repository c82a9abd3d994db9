//! Streaming session: one peer socket, one capture handle
//!
//! ```text
//!  Idle/Listening ──attach──▶ Connected ──start──▶ Streaming
//!        ▲                      ▲  │                 │  │
//!        │                      │  └──────stop───────┘  │
//!        │                      └────────stop───────────┘
//!        └────────── peer disconnected (from any) ───────┘
//! ```
//!
//! The session owns both resources exclusively. Every method runs on the
//! control task; opening and stopping a capture stream can block, so those
//! calls go through the blocking pool.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::audio::capture::{
    CaptureBackend, CaptureEvent, CaptureEventKind, CaptureHandle, CaptureSink, CaptureState,
};
use crate::error::{AudioError, SessionError};
use crate::network::listener::Endpoint;
use crate::protocol::{AudioFormat, Framing, WireMessage};

/// Write half of the peer connection
pub type PeerWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Listening,
    Connected,
    Streaming,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Listening => "listening",
            SessionState::Connected => "connected",
            SessionState::Streaming => "streaming",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Notifications for the UI layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Connected { session_id: Uuid, peer: SocketAddr },
    Disconnected { session_id: Uuid },
    Started { format: AudioFormat },
    Stopped,
    CaptureError { message: String },
}

/// Serializable snapshot of the session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub session_id: Option<Uuid>,
    pub state: SessionState,
    pub endpoint: Option<Endpoint>,
    pub peer: Option<SocketAddr>,
    pub connected_at: Option<DateTime<Utc>>,
    pub device_id: String,
    pub format: Option<AudioFormat>,
    pub framing: Framing,
    pub bytes_sent: u64,
    pub captures_opened: u64,
    pub captures_released: u64,
    /// Capture chunks lost because the control task fell behind
    pub dropped_chunks: u64,
    pub last_error: Option<String>,
}

struct PeerLink {
    id: Uuid,
    addr: SocketAddr,
    writer: PeerWriter,
    connected_at: DateTime<Utc>,
    bytes_sent: u64,
}

/// Owns the lifecycle of one capture-to-socket stream
pub struct StreamingSession {
    state: SessionState,
    endpoint: Option<Endpoint>,
    peer: Option<PeerLink>,
    capture: Option<Box<dyn CaptureHandle>>,
    /// Sink given to the current capture handle
    capture_sink: Option<CaptureSink>,
    backend: Arc<Mutex<Box<dyn CaptureBackend>>>,
    device_id: String,
    format: Option<AudioFormat>,
    framing: Framing,
    capture_tx: mpsc::Sender<CaptureEvent>,
    /// Identifies the current capture handle; bumped on every open
    generation: u64,
    events: broadcast::Sender<SessionEvent>,
    captures_opened: u64,
    captures_released: u64,
    /// Drops counted by already released sinks
    dropped_chunks: u64,
    last_error: Option<String>,
}

impl StreamingSession {
    pub fn new(
        backend: Box<dyn CaptureBackend>,
        framing: Framing,
        capture_tx: mpsc::Sender<CaptureEvent>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            endpoint: None,
            peer: None,
            capture: None,
            capture_sink: None,
            backend: Arc::new(Mutex::new(backend)),
            device_id: String::new(),
            format: None,
            framing,
            capture_tx,
            generation: 0,
            events,
            captures_opened: 0,
            captures_released: 0,
            dropped_chunks: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer_id(&self) -> Option<Uuid> {
        self.peer.as_ref().map(|p| p.id)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Format of the current or most recent stream
    pub fn format(&self) -> Option<&AudioFormat> {
        self.format.as_ref()
    }

    /// (opened, released) capture handle counts
    pub fn capture_counts(&self) -> (u64, u64) {
        (self.captures_opened, self.captures_released)
    }

    /// The listener is bound and waiting for a peer
    pub fn on_listening(&mut self, endpoint: Endpoint) {
        self.endpoint = Some(endpoint);
        if self.state == SessionState::Idle {
            self.state = SessionState::Listening;
        }
    }

    /// Whether a new inbound connection may be attached
    pub fn accepts_peer(&self) -> bool {
        matches!(self.state, SessionState::Idle | SessionState::Listening)
    }

    /// Take ownership of an accepted peer connection.
    ///
    /// Refused while another peer is attached; the refused writer is
    /// dropped, closing it.
    pub fn attach(&mut self, writer: PeerWriter, addr: SocketAddr) -> Result<Uuid, SessionError> {
        if !self.accepts_peer() {
            return Err(SessionError::InvalidState {
                op: "attach a peer",
                state: self.state,
            });
        }

        let id = Uuid::new_v4();
        self.peer = Some(PeerLink {
            id,
            addr,
            writer,
            connected_at: Utc::now(),
            bytes_sent: 0,
        });
        self.state = SessionState::Connected;
        tracing::info!(session = %id, "Receiver connected from {}", addr);
        self.emit(SessionEvent::Connected {
            session_id: id,
            peer: addr,
        });
        Ok(id)
    }

    /// Choose the capture device used by the next `start`
    pub fn select_device(&mut self, device_id: &str) -> Result<(), SessionError> {
        if self.state == SessionState::Streaming {
            return Err(SessionError::InvalidState {
                op: "change device",
                state: self.state,
            });
        }
        self.device_id = device_id.to_string();
        Ok(())
    }

    /// Send the settings header and start forwarding captured audio.
    ///
    /// Calling it while streaming restarts with a fresh capture handle;
    /// the old one is always released before the new one is opened.
    pub async fn start(&mut self, format: AudioFormat) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::Connected | SessionState::Streaming) {
            return Err(SessionError::InvalidState {
                op: "start",
                state: self.state,
            });
        }
        format.validate().map_err(SessionError::InvalidFormat)?;

        self.release_capture().await;
        self.write_message(&WireMessage::Settings(format.clone())).await?;

        self.generation += 1;
        let sink = CaptureSink::new(self.capture_tx.clone(), self.generation);
        let opened = open_capture(
            self.backend.clone(),
            self.device_id.clone(),
            format.clone(),
            sink.clone(),
        );
        let handle = match opened.await {
            Ok(handle) => handle,
            Err(e) => {
                let e = match e {
                    AudioError::CaptureStart(_) => e,
                    other => AudioError::CaptureStart(other.to_string()),
                };
                tracing::error!("Capture failed to start: {}", e);
                self.last_error = Some(e.to_string());
                return Err(e.into());
            }
        };
        self.captures_opened += 1;

        if handle.state() != CaptureState::Active {
            let state = handle.state();
            stop_capture(handle).await;
            self.captures_released += 1;
            let e = AudioError::CaptureStart(format!("capture stream is {:?}", state));
            self.last_error = Some(e.to_string());
            return Err(e.into());
        }

        tracing::info!(session = ?self.peer_id(), "Streaming {}", format);
        self.capture = Some(handle);
        self.capture_sink = Some(sink);
        self.format = Some(format.clone());
        self.state = SessionState::Streaming;
        self.last_error = None;
        self.emit(SessionEvent::Started { format });
        Ok(())
    }

    /// Release the capture stream and send the stop marker. The peer stays
    /// connected. No-op unless connected or streaming.
    pub async fn stop(&mut self) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::Connected | SessionState::Streaming) {
            return Ok(());
        }

        self.release_capture().await;
        if self.peer.is_some() {
            self.write_message(&WireMessage::Stop).await?;
        }
        self.emit(SessionEvent::Stopped);
        Ok(())
    }

    /// Handle data or a state change from the capture thread
    pub async fn on_capture_event(&mut self, event: CaptureEvent) {
        if event.generation != self.generation || self.capture.is_none() {
            tracing::trace!("Dropping event from released capture {}", event.generation);
            return;
        }

        match event.kind {
            CaptureEventKind::Data(data) => {
                if self.state != SessionState::Streaming || data.is_empty() {
                    return;
                }
                // a failed write already tore the session down
                let _ = self.write_message(&WireMessage::Audio(data)).await;
            }
            CaptureEventKind::StateChanged { state, error } => {
                self.on_capture_state_changed(state, error);
            }
        }
    }

    fn on_capture_state_changed(&mut self, state: CaptureState, error: Option<String>) {
        match (state, error) {
            (CaptureState::Stopped, Some(message)) => {
                tracing::error!("Capture stopped with error: {}", message);
                let e = AudioError::Capture(message);
                self.last_error = Some(e.to_string());
                self.emit(SessionEvent::CaptureError {
                    message: e.to_string(),
                });
            }
            (CaptureState::Stopped, None) => tracing::debug!("Capture stopped without errors"),
            (CaptureState::Active, _) => tracing::debug!("Capture is recording"),
            (CaptureState::Suspended, _) => tracing::debug!("Capture suspended"),
            (CaptureState::Idle, _) => tracing::debug!("Capture idle"),
        }
    }

    /// Tear everything down after the peer went away
    pub async fn on_peer_disconnected(&mut self) {
        self.release_capture().await;
        if let Some(peer) = self.peer.take() {
            tracing::info!(
                session = %peer.id,
                "Receiver {} disconnected after {} bytes",
                peer.addr,
                peer.bytes_sent
            );
            self.emit(SessionEvent::Disconnected { session_id: peer.id });
        }
        self.state = SessionState::Idle;
    }

    /// Final teardown when the controller exits
    pub async fn shutdown(&mut self) {
        self.release_capture().await;
        self.peer = None;
        self.state = SessionState::Stopped;
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.peer_id(),
            state: self.state,
            endpoint: self.endpoint,
            peer: self.peer.as_ref().map(|p| p.addr),
            connected_at: self.peer.as_ref().map(|p| p.connected_at),
            device_id: self.device_id.clone(),
            format: self.format.clone(),
            framing: self.framing,
            bytes_sent: self.peer.as_ref().map_or(0, |p| p.bytes_sent),
            captures_opened: self.captures_opened,
            captures_released: self.captures_released,
            dropped_chunks: self.dropped_chunks
                + self.capture_sink.as_ref().map_or(0, |s| s.dropped_chunks()),
            last_error: self.last_error.clone(),
        }
    }

    async fn release_capture(&mut self) {
        if let Some(handle) = self.capture.take() {
            stop_capture(handle).await;
            self.captures_released += 1;
        }
        if let Some(sink) = self.capture_sink.take() {
            let dropped = sink.dropped_chunks();
            if dropped > 0 {
                tracing::warn!(
                    "Capture generation {} lost {} chunks",
                    sink.generation(),
                    dropped
                );
            }
            self.dropped_chunks += dropped;
        }
        if self.state == SessionState::Streaming {
            self.state = SessionState::Connected;
        }
    }

    async fn write_message(&mut self, message: &WireMessage) -> Result<(), SessionError> {
        let Some(peer) = self.peer.as_mut() else {
            return Err(SessionError::PeerWrite("no peer attached".into()));
        };

        let bytes = self.framing.encode(message);
        let result = async {
            peer.writer.write_all(&bytes).await?;
            peer.writer.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                peer.bytes_sent += bytes.len() as u64;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Write to receiver failed: {}", e);
                self.on_peer_disconnected().await;
                Err(SessionError::PeerWrite(e.to_string()))
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Open a capture stream on the blocking pool; it waits for the device
async fn open_capture(
    backend: Arc<Mutex<Box<dyn CaptureBackend>>>,
    device_id: String,
    format: AudioFormat,
    sink: CaptureSink,
) -> Result<Box<dyn CaptureHandle>, AudioError> {
    tokio::task::spawn_blocking(move || backend.lock().open(&device_id, &format, sink))
        .await
        .unwrap_or_else(|e| Err(AudioError::CaptureStart(e.to_string())))
}

/// Stop a capture handle on the blocking pool; it joins the capture thread
async fn stop_capture(mut handle: Box<dyn CaptureHandle>) {
    if let Err(e) = tokio::task::spawn_blocking(move || handle.stop()).await {
        tracing::error!("Stopping capture failed: {}", e);
    }
}
