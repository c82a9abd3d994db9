//! Sender control task
//!
//! A single task serializes everything that touches the session: user
//! commands, inbound connections, capture events and peer-close
//! notifications. Callers talk to it through a cloneable `SenderHandle`.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audio::capture::{CaptureBackend, CaptureEvent};
use crate::config::NetworkConfig;
use crate::error::{Error, NetworkError, SessionError};
use crate::network::listener::{ConnectionListener, Endpoint};
use crate::network::session::{SessionEvent, SessionState, SessionStatus, StreamingSession};
use crate::protocol::AudioFormat;

/// Backlog of session events kept for slow subscribers
const EVENT_CAPACITY: usize = 64;

/// Pause after a failed accept so a persistent error cannot spin the loop
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

type Reply = oneshot::Sender<Result<(), SessionError>>;

enum Command {
    Start { format: AudioFormat, reply: Reply },
    Stop { reply: Reply },
    SelectDevice { device_id: String, reply: Reply },
    Shutdown,
}

/// Cloneable handle to a running sender
#[derive(Clone)]
pub struct SenderHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
    status: Arc<RwLock<SessionStatus>>,
    endpoint: Endpoint,
}

impl SenderHandle {
    /// Write the settings header and start streaming `format`
    pub async fn start(&self, format: AudioFormat) -> Result<(), Error> {
        self.request(|reply| Command::Start { format, reply }).await
    }

    /// Stop streaming, keeping the receiver connected
    pub async fn stop(&self) -> Result<(), Error> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Choose the input device for the next start
    pub async fn select_device(&self, device_id: impl Into<String>) -> Result<(), Error> {
        let device_id = device_id.into();
        self.request(|reply| Command::SelectDevice { device_id, reply }).await
    }

    /// Stop the control task; the session ends in `Stopped`
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.read().clone()
    }

    pub fn state(&self) -> SessionState {
        self.status.read().state
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<(), Error> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| NetworkError::ControllerClosed)?;
        response
            .await
            .map_err(|_| NetworkError::ControllerClosed)?
            .map_err(Error::from)
    }
}

/// Spawns the control task for one sender
pub struct SenderController;

impl SenderController {
    /// Bind the listener and start the control task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        config: &NetworkConfig,
        device_id: &str,
        backend: Box<dyn CaptureBackend>,
    ) -> Result<(SenderHandle, JoinHandle<()>), Error> {
        let listener = ConnectionListener::bind_and_listen(config)?;
        let endpoint = listener.endpoint()?;

        let (capture_tx, capture_rx) = mpsc::channel(config.capture_queue);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (commands, command_rx) = mpsc::channel(16);

        let mut session =
            StreamingSession::new(backend, config.framing, capture_tx, events.clone());
        session.select_device(device_id)?;
        session.on_listening(endpoint);

        let status = Arc::new(RwLock::new(session.status()));
        let handle = SenderHandle {
            commands,
            events,
            status: status.clone(),
            endpoint,
        };

        let task = tokio::spawn(run(session, listener, endpoint, command_rx, capture_rx, status));
        Ok((handle, task))
    }
}

async fn run(
    mut session: StreamingSession,
    listener: ConnectionListener,
    endpoint: Endpoint,
    mut commands: mpsc::Receiver<Command>,
    mut capture_rx: mpsc::Receiver<CaptureEvent>,
    status: Arc<RwLock<SessionStatus>>,
) {
    let (closed_tx, mut closed_rx) = mpsc::channel::<Uuid>(4);

    loop {
        let mut answer: Option<(Reply, Result<(), SessionError>)> = None;

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Start { format, reply }) => {
                    answer = Some((reply, session.start(format).await));
                }
                Some(Command::Stop { reply }) => {
                    answer = Some((reply, session.stop().await));
                }
                Some(Command::SelectDevice { device_id, reply }) => {
                    answer = Some((reply, session.select_device(&device_id)));
                }
                Some(Command::Shutdown) | None => break,
            },
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    if !session.accepts_peer() {
                        tracing::warn!(
                            "Refusing {}: a receiver is already {}",
                            addr,
                            session.state()
                        );
                        drop(stream);
                    } else {
                        let (read_half, write_half) = stream.into_split();
                        match session.attach(Box::new(write_half), addr) {
                            Ok(id) => {
                                tokio::spawn(watch_peer(read_half, id, closed_tx.clone()));
                            }
                            Err(e) => tracing::warn!("Refusing {}: {}", addr, e),
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            },
            Some(event) = capture_rx.recv() => {
                session.on_capture_event(event).await;
            }
            Some(peer_id) = closed_rx.recv() => {
                if session.peer_id() == Some(peer_id) {
                    session.on_peer_disconnected().await;
                }
            }
        }

        // the listener stays up, so an idle session is listening again
        if session.state() == SessionState::Idle {
            session.on_listening(endpoint);
        }
        *status.write() = session.status();

        // reply once the snapshot reflects the command
        if let Some((reply, result)) = answer {
            let _ = reply.send(result);
        }
    }

    session.shutdown().await;
    *status.write() = session.status();
    tracing::info!("Sender stopped");
}

/// Report when the receiver closes its side of the connection
async fn watch_peer(mut reader: OwnedReadHalf, id: Uuid, closed: mpsc::Sender<Uuid>) {
    let mut buf = [0u8; 256];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => tracing::trace!(session = %id, "Ignoring {} bytes from receiver", n),
            Err(e) => {
                tracing::debug!(session = %id, "Receiver read failed: {}", e);
                break;
            }
        }
    }
    let _ = closed.send(id).await;
}
