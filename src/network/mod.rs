//! Network subsystem: TCP listener, streaming session and receiver

pub mod interfaces;
pub mod listener;
pub mod receiver;
pub mod sender;
pub mod session;

pub use listener::{ConnectionListener, Endpoint};
pub use receiver::{ReceiverEvent, ReceiverStats, StreamReceiver};
pub use sender::{SenderController, SenderHandle};
pub use session::{SessionEvent, SessionState, SessionStatus, StreamingSession};
