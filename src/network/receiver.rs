//! Receiving side: connect to a sender and decode its stream

use bytes::Bytes;
use std::net::SocketAddr;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::{Error, NetworkError};
use crate::protocol::{AudioFormat, Framing, WireMessage};

/// Read buffer size
const READ_CHUNK: usize = 16 * 1024;

/// What the receiver observed on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverEvent {
    /// A settings header arrived; audio that follows uses this format
    Configured(AudioFormat),
    Audio(Bytes),
    /// The sender stopped streaming but kept the connection
    Stopped,
    Disconnected,
}

/// Receiver statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub bytes_received: u64,
    pub audio_bytes: u64,
    pub headers: u64,
    pub stops: u64,
}

/// One connection to a sender
pub struct StreamReceiver {
    stream: TcpStream,
    peer: SocketAddr,
    framing: Framing,
}

impl StreamReceiver {
    pub async fn connect(addr: SocketAddr, framing: Framing) -> Result<Self, NetworkError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", addr, e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!("Failed to set TCP_NODELAY: {}", e);
        }
        tracing::info!("Connected to sender at {} ({:?} framing)", addr, framing);
        Ok(Self {
            stream,
            peer: addr,
            framing,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Decode the stream until the sender disconnects or `events` is
    /// dropped. A protocol error ends the connection.
    pub async fn run(
        mut self,
        events: mpsc::Sender<ReceiverEvent>,
    ) -> Result<ReceiverStats, Error> {
        let mut decoder = self.framing.decoder();
        let mut stats = ReceiverStats::default();
        let mut buf = vec![0u8; READ_CHUNK];

        loop {
            let n = self
                .stream
                .read(&mut buf)
                .await
                .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;
            if n == 0 {
                tracing::info!("Sender {} closed the connection", self.peer);
                let _ = events.send(ReceiverEvent::Disconnected).await;
                return Ok(stats);
            }
            stats.bytes_received += n as u64;
            decoder.feed(&buf[..n]);

            while let Some(message) = decoder.next_message()? {
                let event = match message {
                    WireMessage::Settings(format) => {
                        stats.headers += 1;
                        tracing::info!("Sender announced {}", format);
                        ReceiverEvent::Configured(format)
                    }
                    WireMessage::Audio(data) => {
                        stats.audio_bytes += data.len() as u64;
                        ReceiverEvent::Audio(data)
                    }
                    WireMessage::Stop => {
                        stats.stops += 1;
                        tracing::info!("Sender stopped streaming");
                        ReceiverEvent::Stopped
                    }
                };
                if events.send(event).await.is_err() {
                    return Ok(stats);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn serve(framing: Framing, messages: Vec<WireMessage>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            for message in &messages {
                socket.write_all(&framing.encode(message)).await.unwrap();
            }
        });
        addr
    }

    async fn collect(
        framing: Framing,
        messages: Vec<WireMessage>,
    ) -> (Vec<ReceiverEvent>, ReceiverStats) {
        let addr = serve(framing, messages).await;
        let receiver = StreamReceiver::connect(addr, framing).await.unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let stats = receiver.run(tx).await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (events, stats)
    }

    #[tokio::test]
    async fn test_framed_session() {
        let format = AudioFormat::default();
        let (events, stats) = collect(
            Framing::Framed,
            vec![
                WireMessage::Settings(format.clone()),
                WireMessage::Audio(Bytes::from_static(&[0; 32])),
                WireMessage::Stop,
            ],
        )
        .await;

        assert_eq!(events.first(), Some(&ReceiverEvent::Configured(format)));
        assert!(events.contains(&ReceiverEvent::Stopped));
        assert_eq!(events.last(), Some(&ReceiverEvent::Disconnected));
        assert_eq!(stats.audio_bytes, 32);
        assert_eq!(stats.headers, 1);
        assert_eq!(stats.stops, 1);
    }

    #[tokio::test]
    async fn test_legacy_session_header_only() {
        let format = AudioFormat::default();
        let (events, stats) =
            collect(Framing::Legacy, vec![WireMessage::Settings(format.clone())]).await;
        assert_eq!(
            events,
            vec![ReceiverEvent::Configured(format), ReceiverEvent::Disconnected]
        );
        assert_eq!(stats.audio_bytes, 0);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(matches!(
            StreamReceiver::connect(addr, Framing::Framed).await,
            Err(NetworkError::ConnectionFailed(_))
        ));
    }
}
