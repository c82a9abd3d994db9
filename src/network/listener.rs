//! TCP listener that hands a single peer to the streaming session

use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::{TcpListener, TcpStream};

use crate::config::NetworkConfig;
use crate::error::NetworkError;
use crate::network::interfaces::local_ipv4_addresses;

/// Pending connections the OS queues for us
const LISTEN_BACKLOG: i32 = 8;

/// Address and port the listener is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        SocketAddr::V4(SocketAddrV4::new(endpoint.address, endpoint.port))
    }
}

/// Listening socket bound to one local IPv4 address
pub struct ConnectionListener {
    listener: Option<TcpListener>,
    endpoint: Option<Endpoint>,
    low_delay: bool,
}

impl ConnectionListener {
    /// A listener that never bound; `endpoint()` fails with `NotBound`
    pub fn unbound() -> Self {
        Self {
            listener: None,
            endpoint: None,
            low_delay: false,
        }
    }

    /// Bind to the configured address, or to the first local non-loopback
    /// IPv4 address that accepts a listener.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind_and_listen(config: &NetworkConfig) -> Result<Self, NetworkError> {
        let candidates = match config.bind_address {
            Some(address) => vec![address],
            None => local_ipv4_addresses(),
        };
        Self::bind_first(&candidates, config.port, config.low_delay)
    }

    /// Try each candidate in turn and keep the first that binds
    pub fn bind_first(
        candidates: &[Ipv4Addr],
        port: u16,
        low_delay: bool,
    ) -> Result<Self, NetworkError> {
        let mut failures = Vec::new();
        for address in candidates {
            match bind_socket(SocketAddrV4::new(*address, port)) {
                Ok(listener) => {
                    let local = listener
                        .local_addr()
                        .map_err(|e| NetworkError::Bind(e.to_string()))?;
                    let endpoint = Endpoint {
                        address: *address,
                        port: local.port(),
                    };
                    tracing::info!("Listening for a receiver on {}", endpoint);
                    return Ok(Self {
                        listener: Some(listener),
                        endpoint: Some(endpoint),
                        low_delay,
                    });
                }
                Err(e) => {
                    tracing::debug!("Cannot listen on {}:{}: {}", address, port, e);
                    failures.push(format!("{}: {}", address, e));
                }
            }
        }

        if failures.is_empty() {
            Err(NetworkError::Bind("no usable IPv4 address".into()))
        } else {
            Err(NetworkError::Bind(failures.join("; ")))
        }
    }

    /// Bound address and port
    pub fn endpoint(&self) -> Result<Endpoint, NetworkError> {
        self.endpoint.ok_or(NetworkError::NotBound)
    }

    /// Wait for the next inbound connection
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), NetworkError> {
        let listener = self.listener.as_ref().ok_or(NetworkError::NotBound)?;
        let (stream, addr) = listener
            .accept()
            .await
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
        if self.low_delay {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
            }
        }
        Ok((stream, addr))
    }
}

fn bind_socket(addr: SocketAddrV4) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::V4(addr).into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;
    TcpListener::from_std(socket.into())
}
