//! Connectionless handoff of raw submission bytes between the HTTP side and
//! the storage side.
//!
//! Delivery is at most once: a send returns as soon as the datagram is handed
//! to the OS, nothing is acknowledged and nothing is retried. A datagram that
//! does not fit into [`BUFFER_SIZE`] bytes is refused by the sender and
//! discarded whole by the receiver.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::{UdpSocket, lookup_host};

/// Largest payload carried by the relay.
pub const BUFFER_SIZE: usize = 1024;

#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("could not resolve relay address {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("relay address {0} did not resolve to any socket address")]
    NoAddress(String),

    #[error("could not bind relay socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("relay unavailable at {destination}: {source}")]
    Unavailable {
        destination: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("datagram of {len} bytes exceeds the {limit}-byte relay buffer")]
    Oversized { len: usize, limit: usize },

    #[error("relay receive failed: {0}")]
    Io(#[from] io::Error),
}

impl RelayError {
    /// Short label used to tag metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            RelayError::Resolve { .. } | RelayError::NoAddress(_) => "resolve",
            RelayError::Bind { .. } => "bind",
            RelayError::Unavailable { .. } => "unavailable",
            RelayError::Oversized { .. } => "oversized",
            RelayError::Io(_) => "io",
        }
    }
}

/// Resolves `host:port` to the first address the resolver returns.
///
/// Sender and receiver both resolve through here so that a name such as
/// `localhost` lands on the same address family on both sides.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, RelayError> {
    let addr = format!("{host}:{port}");
    let mut addrs = lookup_host(addr.clone())
        .await
        .map_err(|source| RelayError::Resolve {
            addr: addr.clone(),
            source,
        })?;
    addrs.next().ok_or(RelayError::NoAddress(addr))
}

/// Sending half, owned by the ingestion endpoint.
#[derive(Debug)]
pub struct RelaySender {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl RelaySender {
    /// Binds an ephemeral local socket of the same family as `destination`.
    pub async fn connect(destination: SocketAddr) -> Result<Self, RelayError> {
        let local: SocketAddr = match destination {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| RelayError::Bind {
                addr: local,
                source,
            })?;

        Ok(Self {
            socket,
            destination,
        })
    }

    /// Hands `payload` to the transport without waiting for delivery.
    pub async fn send(&self, payload: &[u8]) -> Result<(), RelayError> {
        if payload.len() > BUFFER_SIZE {
            return Err(RelayError::Oversized {
                len: payload.len(),
                limit: BUFFER_SIZE,
            });
        }

        self.socket
            .send_to(payload, self.destination)
            .await
            .map_err(|source| RelayError::Unavailable {
                destination: self.destination,
                source,
            })?;
        Ok(())
    }
}

/// A single message as it came off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub peer: SocketAddr,
}

/// Receiving half, owned by the receive loop.
#[derive(Debug)]
pub struct RelayReceiver {
    socket: UdpSocket,
    // One spare byte to tell a full buffer apart from a truncated datagram
    buf: Vec<u8>,
}

impl RelayReceiver {
    pub async fn bind(addr: SocketAddr) -> Result<Self, RelayError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;

        Ok(Self {
            socket,
            buf: vec![0; BUFFER_SIZE + 1],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Waits for the next datagram.
    ///
    /// Cancel safe: dropping the future before it completes loses nothing.
    pub async fn recv(&mut self) -> Result<Datagram, RelayError> {
        let (len, peer) = self.socket.recv_from(&mut self.buf).await?;

        if len > BUFFER_SIZE {
            tracing::warn!(%peer, "Discarding datagram larger than the relay buffer");
            return Err(RelayError::Oversized {
                len,
                limit: BUFFER_SIZE,
            });
        }

        Ok(Datagram {
            payload: self.buf[..len].to_vec(),
            peer,
        })
    }
}
