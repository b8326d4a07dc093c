use std::io;

use crate::net::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("failed to resolve {host}:{port}: {reason}")]
    Resolve {
        host: String,
        port: u16,
        reason: String,
    },
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("send failed: {0}")]
    Write(#[source] io::Error),
    #[error("recv failed: {0}")]
    Read(#[source] io::Error),
    #[error("connection closed by server")]
    ConnectionClosed,
    #[error("failed to spawn receive thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("receive thread panicked")]
    Join,
    #[error("not connected")]
    NotConnected,
    #[error("already connected to {0}")]
    AlreadyConnected(std::net::SocketAddr),
    #[error("line too long: {length} bytes (max {max})")]
    LineTooLong { length: usize, max: usize },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, NetError>;
