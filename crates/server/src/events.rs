use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected {
        client_id: u32,
        addr: SocketAddr,
    },
    ClientDisconnected {
        client_id: u32,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    SendFailed,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::SendFailed => "dropped after failed send",
            DisconnectReason::Shutdown => "closed at shutdown",
        }
    }
}

impl ServerEvent {
    pub fn log(&self) {
        match self {
            ServerEvent::ClientConnected { client_id, addr } => {
                log::info!("CONN {} {}", client_id, addr);
            }
            ServerEvent::ClientDisconnected { client_id, reason } => {
                log::info!("DISC {} {}", client_id, reason.as_str());
            }
            ServerEvent::ConnectionDenied { addr, reason } => {
                log::warn!("Connection denied to {}: {}", addr, reason);
            }
            ServerEvent::Error { message } => log::error!("{}", message),
        }
    }
}
