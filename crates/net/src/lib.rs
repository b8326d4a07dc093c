pub mod config;
pub mod error;
pub mod net;

pub use config::{Backoff, ClientConfig, DEFAULT_HOST, DEFAULT_PORT};
pub use error::{NetError, Result};
pub use net::{
    Client, ClientMessage, ClientState, LineQueue, Pose, ProtocolError, ServerMessage,
    TrafficStats, Transmitter,
};
