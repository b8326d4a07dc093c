mod client;
mod connector;
mod protocol;
mod queue;
mod receiver;
mod stats;
mod transmitter;

pub use client::{Client, ClientState};
pub use connector::{connect, connect_any};
pub use protocol::{
    ClientMessage, Pose, ProtocolError, ServerMessage, TAG_BLOCK, TAG_CHUNK, TAG_DISCONNECT,
    TAG_POSITION, TAG_TALK, TAG_YOU,
};
pub use queue::LineQueue;
pub use receiver::Receiver;
pub use stats::{TrafficCounters, TrafficStats};
pub use transmitter::Transmitter;
