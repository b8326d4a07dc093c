use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

use craft_net::{ClientMessage, Pose, ProtocolError, ServerMessage};

use crate::config::ServerConfig;
use crate::events::{DisconnectReason, ServerEvent};

type ChunkKey = (i32, i32);
type BlockKey = (i32, i32, i32);

/// Outbound half of a client connection.
pub trait PeerLink: Write {
    fn close(&mut self);
}

impl PeerLink for TcpStream {
    fn close(&mut self) {
        if let Err(e) = self.shutdown(Shutdown::Both) {
            log::debug!("peer shutdown: {}", e);
        }
    }
}

struct Peer<L> {
    link: L,
    pose: Pose,
}

/// Everything the relay knows: connected players and edited blocks.
///
/// Only one thread touches a `World`; connection threads feed it lines.
pub struct World<L: PeerLink> {
    peers: BTreeMap<u32, Peer<L>>,
    chunks: HashMap<ChunkKey, HashMap<BlockKey, i32>>,
    max_clients: usize,
    spawn: Pose,
    failed: Vec<u32>,
    pending_events: VecDeque<ServerEvent>,
}

impl<L: PeerLink> World<L> {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            peers: BTreeMap::new(),
            chunks: HashMap::new(),
            max_clients: config.max_clients,
            spawn: config.spawn,
            failed: Vec::new(),
            pending_events: VecDeque::new(),
        }
    }

    pub fn client_count(&self) -> usize {
        self.peers.len()
    }

    pub fn block_count(&self) -> usize {
        self.chunks.values().map(HashMap::len).sum()
    }

    #[cfg(test)]
    pub fn block(&self, p: i32, q: i32, x: i32, y: i32, z: i32) -> Option<i32> {
        self.chunks.get(&(p, q))?.get(&(x, y, z)).copied()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    /// Admits a new player. A refused link is closed and `false` returned.
    pub fn connect(&mut self, client_id: u32, addr: SocketAddr, mut link: L) -> bool {
        if self.peers.len() >= self.max_clients {
            link.close();
            self.pending_events.push_back(ServerEvent::ConnectionDenied {
                addr,
                reason: format!("server full ({} clients)", self.max_clients),
            });
            return false;
        }

        let pose = self.spawn_pose();
        self.peers.insert(client_id, Peer { link, pose });
        self.pending_events
            .push_back(ServerEvent::ClientConnected { client_id, addr });

        self.send(client_id, &ServerMessage::You { id: client_id, pose });
        self.broadcast_except(client_id, &ServerMessage::Position { id: client_id, pose });

        let others: Vec<(u32, Pose)> = self
            .peers
            .iter()
            .filter(|(id, _)| **id != client_id)
            .map(|(id, peer)| (*id, peer.pose))
            .collect();
        for (id, pose) in others {
            self.send(client_id, &ServerMessage::Position { id, pose });
        }

        self.reap();
        true
    }

    pub fn disconnect(&mut self, client_id: u32, reason: DisconnectReason) {
        let Some(mut peer) = self.peers.remove(&client_id) else {
            return;
        };
        peer.link.close();
        self.pending_events
            .push_back(ServerEvent::ClientDisconnected { client_id, reason });
        self.broadcast_except(client_id, &ServerMessage::Disconnect { id: client_id });
        self.reap();
    }

    /// Closes every link without announcing anything.
    pub fn close_all(&mut self) {
        for (client_id, mut peer) in std::mem::take(&mut self.peers) {
            peer.link.close();
            self.pending_events.push_back(ServerEvent::ClientDisconnected {
                client_id,
                reason: DisconnectReason::Shutdown,
            });
        }
    }

    /// Applies one line received from `client_id`.
    pub fn handle_line(&mut self, client_id: u32, line: &str) {
        if !self.peers.contains_key(&client_id) {
            return;
        }
        log::trace!("RECV {} {}", client_id, line);

        let message = match ClientMessage::parse(line) {
            Ok(message) => message,
            Err(ProtocolError::UnknownTag(tag)) => {
                log::debug!("client {} sent unknown command {:?}", client_id, tag);
                return;
            }
            Err(e) => {
                log::warn!("client {} sent malformed line: {}", client_id, e);
                return;
            }
        };

        match message {
            ClientMessage::Position(pose) => {
                if let Some(peer) = self.peers.get_mut(&client_id) {
                    peer.pose = pose;
                }
                self.broadcast_except(client_id, &ServerMessage::Position { id: client_id, pose });
            }
            ClientMessage::Chunk { p, q } => {
                for message in self.chunk_blocks(p, q) {
                    self.send(client_id, &message);
                }
            }
            ClientMessage::Block { p, q, x, y, z, w } => {
                self.chunks.entry((p, q)).or_default().insert((x, y, z), w);
                if w >= 0 {
                    self.broadcast_except(client_id, &ServerMessage::Block { p, q, x, y, z, w });
                }
            }
            ClientMessage::Talk(text) => {
                log::info!("CHAT {} {}", client_id, text);
                if !text.is_empty() {
                    self.broadcast_except(client_id, &ServerMessage::Talk { id: client_id, text });
                }
            }
        }

        self.reap();
    }

    /// Stored blocks of one chunk in coordinate order, erased cells left out.
    fn chunk_blocks(&self, p: i32, q: i32) -> Vec<ServerMessage> {
        let Some(blocks) = self.chunks.get(&(p, q)) else {
            return Vec::new();
        };
        let mut cells: Vec<(&BlockKey, &i32)> = blocks.iter().filter(|(_, w)| **w >= 0).collect();
        cells.sort_unstable_by_key(|(key, _)| **key);
        cells
            .into_iter()
            .map(|(&(x, y, z), &w)| ServerMessage::Block { p, q, x, y, z, w })
            .collect()
    }

    /// New players appear on some stored block, or at the configured spawn.
    fn spawn_pose(&self) -> Pose {
        self.chunks
            .values()
            .flat_map(HashMap::keys)
            .next()
            .map(|&(x, y, z)| Pose::new(x as f32, y as f32, z as f32, 0.0, 0.0))
            .unwrap_or(self.spawn)
    }

    fn send(&mut self, client_id: u32, message: &ServerMessage) {
        let Some(peer) = self.peers.get_mut(&client_id) else {
            return;
        };
        if let Err(e) = write_line(&mut peer.link, &message.encode()) {
            log::warn!("send to client {} failed: {}", client_id, e);
            if !self.failed.contains(&client_id) {
                self.failed.push(client_id);
            }
        }
    }

    fn broadcast_except(&mut self, sender: u32, message: &ServerMessage) {
        let line = message.encode();
        for (client_id, peer) in self.peers.iter_mut() {
            if *client_id == sender {
                continue;
            }
            if let Err(e) = write_line(&mut peer.link, &line) {
                log::warn!("send to client {} failed: {}", client_id, e);
                if !self.failed.contains(client_id) {
                    self.failed.push(*client_id);
                }
            }
        }
    }

    fn reap(&mut self) {
        while let Some(client_id) = self.failed.pop() {
            self.disconnect(client_id, DisconnectReason::SendFailed);
        }
    }
}

fn write_line<W: Write>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.flush()
}
