use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;

use super::connector;
use super::protocol::{Pose, ProtocolError, ServerMessage};
use super::queue::{LineQueue, decode_line};
use super::receiver::Receiver;
use super::stats::{TrafficCounters, TrafficStats};
use super::transmitter::Transmitter;
use crate::config::ClientConfig;
use crate::error::{NetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disabled,
    Idle,
    Connected,
    Running,
    Stopped,
}

/// Single-connection game client.
///
/// Every operation is a silent no-op while the client is disabled. Errors are
/// returned rather than acted on: the caller decides whether a failed
/// connection ends the process.
pub struct Client {
    config: ClientConfig,
    enabled: bool,
    state: ClientState,
    stream: Option<TcpStream>,
    peer_addr: Option<SocketAddr>,
    transmitter: Option<Transmitter<TcpStream>>,
    receiver: Option<Receiver>,
    queue: Arc<LineQueue>,
    counters: Arc<TrafficCounters>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            queue: Arc::new(LineQueue::new(config.queue_capacity)),
            counters: Arc::new(TrafficCounters::default()),
            enabled: false,
            state: ClientState::Idle,
            stream: None,
            peer_addr: None,
            transmitter: None,
            receiver: None,
            config,
        })
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn state(&self) -> ClientState {
        if self.enabled {
            self.state
        } else {
            ClientState::Disabled
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn stats(&self) -> TrafficStats {
        self.counters.snapshot()
    }

    /// True while the background receive thread is still reading.
    pub fn is_receiving(&self) -> bool {
        self.receiver.as_ref().is_some_and(Receiver::is_active)
    }

    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if let Some(addr) = self.peer_addr {
            return Err(NetError::AlreadyConnected(addr));
        }

        let (stream, addr) = connector::connect(host, port)?;
        let writer = stream.try_clone().map_err(|e| NetError::Connect {
            host: host.to_string(),
            port,
            source: e,
        })?;

        self.counters.reset();
        self.transmitter = Some(Transmitter::new(
            writer,
            &self.config,
            Arc::clone(&self.counters),
        ));
        self.stream = Some(stream);
        self.peer_addr = Some(addr);
        self.state = ClientState::Connected;
        Ok(())
    }

    /// Spawns the receive thread on the open connection.
    pub fn start(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.receiver.is_some() {
            log::warn!("receive thread already running");
            return Ok(());
        }

        let stream = self.stream.as_ref().ok_or(NetError::NotConnected)?;
        let reader = stream.try_clone().map_err(NetError::Spawn)?;

        self.queue.clear();
        self.receiver = Some(Receiver::spawn(
            reader,
            Arc::clone(&self.queue),
            self.config.clone(),
            Arc::clone(&self.counters),
        )?);
        self.state = ClientState::Running;
        log::debug!("receive thread started");
        Ok(())
    }

    /// Closes the connection and waits for the receive thread to exit.
    ///
    /// Returns the receive thread's own failure if it died before `stop`
    /// was called. Lines already queued stay available to `pop_line`.
    pub fn stop(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let receiver = self.receiver.take();
        if let Some(receiver) = &receiver {
            receiver.request_shutdown();
        }

        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                log::debug!("socket shutdown: {}", e);
            }
        }
        self.transmitter = None;

        if self.peer_addr.take().is_some() || receiver.is_some() {
            self.state = ClientState::Stopped;
        }

        match receiver {
            Some(receiver) => {
                let result = receiver.join();
                log::debug!("receive thread stopped");
                result
            }
            None => Ok(()),
        }
    }

    /// Reaps the receive thread if it has already exited on its own, returning
    /// the failure that ended it. `Ok` while it is still running.
    pub fn check_receiver(&mut self) -> Result<()> {
        if self.is_receiving() {
            return Ok(());
        }
        match self.receiver.take() {
            Some(receiver) => {
                self.state = ClientState::Stopped;
                receiver.join()
            }
            None => Ok(()),
        }
    }

    pub fn send(&mut self, line: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.transmitter()?.send(line)
    }

    /// Returns whether a line was actually transmitted.
    pub fn send_position(
        &mut self,
        x: f32,
        y: f32,
        z: f32,
        yaw: f32,
        pitch: f32,
    ) -> Result<bool> {
        if !self.enabled {
            return Ok(false);
        }
        self.transmitter()?.send_position(Pose::new(x, y, z, yaw, pitch))
    }

    pub fn send_chunk_request(&mut self, p: i32, q: i32) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.transmitter()?.send_chunk_request(p, q)
    }

    pub fn send_block_edit(
        &mut self,
        p: i32,
        q: i32,
        x: i32,
        y: i32,
        z: i32,
        w: i32,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.transmitter()?.send_block_edit(p, q, x, y, z, w)
    }

    pub fn send_talk(&mut self, text: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.transmitter()?.send_talk(text)
    }

    fn transmitter(&mut self) -> Result<&mut Transmitter<TcpStream>> {
        self.transmitter.as_mut().ok_or(NetError::NotConnected)
    }

    /// Takes the next complete line, if any, without blocking.
    pub fn pop_line(&self, max_length: usize) -> Option<String> {
        if !self.enabled {
            return None;
        }
        self.queue.pop_line(max_length)
    }

    /// Byte-exact form of [`pop_line`](Self::pop_line).
    pub fn pop_line_bytes(&self, max_length: usize) -> Option<Vec<u8>> {
        if !self.enabled {
            return None;
        }
        self.queue.pop_line_bytes(max_length)
    }

    /// Takes and parses the next complete line. A malformed line is consumed
    /// and reported; the following call moves on to the next one.
    pub fn poll_message(&self) -> Result<Option<ServerMessage>> {
        let Some(bytes) = self.pop_line_bytes(self.config.max_line_length) else {
            return Ok(None);
        };
        let line = decode_line(bytes)
            .map_err(|e| ProtocolError::InvalidUtf8(e.utf8_error().valid_up_to()))?;
        Ok(Some(ServerMessage::parse(&line)?))
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.receiver.is_some() {
            // stop() is gated on the flag; the thread must be reaped regardless.
            self.enabled = true;
            if let Err(e) = self.stop() {
                log::warn!("receive thread ended with error: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = ClientConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(Client::new(config), Err(NetError::InvalidConfig(_))));
    }

    #[test]
    fn test_disabled_client_is_inert() {
        let mut client = Client::new(ClientConfig::default()).unwrap();
        assert_eq!(client.state(), ClientState::Disabled);

        // Nothing listens on port 1; a real attempt would fail.
        client.connect("127.0.0.1", 1).unwrap();
        client.start().unwrap();
        assert!(!client.send_position(1.0, 2.0, 3.0, 0.0, 0.0).unwrap());
        client.send_chunk_request(0, 0).unwrap();
        client.send_block_edit(0, 0, 1, 2, 3, 4).unwrap();
        client.send_talk("hello").unwrap();
        client.send("C,0,0\n").unwrap();
        assert_eq!(client.pop_line(1024), None);
        assert_eq!(client.poll_message().unwrap(), None);
        client.stop().unwrap();

        assert_eq!(client.peer_addr(), None);
        assert!(!client.is_receiving());
        assert_eq!(client.stats(), TrafficStats::default());
    }

    #[test]
    fn test_disabled_pop_leaves_queue_untouched() {
        let mut client = Client::new(ClientConfig::default()).unwrap();
        assert!(client.queue.try_push(b"C,1,2\n"));

        assert_eq!(client.pop_line(1024), None);
        assert_eq!(client.queue.len(), 6);

        client.enable();
        assert_eq!(client.pop_line(1024).as_deref(), Some("C,1,2"));
    }

    #[test]
    fn test_enabled_without_connection() {
        let mut client = Client::new(ClientConfig::default()).unwrap();
        client.enable();
        assert_eq!(client.state(), ClientState::Idle);

        assert!(matches!(client.start(), Err(NetError::NotConnected)));
        assert!(matches!(
            client.send_chunk_request(0, 0),
            Err(NetError::NotConnected)
        ));
        assert!(client.stop().is_ok());
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[test]
    fn test_poll_message_reports_malformed_line_then_continues() {
        let mut client = Client::new(ClientConfig::default()).unwrap();
        client.enable();
        assert!(client.queue.try_push(b"D,x\nD,3\n"));

        assert!(matches!(client.poll_message(), Err(NetError::Protocol(_))));
        assert_eq!(
            client.poll_message().unwrap(),
            Some(ServerMessage::Disconnect { id: 3 })
        );
        assert_eq!(client.poll_message().unwrap(), None);
    }

    #[test]
    fn test_poll_message_rejects_invalid_utf8() {
        let mut client = Client::new(ClientConfig::default()).unwrap();
        client.enable();
        assert!(client.queue.try_push(b"T,1,\xff\xfe\nT,1,caf\xc3\xa9\n"));

        assert!(matches!(
            client.poll_message(),
            Err(NetError::Protocol(ProtocolError::InvalidUtf8(4)))
        ));
        assert_eq!(
            client.poll_message().unwrap(),
            Some(ServerMessage::Talk {
                id: 1,
                text: "caf\u{e9}".to_string(),
            })
        );
    }

    #[test]
    fn test_pop_line_bytes_is_exact_and_gated() {
        let mut client = Client::new(ClientConfig::default()).unwrap();
        assert!(client.queue.try_push(b"T,1,\xff\n"));
        assert_eq!(client.pop_line_bytes(1024), None);

        client.enable();
        assert_eq!(client.pop_line_bytes(1024), Some(b"T,1,\xff".to_vec()));
    }
}
