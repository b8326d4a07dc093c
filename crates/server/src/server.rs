use std::io::{self, BufRead, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::ServerConfig;
use crate::events::{DisconnectReason, ServerEvent};
use crate::world::World;

/// Work handed from connection threads to the model thread.
enum Inbound {
    Connected {
        client_id: u32,
        addr: SocketAddr,
        stream: TcpStream,
    },
    Line {
        client_id: u32,
        line: String,
    },
    Closed {
        client_id: u32,
    },
    Shutdown,
}

pub struct RelayServer {
    listener: TcpListener,
    config: ServerConfig,
    running: Arc<AtomicBool>,
    next_client_id: u32,
}

impl RelayServer {
    pub fn bind(bind_addr: &str, config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(bind_addr)?;
        listener.set_nonblocking(true)?;

        Ok(Self {
            listener,
            config,
            running: Arc::new(AtomicBool::new(true)),
            next_client_id: 1,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Accepts connections until the running flag is cleared, then closes
    /// every client and waits for the model thread.
    pub fn run(&mut self) -> io::Result<()> {
        let (tx, rx) = mpsc::channel();
        let model = spawn_model(World::new(&self.config), rx)?;
        let interval = Duration::from_millis(self.config.accept_interval_ms);

        while self.running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = self.admit(stream, addr, &tx) {
                        log::error!("failed to admit {}: {}", addr, e);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(interval),
                Err(e) => log::warn!("accept failed: {}", e),
            }
        }

        if tx.send(Inbound::Shutdown).is_err() {
            log::warn!("model thread stopped before shutdown");
        }
        model
            .join()
            .map_err(|_| io::Error::other("model thread panicked"))
    }

    fn admit(
        &mut self,
        stream: TcpStream,
        addr: SocketAddr,
        tx: &Sender<Inbound>,
    ) -> io::Result<()> {
        prepare_stream(&stream, &self.config)?;
        let writer = stream.try_clone()?;

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        // The model must see the connection before any of its lines.
        tx.send(Inbound::Connected {
            client_id,
            addr,
            stream: writer,
        })
        .map_err(|_| io::Error::other("model thread has stopped"))?;

        let tx = tx.clone();
        thread::Builder::new()
            .name(format!("craft-conn-{}", client_id))
            .spawn(move || read_lines(client_id, stream, tx))?;
        Ok(())
    }
}

/// Accepted sockets block on reads; writes give up after the configured
/// timeout so one stalled peer cannot hold up the model thread.
fn prepare_stream(stream: &TcpStream, config: &ServerConfig) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    let timeout = (config.write_timeout_ms > 0)
        .then(|| Duration::from_millis(config.write_timeout_ms));
    stream.set_write_timeout(timeout)
}

fn spawn_model(
    mut world: World<TcpStream>,
    rx: Receiver<Inbound>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("craft-model".to_string())
        .spawn(move || {
            for inbound in rx {
                match inbound {
                    Inbound::Connected {
                        client_id,
                        addr,
                        stream,
                    } => {
                        world.connect(client_id, addr, stream);
                    }
                    Inbound::Line { client_id, line } => world.handle_line(client_id, &line),
                    Inbound::Closed { client_id } => {
                        world.disconnect(client_id, DisconnectReason::Graceful)
                    }
                    Inbound::Shutdown => {
                        log::info!(
                            "closing {} clients, {} blocks stored",
                            world.client_count(),
                            world.block_count()
                        );
                        world.close_all();
                        world.drain_events().for_each(|event| event.log());
                        break;
                    }
                }
                world.drain_events().for_each(|event| event.log());
            }
        })
}

fn read_lines(client_id: u32, stream: TcpStream, tx: Sender<Inbound>) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line: String = String::from_utf8_lossy(&buf)
                    .chars()
                    .filter(|c| *c != '\r' && *c != '\n')
                    .collect();
                if tx.send(Inbound::Line { client_id, line }).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let event = ServerEvent::Error {
                    message: format!("read from client {} failed: {}", client_id, e),
                };
                event.log();
                break;
            }
        }
    }

    if tx.send(Inbound::Closed { client_id }).is_err() {
        log::debug!("client {} closed after the model thread stopped", client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use craft_net::{Client, ClientConfig, ServerMessage};

    fn start_server(config: ServerConfig) -> (u16, Arc<AtomicBool>, JoinHandle<io::Result<()>>) {
        let mut server = RelayServer::bind("127.0.0.1:0", config).unwrap();
        let port = server.local_addr().unwrap().port();
        let running = server.running();
        let handle = thread::spawn(move || server.run());
        (port, running, handle)
    }

    fn join(port: u16) -> Client {
        let mut client = Client::new(ClientConfig::default()).unwrap();
        client.enable();
        client.connect("127.0.0.1", port).unwrap();
        client.start().unwrap();
        client
    }

    fn wait_for<F>(client: &Client, mut accept: F) -> Option<ServerMessage>
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(2) {
            match client.poll_message().unwrap() {
                Some(message) if accept(&message) => return Some(message),
                Some(_) => {}
                None => thread::sleep(Duration::from_millis(1)),
            }
        }
        None
    }

    #[test]
    fn test_relay_between_two_clients() {
        let (port, running, handle) = start_server(ServerConfig::default());

        let mut alice = join(port);
        let alice_id = match wait_for(&alice, |m| matches!(m, ServerMessage::You { .. })) {
            Some(ServerMessage::You { id, .. }) => id,
            other => panic!("expected U, got {:?}", other),
        };

        let mut bob = join(port);
        let bob_id = match wait_for(&bob, |m| matches!(m, ServerMessage::You { .. })) {
            Some(ServerMessage::You { id, .. }) => id,
            other => panic!("expected U, got {:?}", other),
        };
        assert_ne!(alice_id, bob_id);
        assert!(
            wait_for(&alice, |m| matches!(m, ServerMessage::Position { id, .. } if *id == bob_id))
                .is_some()
        );

        alice.send_block_edit(0, 0, 3, 4, 5, 6).unwrap();
        assert_eq!(
            wait_for(&bob, |m| matches!(m, ServerMessage::Block { .. })),
            Some(ServerMessage::Block {
                p: 0,
                q: 0,
                x: 3,
                y: 4,
                z: 5,
                w: 6,
            })
        );

        bob.send_chunk_request(0, 0).unwrap();
        assert!(wait_for(&bob, |m| matches!(m, ServerMessage::Block { x: 3, .. })).is_some());

        alice.send_talk("hi bob").unwrap();
        assert_eq!(
            wait_for(&bob, |m| matches!(m, ServerMessage::Talk { .. })),
            Some(ServerMessage::Talk {
                id: alice_id,
                text: "hi bob".to_string(),
            })
        );

        bob.stop().unwrap();
        assert_eq!(
            wait_for(&alice, |m| matches!(m, ServerMessage::Disconnect { .. })),
            Some(ServerMessage::Disconnect { id: bob_id })
        );

        running.store(false, Ordering::SeqCst);
        handle.join().unwrap().unwrap();

        // The server closed the remaining connection on its way out.
        let start = Instant::now();
        while alice.is_receiving() && start.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!alice.is_receiving());
    }

    fn accept_one(server: &RelayServer) -> (TcpStream, SocketAddr, TcpStream) {
        let client = TcpStream::connect(server.local_addr().unwrap()).unwrap();
        let start = Instant::now();
        loop {
            match server.listener.accept() {
                Ok((stream, addr)) => return (stream, addr, client),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    assert!(start.elapsed() < Duration::from_secs(2), "accept timed out");
                    thread::sleep(Duration::from_millis(1));
                }
                Err(e) => panic!("accept failed: {}", e),
            }
        }
    }

    #[test]
    fn test_admitted_stream_gets_write_timeout() {
        let config = ServerConfig {
            write_timeout_ms: 250,
            ..Default::default()
        };
        let server = RelayServer::bind("127.0.0.1:0", config.clone()).unwrap();
        let (stream, _, _client) = accept_one(&server);

        prepare_stream(&stream, &config).unwrap();
        assert_eq!(stream.write_timeout().unwrap(), Some(Duration::from_millis(250)));

        let unlimited = ServerConfig {
            write_timeout_ms: 0,
            ..Default::default()
        };
        prepare_stream(&stream, &unlimited).unwrap();
        assert_eq!(stream.write_timeout().unwrap(), None);
    }

    #[test]
    fn test_admit_fails_once_model_is_gone() {
        let mut server = RelayServer::bind("127.0.0.1:0", ServerConfig::default()).unwrap();
        let (stream, addr, _client) = accept_one(&server);

        let (tx, rx) = mpsc::channel();
        drop(rx);

        assert!(server.admit(stream, addr, &tx).is_err());
    }

    #[test]
    fn test_full_server_hangs_up() {
        let config = ServerConfig {
            max_clients: 1,
            ..Default::default()
        };
        let (port, running, handle) = start_server(config);

        let first = join(port);
        assert!(wait_for(&first, |m| matches!(m, ServerMessage::You { .. })).is_some());

        let mut second = join(port);
        let start = Instant::now();
        while second.is_receiving() && start.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!second.is_receiving());
        assert!(second.check_receiver().is_err());
        assert_eq!(second.poll_message().unwrap(), None);

        running.store(false, Ordering::SeqCst);
        handle.join().unwrap().unwrap();
    }
}
