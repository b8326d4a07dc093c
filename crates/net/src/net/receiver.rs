use std::io::{self, Read};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use super::queue::LineQueue;
use super::stats::TrafficCounters;
use crate::config::ClientConfig;
use crate::error::{NetError, Result};

const THREAD_NAME: &str = "craft-net-recv";

/// Reads from `reader` into `queue` until the stream ends.
///
/// End of stream or a read error is fatal (`ConnectionClosed` / `Read`)
/// unless `shutdown` was raised first, in which case the loop ends cleanly.
pub fn run<R: Read>(
    mut reader: R,
    queue: &LineQueue,
    config: &ClientConfig,
    shutdown: &AtomicBool,
    counters: &TrafficCounters,
) -> Result<()> {
    let mut chunk = vec![0u8; config.read_chunk_size];

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => {
                if shutdown.load(Ordering::SeqCst) {
                    log::debug!("receive loop closed");
                    return Ok(());
                }
                log::error!("recv failed: connection closed by server");
                return Err(NetError::ConnectionClosed);
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if shutdown.load(Ordering::SeqCst) {
                    log::debug!("receive loop closed: {}", e);
                    return Ok(());
                }
                log::error!("recv failed: {}", e);
                return Err(NetError::Read(e));
            }
        };

        counters.record_received(n);

        if !queue.push(&chunk[..n], config.backoff, shutdown) {
            log::debug!("receive loop abandoned {} buffered bytes at shutdown", n);
            return Ok(());
        }
    }
}

/// Handle to the background receive thread.
pub struct Receiver {
    handle: JoinHandle<Result<()>>,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
}

struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Receiver {
    pub fn spawn(
        stream: TcpStream,
        queue: Arc<LineQueue>,
        config: ClientConfig,
        counters: Arc<TrafficCounters>,
    ) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicBool::new(true));

        let handle = {
            let shutdown = Arc::clone(&shutdown);
            let guard = ActiveGuard(Arc::clone(&active));
            thread::Builder::new()
                .name(THREAD_NAME.to_string())
                .spawn(move || {
                    let _guard = guard;
                    run(stream, &queue, &config, &shutdown, &counters)
                })
                .map_err(|e| {
                    log::error!("failed to spawn receive thread: {}", e);
                    NetError::Spawn(e)
                })?
        };

        Ok(Self {
            handle,
            shutdown,
            active,
        })
    }

    /// False once the thread has left its loop for any reason.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Marks the coming end of stream as expected. The caller must still
    /// close the socket to unblock a pending read.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn join(self) -> Result<()> {
        self.handle.join().map_err(|_| {
            log::error!("receive thread panicked");
            NetError::Join
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backoff;

    /// Yields its payload in fixed-size pieces, then a final result.
    struct ScriptedReader {
        data: Vec<u8>,
        piece: usize,
        end: Option<io::ErrorKind>,
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.data.is_empty() {
                return match self.end {
                    Some(kind) => Err(io::Error::new(kind, "scripted failure")),
                    None => Ok(0),
                };
            }
            let n = self.piece.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data.drain(..n);
            Ok(n)
        }
    }

    fn config() -> ClientConfig {
        ClientConfig {
            read_chunk_size: 16,
            queue_capacity: 1024,
            ..Default::default()
        }
    }

    #[test]
    fn test_reads_are_reassembled_into_lines() {
        let reader = ScriptedReader {
            data: b"U,1,0,0,0,0,0\nB,0,0,1,2,3,4\nD,5\n".to_vec(),
            piece: 5,
            end: None,
        };
        let queue = LineQueue::new(1024);
        let counters = TrafficCounters::default();
        let shutdown = AtomicBool::new(true);

        run(reader, &queue, &config(), &shutdown, &counters).unwrap();

        assert_eq!(queue.pop_line(64).as_deref(), Some("U,1,0,0,0,0,0"));
        assert_eq!(queue.pop_line(64).as_deref(), Some("B,0,0,1,2,3,4"));
        assert_eq!(queue.pop_line(64).as_deref(), Some("D,5"));
        assert!(queue.is_empty());
        assert_eq!(counters.snapshot().bytes_received, 32);
    }

    #[test]
    fn test_unexpected_eof_is_fatal() {
        let reader = ScriptedReader {
            data: b"C,1,2\n".to_vec(),
            piece: 16,
            end: None,
        };
        let queue = LineQueue::new(1024);
        let shutdown = AtomicBool::new(false);

        let result = run(reader, &queue, &config(), &shutdown, &TrafficCounters::default());

        assert!(matches!(result, Err(NetError::ConnectionClosed)));
        assert_eq!(queue.pop_line(64).as_deref(), Some("C,1,2"));
    }

    #[test]
    fn test_read_error_is_fatal() {
        let reader = ScriptedReader {
            data: Vec::new(),
            piece: 16,
            end: Some(io::ErrorKind::ConnectionReset),
        };
        let queue = LineQueue::new(1024);
        let shutdown = AtomicBool::new(false);

        let result = run(reader, &queue, &config(), &shutdown, &TrafficCounters::default());
        assert!(matches!(result, Err(NetError::Read(_))));
    }

    #[test]
    fn test_read_error_after_shutdown_is_clean() {
        let reader = ScriptedReader {
            data: Vec::new(),
            piece: 16,
            end: Some(io::ErrorKind::ConnectionAborted),
        };
        let queue = LineQueue::new(1024);
        let shutdown = AtomicBool::new(true);

        assert!(run(reader, &queue, &config(), &shutdown, &TrafficCounters::default()).is_ok());
    }

    #[test]
    fn test_full_queue_backs_off_until_drained() {
        let config = ClientConfig {
            read_chunk_size: 8,
            queue_capacity: 16,
            backoff: Backoff::Yield,
            ..Default::default()
        };
        let queue = Arc::new(LineQueue::new(config.queue_capacity));
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut expected = String::new();
        for i in 0..100 {
            expected.push_str(&format!("D,{}\n", i));
        }

        let producer = {
            let queue = Arc::clone(&queue);
            let shutdown = Arc::clone(&shutdown);
            let reader = ScriptedReader {
                data: expected.into_bytes(),
                piece: 8,
                end: None,
            };
            thread::spawn(move || {
                run(reader, &queue, &config, &shutdown, &TrafficCounters::default())
            })
        };

        let mut received = Vec::new();
        while received.len() < 100 {
            match queue.pop_line(64) {
                Some(line) => received.push(line),
                None => thread::yield_now(),
            }
        }
        assert!(matches!(
            producer.join().unwrap(),
            Err(NetError::ConnectionClosed)
        ));

        for (i, line) in received.iter().enumerate() {
            assert_eq!(line, &format!("D,{}", i));
        }
    }
}
