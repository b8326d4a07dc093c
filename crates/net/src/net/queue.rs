use std::string::FromUtf8Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::config::Backoff;

const WAIT_SLICE: Duration = Duration::from_millis(10);

/// Bounded byte buffer shared between the receive loop (producer) and the
/// application (consumer). Holds complete `\n`-terminated records followed by
/// at most one partial record, never more than `capacity` bytes.
#[derive(Debug)]
pub struct LineQueue {
    buffer: Mutex<Vec<u8>>,
    space: Condvar,
    capacity: usize,
}

impl LineQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(Vec::with_capacity(capacity)),
            space: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
        self.space.notify_all();
    }

    // A panicking holder can only have been mid-extend or mid-drain on a Vec,
    // both of which leave it structurally valid.
    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `data` if it fits; otherwise leaves the buffer untouched.
    pub fn try_push(&self, data: &[u8]) -> bool {
        let mut buffer = self.lock();
        if buffer.len() + data.len() > self.capacity {
            return false;
        }
        buffer.extend_from_slice(data);
        true
    }

    /// Appends `data`, waiting for a consumer to make room if necessary.
    ///
    /// Returns `false` without appending only when `shutdown` is raised while
    /// waiting, or when `data` is larger than the whole queue.
    pub fn push(&self, data: &[u8], backoff: Backoff, shutdown: &AtomicBool) -> bool {
        if data.len() > self.capacity {
            log::error!(
                "{} byte read can never fit a {} byte line queue",
                data.len(),
                self.capacity
            );
            return false;
        }

        match backoff {
            Backoff::Yield => loop {
                if self.try_push(data) {
                    return true;
                }
                if shutdown.load(Ordering::SeqCst) {
                    return false;
                }
                thread::yield_now();
            },
            Backoff::Wait => {
                let mut buffer = self.lock();
                loop {
                    if buffer.len() + data.len() <= self.capacity {
                        buffer.extend_from_slice(data);
                        return true;
                    }
                    if shutdown.load(Ordering::SeqCst) {
                        return false;
                    }
                    buffer = match self.space.wait_timeout(buffer, WAIT_SLICE) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    };
                }
            }
        }
    }

    /// Removes the first complete record, without its terminator, exactly as
    /// received.
    ///
    /// Never blocks. Records longer than `max_length - 1` bytes are truncated;
    /// the excess is discarded along with the record.
    pub fn pop_line_bytes(&self, max_length: usize) -> Option<Vec<u8>> {
        let mut buffer = self.lock();
        let end = buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = buffer.drain(..=end).collect();
        drop(buffer);
        self.space.notify_all();

        line.pop();
        line.truncate(max_length.saturating_sub(1));
        Some(line)
    }

    /// Text form of [`pop_line_bytes`](Self::pop_line_bytes). Invalid UTF-8 is
    /// replaced, and the result is cut back to a character boundary so it
    /// never exceeds `max_length - 1` bytes.
    pub fn pop_line(&self, max_length: usize) -> Option<String> {
        let bytes = self.pop_line_bytes(max_length)?;
        let limit = max_length.saturating_sub(1);

        let mut text = match decode_line(bytes) {
            Ok(text) => return Some(text),
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };
        let mut end = limit.min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
        Some(text)
    }
}

/// Strict UTF-8 decoding of a popped record. A character split by truncation
/// at the end is dropped whole rather than treated as invalid.
pub(crate) fn decode_line(mut bytes: Vec<u8>) -> Result<String, FromUtf8Error> {
    if let Err(e) = std::str::from_utf8(&bytes) {
        if e.error_len().is_none() {
            bytes.truncate(e.valid_up_to());
        }
    }
    String::from_utf8(bytes)
}
