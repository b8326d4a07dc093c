use std::io::Write;
use std::sync::Arc;

use super::protocol::{ClientMessage, Pose};
use super::stats::TrafficCounters;
use crate::config::ClientConfig;
use crate::error::{NetError, Result};

/// Writes protocol lines to the connection. Position updates are throttled
/// against the last pose actually sent.
pub struct Transmitter<W> {
    writer: W,
    last_position: Pose,
    position_threshold: f32,
    max_line_length: usize,
    counters: Arc<TrafficCounters>,
}

impl<W: Write> Transmitter<W> {
    pub fn new(writer: W, config: &ClientConfig, counters: Arc<TrafficCounters>) -> Self {
        Self {
            writer,
            last_position: Pose::default(),
            position_threshold: config.position_threshold,
            max_line_length: config.max_line_length,
            counters,
        }
    }

    /// Writes the whole line, retrying partial writes. `line` must carry its
    /// own terminator and, with it, stay below `max_line_length` bytes.
    pub fn send(&mut self, line: &str) -> Result<()> {
        if line.len() >= self.max_line_length {
            return Err(NetError::LineTooLong {
                length: line.len(),
                max: self.max_line_length,
            });
        }

        self.writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(|e| {
                log::error!("send failed: {}", e);
                NetError::Write(e)
            })?;

        self.counters.record_sent(line.len());
        log::trace!("sent {:?}", line);
        Ok(())
    }

    pub fn send_message(&mut self, message: &ClientMessage) -> Result<()> {
        self.send(&message.encode())
    }

    /// Returns `false` when the pose is too close to the last one sent to be
    /// worth transmitting.
    pub fn send_position(&mut self, pose: Pose) -> Result<bool> {
        if pose.distance_squared(&self.last_position) < self.position_threshold {
            self.counters.record_suppressed();
            return Ok(false);
        }
        self.last_position = pose;
        self.send_message(&ClientMessage::Position(pose))?;
        Ok(true)
    }

    pub fn send_chunk_request(&mut self, p: i32, q: i32) -> Result<()> {
        self.send_message(&ClientMessage::Chunk { p, q })
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
        self.send_message(&ClientMessage::Block { p, q, x, y, z, w })
    }

    pub fn send_talk(&mut self, text: &str) -> Result<()> {
        self.send_message(&ClientMessage::Talk(text.to_string()))
    }

    pub fn last_position(&self) -> Pose {
        self.last_position
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
