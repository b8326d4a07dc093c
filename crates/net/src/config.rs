use crate::error::{NetError, Result};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 4080;

pub const QUEUE_CAPACITY: usize = 65536;
pub const READ_CHUNK_SIZE: usize = 4096;
pub const MAX_LINE_LENGTH: usize = 1024;
pub const POSITION_THRESHOLD: f32 = 0.1;

/// How the receive loop waits when the line queue has no room for a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Release the lock, yield the processor, retry.
    Yield,
    /// Sleep on a condition variable until a consumer pops a line.
    #[default]
    Wait,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub queue_capacity: usize,
    pub read_chunk_size: usize,
    pub max_line_length: usize,
    pub position_threshold: f32,
    pub backoff: Backoff,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            queue_capacity: QUEUE_CAPACITY,
            read_chunk_size: READ_CHUNK_SIZE,
            max_line_length: MAX_LINE_LENGTH,
            position_threshold: POSITION_THRESHOLD,
            backoff: Backoff::default(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(NetError::InvalidConfig("queue_capacity must be non-zero".into()));
        }
        if self.read_chunk_size == 0 {
            return Err(NetError::InvalidConfig("read_chunk_size must be non-zero".into()));
        }
        // A single read must always fit an empty queue or the receive loop never progresses.
        if self.read_chunk_size > self.queue_capacity {
            return Err(NetError::InvalidConfig(format!(
                "read_chunk_size {} exceeds queue_capacity {}",
                self.read_chunk_size, self.queue_capacity
            )));
        }
        if self.max_line_length == 0 {
            return Err(NetError::InvalidConfig("max_line_length must be non-zero".into()));
        }
        if self.position_threshold.is_nan() || self.position_threshold < 0.0 {
            return Err(NetError::InvalidConfig(format!(
                "position_threshold must be a non-negative number, got {}",
                self.position_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_capacity, 65536);
        assert_eq!(config.read_chunk_size, 4096);
        assert_eq!(config.max_line_length, 1024);
        assert_eq!(config.backoff, Backoff::Wait);
    }

    #[test]
    fn test_chunk_larger_than_queue_rejected() {
        let config = ClientConfig {
            queue_capacity: 1024,
            read_chunk_size: 4096,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(NetError::InvalidConfig(_))));
    }

    #[test]
    fn test_nan_threshold_rejected() {
        let config = ClientConfig {
            position_threshold: f32::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
