use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficStats {
    pub lines_sent: u64,
    pub bytes_sent: u64,
    pub positions_suppressed: u64,
    pub bytes_received: u64,
}

/// Counters updated from both the caller thread and the receive thread.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    lines_sent: AtomicU64,
    bytes_sent: AtomicU64,
    positions_suppressed: AtomicU64,
    bytes_received: AtomicU64,
}

impl TrafficCounters {
    pub fn record_sent(&self, bytes: usize) {
        self.lines_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_suppressed(&self) {
        self.positions_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TrafficStats {
        TrafficStats {
            lines_sent: self.lines_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            positions_suppressed: self.positions_suppressed.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.lines_sent.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.positions_suppressed.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
    }
}
