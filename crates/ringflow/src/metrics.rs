//! Observability counters. Per spec §4.F: "No correctness depends on these."
//! Same split as the teacher's `Metrics`/`MetricsSnapshot`: a live,
//! atomics-backed struct embedded in the component, and a plain `Copy`
//! snapshot handed out to callers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live byte/packet-buffer counters (components C and D).
#[derive(Debug, Default)]
pub struct BufferMetrics {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    packets_in: AtomicU64,
    packets_out: AtomicU64,
    overflow_drops: AtomicU64,
    overflow_bytes_dropped: AtomicU64,
    padding_bytes_wasted: AtomicU64,
}

impl BufferMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_bytes_in(&self, n: usize) {
        self.bytes_in.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes_out(&self, n: usize) {
        self.bytes_out.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_packet_in(&self) {
        self.packets_in.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_packet_out(&self) {
        self.packets_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_overflow(&self, bytes_dropped: usize) {
        self.overflow_drops.fetch_add(1, Ordering::Relaxed);
        self.overflow_bytes_dropped
            .fetch_add(bytes_dropped as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_padding(&self, n: usize) {
        self.padding_bytes_wasted
            .fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BufferMetricsSnapshot {
        BufferMetricsSnapshot {
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            packets_in: self.packets_in.load(Ordering::Relaxed),
            packets_out: self.packets_out.load(Ordering::Relaxed),
            overflow_drops: self.overflow_drops.load(Ordering::Relaxed),
            overflow_bytes_dropped: self.overflow_bytes_dropped.load(Ordering::Relaxed),
            padding_bytes_wasted: self.padding_bytes_wasted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of [`BufferMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferMetricsSnapshot {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub packets_in: u64,
    pub packets_out: u64,
    pub overflow_drops: u64,
    pub overflow_bytes_dropped: u64,
    pub padding_bytes_wasted: u64,
}

/// Live worker counters for the async byte stream (component F). Spec
/// §4.F names these explicitly: "merges attempted/succeeded, times the
/// scan was blocked by an intersecting-but-full op, number of worker
/// syscalls, total bytes written, queue length histogram" (the histogram
/// is approximated here by a running max, which is enough to catch queue
/// growth without the bucketing machinery a full histogram needs).
#[derive(Debug, Default)]
pub struct StreamMetrics {
    merge_attempts: AtomicU64,
    merge_successes: AtomicU64,
    merge_blocked_full: AtomicU64,
    worker_syscalls: AtomicU64,
    bytes_written: AtomicU64,
    max_queue_len: AtomicU64,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_merge_attempt(&self) {
        self.merge_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_merge_success(&self) {
        self.merge_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_merge_blocked_full(&self) {
        self.merge_blocked_full.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_worker_syscall(&self) {
        self.worker_syscalls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes_written(&self, n: usize) {
        self.bytes_written.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn observe_queue_len(&self, len: usize) {
        self.max_queue_len.fetch_max(len as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamMetricsSnapshot {
        StreamMetricsSnapshot {
            merge_attempts: self.merge_attempts.load(Ordering::Relaxed),
            merge_successes: self.merge_successes.load(Ordering::Relaxed),
            merge_blocked_full: self.merge_blocked_full.load(Ordering::Relaxed),
            worker_syscalls: self.worker_syscalls.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            max_queue_len: self.max_queue_len.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of [`StreamMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamMetricsSnapshot {
    pub merge_attempts: u64,
    pub merge_successes: u64,
    pub merge_blocked_full: u64,
    pub worker_syscalls: u64,
    pub bytes_written: u64,
    pub max_queue_len: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_metrics_accumulate() {
        let m = BufferMetrics::new();
        m.add_bytes_in(10);
        m.add_bytes_out(4);
        m.add_overflow(6);
        let snap = m.snapshot();
        assert_eq!(snap.bytes_in, 10);
        assert_eq!(snap.bytes_out, 4);
        assert_eq!(snap.overflow_drops, 1);
        assert_eq!(snap.overflow_bytes_dropped, 6);
    }

    #[test]
    fn stream_metrics_track_queue_high_water_mark() {
        let m = StreamMetrics::new();
        m.observe_queue_len(3);
        m.observe_queue_len(1);
        m.observe_queue_len(7);
        assert_eq!(m.snapshot().max_queue_len, 7);
    }
}
