//! Component C: the byte data buffer.
//!
//! A cancellable, bounded byte pipeline over a [`Ring`]: many producer
//! threads serialized on a write mutex feed it via [`ByteDataBuffer::process`],
//! one consumer drains it via [`ByteDataBuffer::read`]. Input and output are
//! packetized — bytes are only admitted or delivered in multiples of a
//! configured packet size — and overflow is either backpressure (block the
//! writer) or discard, per [`ByteBufferConfig::discard_on_overflow`].
//!
//! Grounded on the teacher's `Channel`/`Producer` wrapper shape
//! (`crates/ringmpsc/src/channel.rs`): an `Arc`-free inner struct behind a
//! mutex, a dedicated error enum, producers serialized so the ring
//! underneath stays genuinely SPSC.

use crate::cancel::{wait_while_cancellable, CancellationToken};
use crate::error::BufferError;
use crate::invariants::debug_assert_monotonic_flag;
use crate::metrics::{BufferMetrics, BufferMetricsSnapshot};
use crate::ring::Ring;
use std::sync::{Condvar, Mutex};

/// Receives bytes read out of a [`ByteDataBuffer`].
pub trait ByteConsumer {
    /// Consumes some prefix of `window` (already rounded down to a multiple
    /// of the buffer's `output_packet_size`) and returns how many bytes it
    /// accepted. Returning 0 means "try again later"; returning a count not
    /// itself a multiple of `output_packet_size` is logged and clamped up to
    /// `window.len()`.
    fn process(&mut self, window: &[u8], token: &dyn CancellationToken) -> usize;

    /// Called once, after the buffer has delivered every byte produced
    /// before end-of-data (or after a latched exception has already been
    /// delivered once).
    fn end_of_data(&mut self, token: &dyn CancellationToken);
}

/// Configuration for a [`ByteDataBuffer`].
#[derive(Debug, Clone, Copy)]
pub struct ByteBufferConfig {
    pub input_packet_size: usize,
    pub output_packet_size: usize,
    pub required_free_space: usize,
    pub discard_on_overflow: bool,
}

impl ByteBufferConfig {
    pub const fn new() -> Self {
        Self {
            input_packet_size: 1,
            output_packet_size: 1,
            required_free_space: 0,
            discard_on_overflow: false,
        }
    }

    pub const fn with_input_packet_size(mut self, n: usize) -> Self {
        self.input_packet_size = n;
        self
    }

    pub const fn with_output_packet_size(mut self, n: usize) -> Self {
        self.output_packet_size = n;
        self
    }

    pub const fn with_required_free_space(mut self, n: usize) -> Self {
        self.required_free_space = n;
        self
    }

    pub const fn with_discard_on_overflow(mut self, discard: bool) -> Self {
        self.discard_on_overflow = discard;
        self
    }
}

impl Default for ByteBufferConfig {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner {
    ring: Ring,
    eod: bool,
    exception: Option<String>,
    exception_delivered: bool,
}

/// A cancellable, packetized, bounded byte pipeline. See the module docs.
pub struct ByteDataBuffer {
    inner: Mutex<Inner>,
    write_mutex: Mutex<()>,
    not_empty: Condvar,
    not_full: Condvar,
    config: ByteBufferConfig,
    storage_size: usize,
    metrics: BufferMetrics,
}

impl ByteDataBuffer {
    /// Creates a new buffer with `storage_size` bytes of ring storage.
    ///
    /// `storage_size` must be a positive multiple of both
    /// `config.input_packet_size` and `config.output_packet_size`, and
    /// `config.required_free_space` must be strictly less than `storage_size`.
    pub fn new(storage_size: usize, config: ByteBufferConfig) -> Result<Self, BufferError> {
        if storage_size == 0
            || config.input_packet_size == 0
            || storage_size % config.input_packet_size != 0
        {
            return Err(BufferError::Misaligned {
                len: storage_size,
                packet_size: config.input_packet_size,
            });
        }
        if config.output_packet_size == 0 || storage_size % config.output_packet_size != 0 {
            return Err(BufferError::Misaligned {
                len: storage_size,
                packet_size: config.output_packet_size,
            });
        }
        if config.required_free_space >= storage_size {
            return Err(BufferError::InvalidConfig {
                required: config.required_free_space,
                storage_size,
            });
        }
        let ring = Ring::new(storage_size).expect("storage_size validated nonzero above");
        Ok(Self {
            inner: Mutex::new(Inner {
                ring,
                eod: false,
                exception: None,
                exception_delivered: false,
            }),
            write_mutex: Mutex::new(()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            config,
            storage_size,
            metrics: BufferMetrics::new(),
        })
    }

    pub fn storage_size(&self) -> usize {
        self.storage_size
    }

    pub fn config(&self) -> ByteBufferConfig {
        self.config
    }

    pub fn metrics(&self) -> BufferMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn data_size(&self) -> usize {
        self.inner.lock().unwrap().ring.data_size()
    }

    pub fn free_size(&self) -> usize {
        self.inner.lock().unwrap().ring.free_size()
    }

    /// Submits `data` for writing. `data.len()` must be a multiple of
    /// `input_packet_size`; a caller that violates this gets the whole
    /// slice reported as consumed (logged, not returned as an error — per
    /// design this is a non-retryable producer bug, not a condition to
    /// stall the pipeline over).
    ///
    /// Returns the number of bytes actually copied into the ring. A return
    /// of 0 with `Ok` means the ring had no packetized room and the caller
    /// should retry; it is not an error.
    pub fn process(&self, data: &[u8], token: &dyn CancellationToken) -> Result<usize, BufferError> {
        if data.is_empty() {
            return Ok(0);
        }
        if data.len() % self.config.input_packet_size != 0 {
            tracing::warn!(
                len = data.len(),
                packet_size = self.config.input_packet_size,
                "producer submitted misaligned data; reporting as consumed"
            );
            return Ok(data.len());
        }

        let _write_guard = self.write_mutex.lock().unwrap();
        let mut inner = self.inner.lock().unwrap();

        let raw_window = inner
            .ring
            .write_window()
            .expect("write_mutex serializes producers; no window left outstanding across calls");
        let free_ok = inner.ring.free_size() >= self.config.required_free_space;
        let packetized = if free_ok {
            (raw_window.len() / self.config.input_packet_size) * self.config.input_packet_size
        } else {
            0
        };

        if packetized == 0 {
            drop(raw_window); // equivalent to commit(0)
            if self.config.discard_on_overflow {
                self.metrics.add_overflow(data.len());
                tracing::debug!(
                    bytes_dropped = data.len(),
                    "byte buffer full; discarding on overflow"
                );
                return Ok(data.len());
            }
            wait_while_cancellable(inner, &self.not_full, token, |s: &Inner| {
                let room_ok = s.ring.free_size() >= self.config.required_free_space
                    && s.ring.peek_write_len() / self.config.input_packet_size > 0;
                !room_ok
            })?;
            return Ok(0);
        }

        let mut raw_window = raw_window;
        let copy_len = data.len().min(packetized);
        drop(inner); // release the buffer mutex across the copy
        raw_window.as_mut_slice()[..copy_len].copy_from_slice(&data[..copy_len]);

        let _inner = self.inner.lock().unwrap();
        raw_window.commit(copy_len)?;
        drop(_inner);

        self.metrics.add_bytes_in(copy_len);
        self.not_empty.notify_all();
        Ok(copy_len)
    }

    /// Drains one packetized window to `consumer`.
    ///
    /// If the ring has no full output packet available: delivers a latched
    /// exception (once), then end-of-data (once, and on every call after
    /// that), otherwise blocks on new data. A successful call with no
    /// available data returns `Ok(())` having done nothing; the caller
    /// should call `read` again.
    pub fn read(
        &self,
        consumer: &mut dyn ByteConsumer,
        token: &dyn CancellationToken,
    ) -> Result<(), BufferError> {
        let mut inner = self.inner.lock().unwrap();
        let raw_window = inner
            .ring
            .read_window()
            .expect("single reader; no window left outstanding across calls");
        let rounded = (raw_window.len() / self.config.output_packet_size) * self.config.output_packet_size;

        if rounded == 0 {
            drop(raw_window); // equivalent to commit(0)
            if inner.exception.is_some() && !inner.exception_delivered {
                let msg = inner.exception.clone().unwrap();
                inner.exception_delivered = true;
                return Err(BufferError::Latched(msg));
            }
            if inner.eod || inner.exception_delivered {
                drop(inner);
                consumer.end_of_data(token);
                return Ok(());
            }
            wait_while_cancellable(inner, &self.not_empty, token, |s: &Inner| {
                s.ring.peek_read_len() / self.config.output_packet_size == 0
                    && !s.eod
                    && s.exception.is_none()
            })?;
            return Ok(());
        }

        drop(inner);
        let full = raw_window.as_slice();
        let processed = consumer.process(&full[..rounded], token);
        let processed = if processed == 0 {
            0
        } else if processed % self.config.output_packet_size != 0 {
            tracing::warn!(
                processed,
                packet_size = self.config.output_packet_size,
                window = rounded,
                "consumer returned a non-packet-aligned count; clamping to window size"
            );
            rounded
        } else {
            processed.min(rounded)
        };

        let _inner = self.inner.lock().unwrap();
        if processed > 0 {
            raw_window.commit(processed)?;
        } else {
            drop(raw_window);
        }
        drop(_inner);

        if processed > 0 {
            self.metrics.add_bytes_out(processed);
            self.not_full.notify_all();
        }
        Ok(())
    }

    /// Blocks until at least `threshold` bytes are available, end-of-data is
    /// reached, or an exception is latched. `threshold` must be a positive
    /// multiple of `output_packet_size` less than `storage_size`.
    pub fn wait_for_data(
        &self,
        threshold: usize,
        token: &dyn CancellationToken,
    ) -> Result<(), BufferError> {
        if threshold == 0
            || threshold % self.config.output_packet_size != 0
            || threshold >= self.storage_size
        {
            return Err(BufferError::InvalidConfig {
                required: threshold,
                storage_size: self.storage_size,
            });
        }
        let inner = self.inner.lock().unwrap();
        wait_while_cancellable(inner, &self.not_empty, token, |s: &Inner| {
            s.ring.data_size() < threshold && !s.eod && s.exception.is_none()
        })?;
        Ok(())
    }

    /// Latches a producer-reported error. The next `read` that would
    /// otherwise block observes it once, then the buffer behaves as
    /// end-of-data.
    pub fn set_exception(&self, err: impl Into<String>, _token: &dyn CancellationToken) {
        let mut inner = self.inner.lock().unwrap();
        debug_assert!(inner.exception.is_none(), "exception latched twice");
        inner.exception = Some(err.into());
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Latches end-of-data: no further bytes will arrive.
    pub fn end_of_data(&self, _token: &dyn CancellationToken) {
        let mut inner = self.inner.lock().unwrap();
        debug_assert_monotonic_flag!(inner.eod, true, "eod");
        inner.eod = true;
        drop(inner);
        self.not_empty.notify_all();
    }

    /// Resets the ring and clears `eod`/latched exception state.
    ///
    /// # Precondition
    ///
    /// The caller must guarantee no concurrent `read`/`process`/
    /// `wait_for_data` is in flight. This is a documented precondition, not
    /// a runtime-checked error (spec's Open Question resolves `clear()`
    /// conservatively: never concurrent with other calls).
    pub fn clear(&self) -> Result<(), BufferError> {
        let mut inner = self.inner.lock().unwrap();
        inner.ring = Ring::new(self.storage_size).expect("storage_size was validated at construction");
        inner.eod = false;
        inner.exception = None;
        inner.exception_delivered = false;
        Ok(())
    }
}
