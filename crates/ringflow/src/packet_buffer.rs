//! Component D: the packet buffer.
//!
//! Like [`crate::byte_buffer::ByteDataBuffer`] but message-boundary
//! preserving: each [`PacketBuffer::process`] call submits one whole packet
//! `(bytes, metadata)`, and each [`PacketBuffer::read`] delivers exactly one
//! whole packet. Packets are never split across the ring's wrap point —
//! when a packet would have to wrap to stay contiguous, the tail of the
//! ring is recorded as a padding region and skipped on the read side
//! instead, at the cost of up to `packet_size - 1` wasted bytes per wrap.

use crate::cancel::{wait_while_cancellable, CancellationToken};
use crate::error::PacketBufferError;
use crate::invariants::{debug_assert_packet_fits_window, debug_assert_padding_cleared};
use crate::metrics::{BufferMetrics, BufferMetricsSnapshot};
use crate::ring::Ring;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Receives packets read out of a [`PacketBuffer`].
pub trait PacketConsumer<M> {
    /// Returns `true` if the packet was consumed (committing the read and
    /// popping its descriptor), `false` to leave it pending for a future
    /// `read` call.
    fn process(&mut self, data: &[u8], metadata: &M, token: &dyn CancellationToken) -> bool;

    /// Called once the buffer has delivered every packet produced before
    /// end-of-data.
    fn end_of_data(&mut self, token: &dyn CancellationToken);
}

/// Configuration for a [`PacketBuffer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketBufferConfig {
    pub discard_on_overflow: bool,
}

impl PacketBufferConfig {
    pub const fn new() -> Self {
        Self {
            discard_on_overflow: false,
        }
    }

    pub const fn with_discard_on_overflow(mut self, discard: bool) -> Self {
        self.discard_on_overflow = discard;
        self
    }
}

struct Descriptor<M> {
    size: usize,
    metadata: M,
}

struct Inner<M> {
    ring: Ring,
    descriptors: VecDeque<Descriptor<M>>,
    padding_size: usize,
    eod: bool,
    exception: Option<String>,
    exception_delivered: bool,
}

/// A cancellable, message-boundary-preserving packet pipeline. See the
/// module docs.
pub struct PacketBuffer<M> {
    inner: Mutex<Inner<M>>,
    write_mutex: Mutex<()>,
    not_empty: Condvar,
    not_full: Condvar,
    storage_size: usize,
    config: PacketBufferConfig,
    metrics: BufferMetrics,
}

impl<M: Clone> PacketBuffer<M> {
    pub fn new(storage_size: usize, config: PacketBufferConfig) -> Result<Self, PacketBufferError> {
        let ring = Ring::new(storage_size)
            .map_err(|_| PacketBufferError::TooLarge { size: 0, storage_size })?;
        Ok(Self {
            inner: Mutex::new(Inner {
                ring,
                descriptors: VecDeque::new(),
                padding_size: 0,
                eod: false,
                exception: None,
                exception_delivered: false,
            }),
            write_mutex: Mutex::new(()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            storage_size,
            config,
            metrics: BufferMetrics::new(),
        })
    }

    pub fn storage_size(&self) -> usize {
        self.storage_size
    }

    pub fn config(&self) -> PacketBufferConfig {
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

    /// Submits one whole packet. Returns `true` if it was admitted
    /// (written or dropped under `discard_on_overflow`), `false` if the
    /// ring had no room and the caller should retry.
    pub fn process(
        &self,
        data: &[u8],
        metadata: M,
        token: &dyn CancellationToken,
    ) -> Result<bool, PacketBufferError> {
        if data.len() > self.storage_size {
            return Err(PacketBufferError::TooLarge {
                size: data.len(),
                storage_size: self.storage_size,
            });
        }
        if data.is_empty() {
            return Ok(true);
        }

        let _write_guard = self.write_mutex.lock().unwrap();
        let mut inner = self.inner.lock().unwrap();

        let mut window = inner
            .ring
            .write_window()
            .expect("write_mutex serializes producers; no window left outstanding across calls");

        if window.len() < data.len() {
            let padding = if inner.ring.is_contiguous() { window.len() } else { 0 };
            let required = padding + data.len();
            if inner.ring.free_size() < required {
                drop(window); // commit(0)
                if self.config.discard_on_overflow {
                    self.metrics.add_overflow(data.len());
                    tracing::debug!(
                        bytes_dropped = data.len(),
                        "packet buffer full; discarding on overflow"
                    );
                    return Ok(true);
                }
                wait_while_cancellable(inner, &self.not_full, token, |s: &Inner<M>| {
                    let pad = if s.ring.is_contiguous() {
                        s.ring.peek_write_len()
                    } else {
                        0
                    };
                    s.ring.free_size() < pad + data.len()
                })?;
                return Ok(false);
            }
            window.commit(padding)?;
            if padding > 0 {
                inner.padding_size = padding;
                self.metrics.add_padding(padding);
                tracing::debug!(padding, "packet buffer inserted tail padding to avoid a wrap");
            }
            window = inner
                .ring
                .write_window()
                .expect("single producer; window refreshed after padding commit");
            debug_assert_packet_fits_window!(data.len(), window.len());
        }

        drop(inner);
        window.as_mut_slice()[..data.len()].copy_from_slice(data);

        let mut inner = self.inner.lock().unwrap();
        window.commit(data.len())?;
        inner.descriptors.push_back(Descriptor {
            size: data.len(),
            metadata,
        });
        drop(inner);

        self.metrics.add_packet_in();
        self.metrics.add_bytes_in(data.len());
        self.not_empty.notify_all();
        Ok(true)
    }

    /// Delivers exactly one packet to `consumer`, or end-of-data / a
    /// latched exception once the descriptor queue is empty.
    pub fn read(
        &self,
        consumer: &mut dyn PacketConsumer<M>,
        token: &dyn CancellationToken,
    ) -> Result<(), PacketBufferError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.descriptors.is_empty() {
            if inner.exception.is_some() && !inner.exception_delivered {
                let msg = inner.exception.clone().unwrap();
                inner.exception_delivered = true;
                return Err(PacketBufferError::Latched(msg));
            }
            if inner.eod || inner.exception_delivered {
                drop(inner);
                consumer.end_of_data(token);
                return Ok(());
            }
            wait_while_cancellable(inner, &self.not_empty, token, |s: &Inner<M>| {
                s.descriptors.is_empty() && !s.eod && s.exception.is_none()
            })?;
            return Ok(());
        }

        let mut window = inner.ring.read_window().expect("single reader; no window left outstanding");
        if inner.padding_size > 0 && !inner.ring.is_contiguous() && window.len() == inner.padding_size {
            let padding = inner.padding_size;
            window.commit(padding)?;
            inner.padding_size = 0;
            window = inner.ring.read_window().expect("single reader");
        }
        debug_assert_padding_cleared!(inner.padding_size);

        let front_size = inner
            .descriptors
            .front()
            .expect("checked non-empty above")
            .size;
        debug_assert_packet_fits_window!(front_size, window.len());
        let front_metadata = inner.descriptors.front().unwrap().metadata.clone();

        drop(inner);
        let consumed = {
            let bytes = &window.as_slice()[..front_size];
            consumer.process(bytes, &front_metadata, token)
        };

        let mut inner = self.inner.lock().unwrap();
        if consumed {
            window.commit(front_size)?;
            inner.descriptors.pop_front();
            drop(inner);
            self.metrics.add_bytes_out(front_size);
            self.metrics.add_packet_out();
            self.not_full.notify_all();
        } else {
            drop(window); // commit(0): leave the packet pending for a future read
            drop(inner);
        }
        Ok(())
    }

    pub fn set_exception(&self, err: impl Into<String>, _token: &dyn CancellationToken) {
        let mut inner = self.inner.lock().unwrap();
        debug_assert!(inner.exception.is_none(), "exception latched twice");
        inner.exception = Some(err.into());
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn end_of_data(&self, _token: &dyn CancellationToken) {
        let mut inner = self.inner.lock().unwrap();
        debug_assert!(!inner.eod, "eod latched twice");
        inner.eod = true;
        drop(inner);
        self.not_empty.notify_all();
    }
}
