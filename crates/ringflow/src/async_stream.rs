//! Component F: the asynchronous buffered byte stream.
//!
//! A write-through facade over a seekable backing stream: callers submit
//! bursty writes against a logical `position` and get a quick, bounded-memory
//! accept; a single worker thread drains an op queue against the backing
//! stream in submission order, coalescing adjacent writes into the same
//! scratch page to cut down on backing-stream calls. `sync` is a barrier.
//!
//! The scratch pages behind each queued write reuse [`crate::ring::Ring`]
//! (never wrapped, since a page is written once by the submitting side and
//! read once by the worker) rather than maintaining the separate pooled
//! `buffers` free-list the state model names — pages are allocated fresh per
//! write and dropped once the worker drains them, which keeps the `Ring`
//! invariants (single outstanding window) trivially satisfied without extra
//! bookkeeping. See `DESIGN.md` for the rest of this simplification's
//! reasoning.

use crate::cancel::{wait_while_cancellable, CancellationToken, NeverCancelled};
use crate::error::StreamError;
use crate::invariants::debug_assert_monotonic_seq;
use crate::metrics::{StreamMetrics, StreamMetricsSnapshot};
use crate::ring::Ring;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::warn;

/// The seekable sink the worker drains writes into. Only the worker thread
/// ever calls this trait's methods; callers never touch it directly.
pub trait BackingStream: Send {
    /// Writes `data` at the stream's current position. May be short.
    fn write(&mut self, data: &[u8], token: &dyn CancellationToken) -> Result<usize, StreamError>;
    /// Repositions the stream's write cursor.
    fn seek(&mut self, offset: usize) -> Result<(), StreamError>;
    /// Returns the stream's current write cursor.
    fn tell(&mut self) -> Result<usize, StreamError>;
    /// Flushes buffered writes to durable storage. Optional: the default is
    /// a no-op for backing stores with no separate durability step.
    fn sync(&mut self, _token: &dyn CancellationToken) -> Result<(), StreamError> {
        Ok(())
    }
}

/// A cloneable handle onto a [`MemBackingStream`]'s bytes, retained by a
/// caller after the stream itself has been moved into an `AsyncByteStream`
/// (and its worker thread). Exists so tests (and callers generally) can
/// inspect what actually landed in the backing store after a `sync`,
/// without needing the stream back.
#[derive(Clone)]
pub struct MemBackingStreamHandle(Arc<Mutex<Vec<u8>>>);

impl MemBackingStreamHandle {
    /// A snapshot of the bytes written so far.
    pub fn snapshot(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

/// An in-memory [`BackingStream`], useful for tests and for callers that
/// just want a growable byte sink.
pub struct MemBackingStream {
    data: Arc<Mutex<Vec<u8>>>,
    cursor: usize,
}

impl MemBackingStream {
    pub fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new(Vec::new())),
            cursor: 0,
        }
    }

    /// Returns a handle that can snapshot this stream's bytes after it has
    /// been handed off to an `AsyncByteStream`.
    pub fn handle(&self) -> MemBackingStreamHandle {
        MemBackingStreamHandle(Arc::clone(&self.data))
    }
}

impl Default for MemBackingStream {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingStream for MemBackingStream {
    fn write(&mut self, data: &[u8], _token: &dyn CancellationToken) -> Result<usize, StreamError> {
        let end = self.cursor + data.len();
        let mut guard = self.data.lock().unwrap();
        if guard.len() < end {
            guard.resize(end, 0);
        }
        guard[self.cursor..end].copy_from_slice(data);
        self.cursor = end;
        Ok(data.len())
    }

    fn seek(&mut self, offset: usize) -> Result<(), StreamError> {
        self.cursor = offset;
        Ok(())
    }

    fn tell(&mut self) -> Result<usize, StreamError> {
        Ok(self.cursor)
    }
}

/// Configuration for an [`AsyncByteStream`].
#[derive(Debug, Clone, Copy)]
pub struct AsyncStreamConfig {
    pub buffer_size: usize,
    pub page_size: usize,
    pub mergeable_pages_hint: usize,
    pub sub_streams_hint: usize,
    pub non_blocking_sync: bool,
}

impl AsyncStreamConfig {
    /// # Panics
    ///
    /// Panics if `buffer_size` or `page_size` is zero.
    ///
    /// `page_size` need not evenly divide `buffer_size`; `max_pages` is a
    /// floor division of the two, so the last page's worth of budget may go
    /// unused rather than over-committing memory.
    pub const fn new(
        buffer_size: usize,
        page_size: usize,
        mergeable_pages_hint: usize,
        sub_streams_hint: usize,
        non_blocking_sync: bool,
    ) -> Self {
        assert!(buffer_size > 0, "buffer_size must be nonzero");
        assert!(page_size > 0, "page_size must be nonzero");
        Self {
            buffer_size,
            page_size,
            mergeable_pages_hint,
            sub_streams_hint,
            non_blocking_sync,
        }
    }

    const fn max_pages(&self) -> usize {
        let n = self.buffer_size / self.page_size;
        if n == 0 {
            1
        } else {
            n
        }
    }
}

impl Default for AsyncStreamConfig {
    fn default() -> Self {
        Self::new(1 << 20, 1 << 16, 4, 1, false)
    }
}

struct WriteOp {
    offset: usize,
    ring: Arc<Mutex<Ring>>,
    used: usize,
}

enum Op {
    Write(WriteOp),
    Sync { seq: u64 },
    Stop,
}

struct OpQueueState {
    queue: VecDeque<Op>,
    position: usize,
    length: usize,
    exception: Option<String>,
    sync_done: u64,
    pages_outstanding: usize,
}

struct Shared {
    state: Mutex<OpQueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    sync_cv: Condvar,
    sync_next: AtomicU64,
    config: AsyncStreamConfig,
    metrics: StreamMetrics,
}

fn latch_exception(shared: &Shared, message: String) {
    let mut guard = shared.state.lock().unwrap();
    if guard.exception.is_none() {
        warn!(error = %message, "async byte stream worker latched a fatal backing-stream error");
        guard.exception = Some(message);
    }
    drop(guard);
    shared.not_empty.notify_all();
    shared.not_full.notify_all();
    shared.sync_cv.notify_all();
}

fn worker_loop(shared: Arc<Shared>, mut backing: Box<dyn BackingStream>) {
    loop {
        let op = {
            let guard = shared.state.lock().unwrap();
            let mut guard = shared
                .not_empty
                .wait_while(guard, |s| s.queue.is_empty())
                .unwrap();
            guard.queue.pop_front().expect("woke with a nonempty queue")
        };

        match op {
            Op::Stop => break,
            Op::Write(w) => {
                shared.metrics.add_worker_syscall();
                let outcome = {
                    let mut ring = w.ring.lock().unwrap();
                    let window = ring
                        .read_window()
                        .expect("worker has exclusive access to a retired op's page");
                    let bytes = window.as_slice();
                    let result = backing
                        .seek(w.offset)
                        .and_then(|_| backing.write(bytes, &NeverCancelled));
                    let consumed = *result.as_ref().unwrap_or(&0);
                    let _ = window.commit(consumed);
                    result
                };
                match outcome {
                    Ok(n) if n == w.used => {
                        shared.metrics.add_bytes_written(n);
                    }
                    Ok(n) => {
                        latch_exception(
                            &shared,
                            format!("backing stream accepted {n} of {} bytes", w.used),
                        );
                    }
                    Err(e) => latch_exception(&shared, e.to_string()),
                }
                let mut guard = shared.state.lock().unwrap();
                guard.pages_outstanding = guard.pages_outstanding.saturating_sub(1);
                drop(guard);
                shared.not_full.notify_all();
            }
            Op::Sync { seq } => {
                shared.metrics.add_worker_syscall();
                if !shared.config.non_blocking_sync {
                    if let Err(e) = backing.sync(&NeverCancelled) {
                        latch_exception(&shared, e.to_string());
                    }
                }
                let mut guard = shared.state.lock().unwrap();
                debug_assert_monotonic_seq!(guard.sync_done, seq, "sync_done");
                if seq > guard.sync_done {
                    guard.sync_done = seq;
                }
                drop(guard);
                shared.sync_cv.notify_all();
            }
        }
    }
}

/// A coalescing write-through byte stream backed by a dedicated worker
/// thread. See the module docs for the coalescing and page-pooling design.
pub struct AsyncByteStream {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl AsyncByteStream {
    pub fn new(config: AsyncStreamConfig, backing: impl BackingStream + 'static) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(OpQueueState {
                queue: VecDeque::new(),
                position: 0,
                length: 0,
                exception: None,
                sync_done: 0,
                pages_outstanding: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            sync_cv: Condvar::new(),
            sync_next: AtomicU64::new(0),
            config,
            metrics: StreamMetrics::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let backing: Box<dyn BackingStream> = Box::new(backing);
        let worker = thread::spawn(move || worker_loop(worker_shared, backing));
        Self {
            shared,
            worker: Some(worker),
        }
    }

    pub fn metrics(&self) -> StreamMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn tell(&self) -> Result<usize, StreamError> {
        let guard = self.shared.state.lock().unwrap();
        if let Some(msg) = &guard.exception {
            return Err(StreamError::Latched(msg.clone()));
        }
        Ok(guard.position)
    }

    pub fn length(&self) -> usize {
        self.shared.state.lock().unwrap().length
    }

    pub fn seek(&self, offset: usize) -> Result<(), StreamError> {
        let mut guard = self.shared.state.lock().unwrap();
        if let Some(msg) = &guard.exception {
            return Err(StreamError::Latched(msg.clone()));
        }
        guard.position = offset;
        Ok(())
    }

    /// Submits `data` for write at the current position, returning the
    /// number of bytes accepted (may be short — callers loop until all
    /// bytes are submitted, the same short-write contract components C/D
    /// use for their `process` calls).
    pub fn write(&self, data: &[u8], token: &dyn CancellationToken) -> Result<usize, StreamError> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut guard = self.shared.state.lock().unwrap();
        if let Some(msg) = &guard.exception {
            return Err(StreamError::Latched(msg.clone()));
        }

        let position = guard.position;
        self.shared.metrics.add_merge_attempt();
        let scan_start = guard
            .queue
            .len()
            .saturating_sub(self.shared.config.mergeable_pages_hint);
        let mut coalesced = None;
        for op in guard.queue.iter_mut().skip(scan_start) {
            let Op::Write(w) = op else { continue };
            if w.offset + w.used != position {
                continue;
            }
            let mut ring = w.ring.lock().unwrap();
            if ring.free_size() == 0 {
                self.shared.metrics.add_merge_blocked_full();
                continue;
            }
            let mut window = ring
                .write_window()
                .expect("op's ring has no outstanding window between appends");
            let n = data.len().min(window.len());
            window.as_mut_slice()[..n].copy_from_slice(&data[..n]);
            window.commit(n).expect("n bounded by window size above");
            drop(ring);
            w.used += n;
            coalesced = Some(n);
            break;
        }

        if let Some(n) = coalesced {
            self.shared.metrics.add_merge_success();
            guard.position += n;
            if guard.position > guard.length {
                guard.length = guard.position;
            }
            return Ok(n);
        }

        let mut guard = wait_while_cancellable(guard, &self.shared.not_full, token, |s: &OpQueueState| {
            s.exception.is_none() && s.pages_outstanding >= self.shared.config.max_pages()
        })?;
        if let Some(msg) = &guard.exception {
            return Err(StreamError::Latched(msg.clone()));
        }

        let ring = Ring::new(self.shared.config.page_size)
            .expect("page_size validated nonzero by AsyncStreamConfig::new");
        let ring = Arc::new(Mutex::new(ring));
        let copied = {
            let mut r = ring.lock().unwrap();
            let mut window = r
                .write_window()
                .expect("freshly constructed ring has no outstanding window");
            let n = data.len().min(window.len());
            window.as_mut_slice()[..n].copy_from_slice(&data[..n]);
            window.commit(n).expect("n bounded by window size above");
            n
        };
        guard.pages_outstanding += 1;
        guard.queue.push_back(Op::Write(WriteOp {
            offset: position,
            ring,
            used: copied,
        }));
        self.shared.metrics.observe_queue_len(guard.queue.len());
        guard.position += copied;
        if guard.position > guard.length {
            guard.length = guard.position;
        }
        drop(guard);
        self.shared.not_empty.notify_all();
        Ok(copied)
    }

    /// Blocks until every write submitted before this call is durable on the
    /// backing stream.
    pub fn sync(&self, token: &dyn CancellationToken) -> Result<(), StreamError> {
        let mut guard = self.shared.state.lock().unwrap();
        if let Some(msg) = &guard.exception {
            return Err(StreamError::Latched(msg.clone()));
        }
        let seq = self.shared.sync_next.fetch_add(1, Ordering::SeqCst) + 1;
        guard.queue.push_back(Op::Sync { seq });
        self.shared.metrics.observe_queue_len(guard.queue.len());
        drop(guard);
        self.shared.not_empty.notify_all();

        let guard = self.shared.state.lock().unwrap();
        let guard = wait_while_cancellable(guard, &self.shared.sync_cv, token, |s: &OpQueueState| {
            s.exception.is_none() && s.sync_done < seq
        })?;
        if let Some(msg) = &guard.exception {
            return Err(StreamError::Latched(msg.clone()));
        }
        Ok(())
    }
}

impl Drop for AsyncByteStream {
    fn drop(&mut self) {
        {
            let mut guard = self.shared.state.lock().unwrap();
            guard.queue.push_back(Op::Stop);
        }
        self.shared.not_empty.notify_all();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("async byte stream worker thread panicked during shutdown");
            }
        }
    }
}
