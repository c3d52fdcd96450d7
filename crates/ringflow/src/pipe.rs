//! Component B: the bithread pipe.
//!
//! A rendezvous between exactly one writer and one reader with no
//! steady-state buffering: `send` publishes a borrowed slice and blocks
//! until the reader has copied every byte of it out, possibly across
//! several `recv` calls; `recv` copies `min(pending.len, out.len())` bytes
//! per call and returns immediately once something is available. Grounded
//! on the teacher's `channel.rs` producer/consumer wrapper shape (a
//! `Mutex`-guarded slot plus paired condvars) but collapsed to a single
//! pending region instead of a bounded queue, since spec §4.B describes
//! exactly one in-flight region at a time with no buffering. The pipe is
//! reusable across many sequential send/recv cycles, matching how
//! `examples/original_source/unittests/io/BithreadPipeTest.cpp` drives one
//! pipe through repeated partial writes and reads.

use crate::cancel::{wait_while_cancellable, CancellationToken};
use crate::error::PipeError;
use std::sync::{Arc, Condvar, Mutex};

/// A writer's in-flight region, installed into the shared [`Slot`] for the
/// duration of one [`PipeWriter::send`] call.
struct PendingWrite {
    ptr: *const u8,
    len: usize,
    offset: usize,
}

impl PendingWrite {
    fn remaining(&self) -> usize {
        self.len - self.offset
    }
}

// SAFETY: a `PendingWrite` is only ever installed by `send`, which keeps its
// `&[u8]` argument borrowed on its own stack frame until the slot reports
// the region fully drained (or the pipe disconnects) and removes it. The
// pointer is read only by `recv`, always under the slot's mutex, so it is
// never read after `send` has let go of the borrow.
unsafe impl Send for PendingWrite {}

#[derive(Default)]
struct Slot {
    pending: Option<PendingWrite>,
    disconnected: bool,
}

impl Slot {
    fn remaining(&self) -> usize {
        self.pending.as_ref().map_or(0, PendingWrite::remaining)
    }
}

struct Inner {
    slot: Mutex<Slot>,
    slot_filled: Condvar,
    slot_drained: Condvar,
}

/// A rendezvous channel between exactly one writer and one reader.
///
/// Construct with [`pipe`], which returns a connected `(PipeWriter,
/// PipeReader)` pair sharing one [`Pipe`].
pub struct Pipe {
    inner: Arc<Inner>,
}

impl Pipe {
    fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot::default()),
                slot_filled: Condvar::new(),
                slot_drained: Condvar::new(),
            }),
        }
    }
}

/// Creates a connected writer/reader pair.
pub fn pipe() -> (PipeWriter, PipeReader) {
    let pipe = Pipe::new();
    (
        PipeWriter {
            inner: Arc::clone(&pipe.inner),
        },
        PipeReader { inner: pipe.inner },
    )
}

/// The write half of a [`Pipe`].
pub struct PipeWriter {
    inner: Arc<Inner>,
}

impl PipeWriter {
    /// Publishes `data` to the reader and blocks until every byte has been
    /// copied out, across however many [`PipeReader::recv`] calls that
    /// takes.
    ///
    /// Returns the number of bytes actually handed off. This is always
    /// `data.len()` unless the reader disconnects partway through, in which
    /// case it is the (possibly zero) prefix that was copied out before
    /// disconnection. Returns [`PipeError::Disconnected`] only if no bytes
    /// were transferred at all; [`PipeError::Cancelled`] only if the token
    /// fires before a single byte is transferred (once any byte has moved,
    /// a partial count is reported back instead of an error, since that
    /// handoff cannot be undone).
    pub fn send(&self, data: &[u8], token: &dyn CancellationToken) -> Result<usize, PipeError> {
        if data.is_empty() {
            return Ok(0);
        }

        let mut guard = self.inner.slot.lock().unwrap();
        if guard.disconnected {
            return Err(PipeError::Disconnected);
        }
        debug_assert!(guard.pending.is_none(), "one pipe admits one in-flight send at a time");
        guard.pending = Some(PendingWrite {
            ptr: data.as_ptr(),
            len: data.len(),
            offset: 0,
        });
        self.inner.slot_filled.notify_all();

        let wait = wait_while_cancellable(guard, &self.inner.slot_drained, token, |s: &Slot| {
            !s.disconnected && s.remaining() > 0
        });

        let (sent, disconnected, cancelled) = match wait {
            Ok(mut guard) => {
                let disconnected = guard.disconnected;
                let sent = guard.pending.take().map_or(data.len(), |p| p.offset);
                (sent, disconnected, false)
            }
            Err(_) => {
                let mut guard = self.inner.slot.lock().unwrap();
                let sent = guard.pending.take().map_or(data.len(), |p| p.offset);
                (sent, false, true)
            }
        };

        if sent > 0 {
            return Ok(sent);
        }
        if disconnected {
            Err(PipeError::Disconnected)
        } else {
            debug_assert!(cancelled, "zero progress with no disconnect implies cancellation");
            Err(PipeError::Cancelled)
        }
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        let mut guard = self.inner.slot.lock().unwrap();
        guard.disconnected = true;
        drop(guard);
        self.inner.slot_filled.notify_all();
    }
}

/// The read half of a [`Pipe`].
pub struct PipeReader {
    inner: Arc<Inner>,
}

impl PipeReader {
    /// Copies `min(out.len(), the writer's remaining pending bytes)` into
    /// `out`, blocking until the writer has something pending. Returns the
    /// number of bytes copied (always `out.len().min(...)` and nonzero
    /// unless `out` is empty), or [`PipeError::Disconnected`] if the writer
    /// was dropped with nothing pending.
    pub fn recv(&self, out: &mut [u8], token: &dyn CancellationToken) -> Result<usize, PipeError> {
        if out.is_empty() {
            return Ok(0);
        }

        let guard = self.inner.slot.lock().unwrap();
        let mut guard = wait_while_cancellable(guard, &self.inner.slot_filled, token, |s: &Slot| {
            s.remaining() == 0 && !s.disconnected
        })?;

        if guard.remaining() == 0 {
            return Err(PipeError::Disconnected);
        }

        let n = {
            let pending = guard.pending.as_mut().expect("remaining() > 0 implies pending is set");
            let n = out.len().min(pending.remaining());
            // SAFETY: `pending.ptr` still points into the writer's borrowed
            // slice — `send` has not observed a full drain yet (remaining()
            // > 0 above), so it has not returned and the borrow is live.
            let src = unsafe { std::slice::from_raw_parts(pending.ptr.add(pending.offset), n) };
            out[..n].copy_from_slice(src);
            pending.offset += n;
            n
        };
        if guard.remaining() == 0 {
            guard.pending = None;
        }
        drop(guard);
        self.inner.slot_drained.notify_all();
        Ok(n)
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        let mut guard = self.inner.slot.lock().unwrap();
        guard.disconnected = true;
        drop(guard);
        self.inner.slot_drained.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::{CancelFlag, NeverCancelled};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn send_then_recv_round_trips_payload() {
        let (writer, reader) = pipe();
        let handle = thread::spawn(move || {
            let mut out = [0u8; 3];
            let n = reader.recv(&mut out, &NeverCancelled).unwrap();
            (out, n)
        });
        let sent = writer.send(&[1, 2, 3], &NeverCancelled).unwrap();
        assert_eq!(sent, 3);
        let (out, n) = handle.join().unwrap();
        assert_eq!(n, 3);
        assert_eq!(&out, &[1, 2, 3]);
    }

    #[test]
    fn recv_before_send_blocks_until_send() {
        let (writer, reader) = pipe();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.send(&[9], &NeverCancelled).unwrap();
        });
        let mut out = [0u8; 1];
        let n = reader.recv(&mut out, &NeverCancelled).unwrap();
        assert_eq!(n, 1);
        assert_eq!(out, [9]);
        handle.join().unwrap();
    }

    #[test]
    fn send_larger_than_one_recv_call_drains_across_several_calls() {
        // Mirrors `BithreadPipeTest.cpp`'s `DoWrite`/`DoRead`: a pipe is
        // reused across many sequential partial write/read cycles, and one
        // `send` call isn't required to line up 1:1 with one `recv` call.
        let (writer, reader) = pipe();
        let handle = thread::spawn(move || {
            let mut received = Vec::new();
            let mut chunk = [0u8; 4];
            while received.len() < 10 {
                let n = reader.recv(&mut chunk, &NeverCancelled).unwrap();
                received.extend_from_slice(&chunk[..n]);
            }
            received
        });

        let data: Vec<u8> = (0..10).collect();
        let sent = writer.send(&data, &NeverCancelled).unwrap();
        assert_eq!(sent, 10);
        assert_eq!(handle.join().unwrap(), data);
    }

    #[test]
    fn pipe_is_reusable_across_many_send_recv_cycles() {
        let (writer, reader) = pipe();
        let handle = thread::spawn(move || {
            let mut out = [0u8; 8];
            let mut total = Vec::new();
            for _ in 0..4 {
                let n = reader.recv(&mut out, &NeverCancelled).unwrap();
                total.extend_from_slice(&out[..n]);
            }
            total
        });

        let mut expected = Vec::new();
        for i in 0u8..4 {
            let chunk = vec![i; 2];
            writer.send(&chunk, &NeverCancelled).unwrap();
            expected.extend_from_slice(&chunk);
        }
        assert_eq!(handle.join().unwrap(), expected);
    }

    #[test]
    fn dropping_writer_without_sending_disconnects_reader() {
        let (writer, reader) = pipe();
        drop(writer);
        let mut out = [0u8; 1];
        assert!(matches!(
            reader.recv(&mut out, &NeverCancelled),
            Err(PipeError::Disconnected)
        ));
    }

    #[test]
    fn dropping_reader_disconnects_pending_send() {
        let (writer, reader) = pipe();
        drop(reader);
        let result = writer.send(&[1], &NeverCancelled);
        assert!(matches!(result, Err(PipeError::Disconnected)));
    }

    #[test]
    fn cancelled_recv_leaves_pipe_usable_for_a_later_handshake() {
        let (writer, reader) = pipe();
        let token = CancelFlag::new();
        let token2 = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            token2.cancel();
        });
        let mut out = [0u8; 1];
        let result = reader.recv(&mut out, &token);
        assert!(matches!(result, Err(PipeError::Cancelled)));
        handle.join().unwrap();

        // Nothing was ever sent, so the cancelled recv took nothing; a
        // fresh recv on the same pipe still completes a later send.
        let reader_handle = thread::spawn(move || {
            let mut out = [0u8; 1];
            let n = reader.recv(&mut out, &NeverCancelled).unwrap();
            (out, n)
        });
        let sent = writer.send(&[5], &NeverCancelled).unwrap();
        assert_eq!(sent, 1);
        let (out, n) = reader_handle.join().unwrap();
        assert_eq!(n, 1);
        assert_eq!(out, [5]);
    }

    #[test]
    fn cancelled_send_before_any_bytes_move_reports_cancelled() {
        let (writer, reader) = pipe();
        let token = CancelFlag::new();
        let token2 = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            token2.cancel();
        });
        // No reader ever calls `recv`, so the send can't make any progress
        // before its token fires.
        let result = writer.send(&[1, 2, 3], &token);
        assert!(matches!(result, Err(PipeError::Cancelled)));
        handle.join().unwrap();
        drop(reader);
    }
}
