//! Component A: the bithread circular buffer.
//!
//! A single-producer/single-consumer ring that exposes contiguous
//! read/write windows instead of a `push`/`pop` API, so callers can
//! `memcpy` (or `Read`/`Write`) straight against a plain slice with no
//! wrap-around logic of their own.
//!
//! Unlike the teacher's `Ring<T>` (`crates/ringmpsc/src/ring.rs`), which is
//! genuinely lock-free and synchronizes `head`/`tail` with atomics because
//! nothing else protects it, this ring is specified (spec §4.A, §5) to do
//! **no locking of its own**: every field here is a plain, non-atomic value,
//! and soundness comes entirely from the wrapping wire-up (components C, D,
//! F below, which hold `Mutex<Ring>`) giving exclusive `&mut Ring` access
//! for every window-take and every commit. What survives the unlock/lock
//! cycle used for "copy under unlock" (spec §4.C design note) is not a
//! borrow of the ring but a detached raw pointer — the same trick the
//! teacher's `Reservation<'a, T>` uses to let a write span outlive the
//! function call that produced it, just with a back-pointer to a `Ring`
//! under an external mutex instead of one guarded by atomics.

use crate::error::RingError;
use crate::invariants::{
    debug_assert_commit_in_range, debug_assert_no_outstanding_window, debug_assert_ring_conserved,
};
use std::slice;

/// Zero-copy SPSC ring buffer. See the module docs for the concurrency
/// discipline this type assumes.
pub struct Ring {
    storage: Box<[u8]>,
    capacity: usize,
    write_off: usize,
    read_off: usize,
    /// `true`  ⇒ data occupies `storage[read_off..write_off)`, `read_off <= write_off`.
    /// `false` ⇒ data wraps: `storage[read_off..] ∪ storage[..write_off)`.
    contiguous: bool,
    write_window_out: bool,
    read_window_out: bool,
}

impl Ring {
    /// Creates a new ring of `capacity` bytes, initially empty.
    pub fn new(capacity: usize) -> Result<Self, RingError> {
        if capacity == 0 {
            return Err(RingError::ZeroCapacity);
        }
        Ok(Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            capacity,
            write_off: 0,
            read_off: 0,
            contiguous: true,
            write_window_out: false,
            read_window_out: false,
        })
    }

    /// Total storage size, `N`.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently held by the ring, available to a reader.
    #[inline]
    pub fn data_size(&self) -> usize {
        if self.contiguous {
            self.write_off - self.read_off
        } else {
            self.capacity - self.read_off + self.write_off
        }
    }

    /// Bytes of headroom available to a writer.
    #[inline]
    pub fn free_size(&self) -> usize {
        self.capacity - self.data_size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read_off == self.write_off && self.contiguous
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.read_off == self.write_off && !self.contiguous
    }

    /// Size of the largest contiguous unwritten region, without taking a
    /// window. Lets a waiting thread re-check its predicate (e.g. inside a
    /// condvar wait loop) without the single-outstanding-window restriction
    /// a real [`write_window`](Self::write_window) call would impose.
    #[inline]
    pub fn peek_write_len(&self) -> usize {
        if self.contiguous {
            self.capacity - self.write_off
        } else {
            self.read_off - self.write_off
        }
    }

    /// Read-side counterpart to [`peek_write_len`](Self::peek_write_len).
    #[inline]
    pub fn peek_read_len(&self) -> usize {
        if self.contiguous {
            self.write_off - self.read_off
        } else {
            self.capacity - self.read_off
        }
    }

    /// Whether `data = storage[read_off..write_off)` (`true`) or the data
    /// wraps around the end of storage (`false`). Exposed so layered
    /// buffers (packet framing in particular) can tell whether the current
    /// write or read window reaches the physical end of storage without
    /// re-deriving the formula themselves.
    #[inline]
    pub fn is_contiguous(&self) -> bool {
        self.contiguous
    }

    /// Returns the largest contiguous unwritten region starting at
    /// `write_off`. Fails if a write window is already outstanding.
    pub fn write_window(&mut self) -> Result<WriteWindow, RingError> {
        if self.write_window_out {
            debug_assert_no_outstanding_window!(self.write_window_out, "write");
            return Err(RingError::WindowOutstanding);
        }
        let size = if self.contiguous {
            self.capacity - self.write_off
        } else {
            self.read_off - self.write_off
        };
        // SAFETY: `write_off + size` never exceeds `storage.len()`: when
        // contiguous, size is exactly `capacity - write_off`; when not,
        // `read_off <= capacity` and `read_off - write_off <= capacity - write_off`.
        let ptr = unsafe { self.storage.as_mut_ptr().add(self.write_off) };
        self.write_window_out = true;
        Ok(WriteWindow {
            ring: self,
            ptr,
            len: size,
        })
    }

    /// Returns the largest contiguous readable region starting at
    /// `read_off`. Fails if a read window is already outstanding.
    pub fn read_window(&mut self) -> Result<ReadWindow, RingError> {
        if self.read_window_out {
            debug_assert_no_outstanding_window!(self.read_window_out, "read");
            return Err(RingError::WindowOutstanding);
        }
        let size = if self.contiguous {
            self.write_off - self.read_off
        } else {
            self.capacity - self.read_off
        };
        // SAFETY: symmetric to `write_window`.
        let ptr = unsafe { self.storage.as_ptr().add(self.read_off) };
        self.read_window_out = true;
        Ok(ReadWindow {
            ring: self,
            ptr,
            len: size,
        })
    }

    fn commit_write_internal(&mut self, n: usize) -> Result<(), RingError> {
        let new_off = self.write_off + n;
        if new_off == self.capacity {
            self.write_off = 0;
            self.contiguous = !self.contiguous;
        } else {
            self.write_off = new_off;
        }
        debug_assert_ring_conserved!(self.data_size(), self.free_size(), self.capacity);
        Ok(())
    }

    fn commit_read_internal(&mut self, n: usize) -> Result<(), RingError> {
        let new_off = self.read_off + n;
        if new_off == self.capacity {
            self.read_off = 0;
            self.contiguous = !self.contiguous;
        } else {
            self.read_off = new_off;
        }
        debug_assert_ring_conserved!(self.data_size(), self.free_size(), self.capacity);
        Ok(())
    }
}

// `Ring` holds no raw pointers itself (only owned storage and plain
// offsets), so it is `Send`/`Sync` automatically; it is safe to move to
// another thread or share behind an external `Mutex`, which is the only
// way this crate ever exposes it.

/// A mutable, non-owning view into a [`Ring`]'s unwritten region.
///
/// Detached from `&mut Ring`'s borrow on purpose (it stores a raw pointer
/// back to the ring, not a lifetime-carrying reference) so that the buffer
/// wrapping the ring can drop its outer lock while the caller copies into
/// this window, then re-acquire the lock only to call [`commit`](Self::commit).
/// Exactly one `WriteWindow` may be outstanding per ring at a time; dropping
/// one without calling `commit` is equivalent to committing zero bytes.
pub struct WriteWindow {
    ring: *mut Ring,
    ptr: *mut u8,
    len: usize,
}

impl WriteWindow {
    /// The window's size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrows the window's bytes for writing.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `ptr` was derived from the ring's storage and is valid
        // for `len` bytes; no other window into the same region exists
        // because the ring refuses to hand out a second write window
        // while this one is outstanding.
        unsafe { slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// Publishes `n` of the window's bytes as produced. `n` may be less
    /// than [`len`](Self::len) to commit a partial write.
    pub fn commit(self, n: usize) -> Result<(), RingError> {
        debug_assert_commit_in_range!(n, self.len);
        if n > self.len {
            return Err(RingError::OutOfRange {
                requested: n,
                available: self.len,
            });
        }
        // SAFETY: `ring` is valid for the lifetime of this window: it is
        // only ever constructed from `Ring::write_window`, which borrows
        // `&mut Ring` for the duration of that call only, and the caller
        // (always a component in this crate, never exposed across threads
        // without its own mutex) guarantees the ring outlives the window.
        unsafe { (*self.ring).commit_write_internal(n) }
    }
}

impl Drop for WriteWindow {
    fn drop(&mut self) {
        // SAFETY: see `commit`.
        unsafe {
            (*self.ring).write_window_out = false;
        }
    }
}

/// A read-only, non-owning view into a [`Ring`]'s readable region. See
/// [`WriteWindow`] for the detachment rationale; the read side is symmetric.
pub struct ReadWindow {
    ring: *mut Ring,
    ptr: *const u8,
    len: usize,
}

impl ReadWindow {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrows the window's bytes for reading.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: symmetric to `WriteWindow::as_mut_slice`.
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Acknowledges `n` of the window's bytes as consumed.
    pub fn commit(self, n: usize) -> Result<(), RingError> {
        debug_assert_commit_in_range!(n, self.len);
        if n > self.len {
            return Err(RingError::OutOfRange {
                requested: n,
                available: self.len,
            });
        }
        // SAFETY: see `WriteWindow::commit`.
        unsafe { (*self.ring).commit_read_internal(n) }
    }
}

impl Drop for ReadWindow {
    fn drop(&mut self) {
        // SAFETY: see `WriteWindow::drop`.
        unsafe {
            (*self.ring).read_window_out = false;
        }
    }
}
