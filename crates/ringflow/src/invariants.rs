//! Debug assertion macros for the invariants documented in `spec.md` §8
//! ("Testable Properties") and the per-component contracts in §4.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`) — zero overhead
//! in release builds, same trade-off the teacher makes in its own
//! `invariants.rs`.

// =============================================================================
// INV-RING-01: Conservation
// =============================================================================

/// `data_size + free_size == capacity` must always hold for the ring.
///
/// Used in: `Ring::commit_write_internal`, `Ring::commit_read_internal`.
macro_rules! debug_assert_ring_conserved {
    ($data_size:expr, $free_size:expr, $capacity:expr) => {
        debug_assert!(
            $data_size + $free_size == $capacity,
            "INV-RING-01 violated: data_size {} + free_size {} != capacity {}",
            $data_size,
            $free_size,
            $capacity
        )
    };
}

// =============================================================================
// INV-RING-02: Commit Bounds
// =============================================================================

/// A commit can never exceed the window it was taken against.
///
/// Used in: `Ring::commit_write_internal`, `Ring::commit_read_internal`.
macro_rules! debug_assert_commit_in_range {
    ($n:expr, $window_size:expr) => {
        debug_assert!(
            $n <= $window_size,
            "INV-RING-02 violated: commit of {} exceeds window size {}",
            $n,
            $window_size
        )
    };
}

// =============================================================================
// INV-RING-03: Single Outstanding Window
// =============================================================================

/// At most one write window and one read window may be outstanding at a
/// time.
///
/// Used in: `Ring::write_window`, `Ring::read_window`.
macro_rules! debug_assert_no_outstanding_window {
    ($flag:expr, $kind:literal) => {
        debug_assert!(
            !$flag,
            "INV-RING-03 violated: a {} window is already outstanding",
            $kind
        )
    };
}

// =============================================================================
// INV-PKT-01: Packet Boundary Preservation
// =============================================================================

/// A packet descriptor's recorded size must never exceed the read window
/// it is about to be served from.
///
/// Used in: `PacketBuffer::read`.
macro_rules! debug_assert_packet_fits_window {
    ($size:expr, $window_size:expr) => {
        debug_assert!(
            $size <= $window_size,
            "INV-PKT-01 violated: packet size {} exceeds read window {}",
            $size,
            $window_size
        )
    };
}

// =============================================================================
// INV-PKT-02: Padding Observability
// =============================================================================

/// Padding bytes must be fully consumed (by an internal commit_read) before
/// the next packet descriptor is served; the consumer must never see them.
///
/// Used in: `PacketBuffer::read`.
macro_rules! debug_assert_padding_cleared {
    ($padding_size:expr) => {
        debug_assert!(
            $padding_size == 0,
            "INV-PKT-02 violated: {} padding bytes still pending after clearing",
            $padding_size
        )
    };
}

// =============================================================================
// INV-BUF-01: End-of-Data Monotonicity
// =============================================================================

/// `eod` and latched exceptions are one-shot: once true, a buffer never
/// reports "not eod" again.
///
/// Used in: `ByteDataBuffer::end_of_data`, `PacketBuffer::end_of_data`.
macro_rules! debug_assert_monotonic_flag {
    ($old:expr, $new:expr, $name:literal) => {
        debug_assert!(
            !$old || $new,
            "INV-BUF-01 violated: {} flipped from true back to false",
            $name
        )
    };
}

// =============================================================================
// INV-ASYNC-01: Op Queue FIFO Order
// =============================================================================

/// Ops must be retired by the worker in the order they were submitted
/// (coalescing may widen an existing op but never reorders the queue).
///
/// Used in: `AsyncByteStream`'s worker loop.
macro_rules! debug_assert_monotonic_seq {
    ($old:expr, $new:expr, $name:literal) => {
        debug_assert!(
            $new >= $old,
            "INV-ASYNC-01 violated: {} sequence decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

// =============================================================================
// INV-PAGED-01: Cursor Containment
// =============================================================================

/// `current_offset` must always stay within `[start_offset, write head]`.
///
/// Used in: `PagedBuffer::seek`, `PagedBuffer::pop`, `PagedBuffer::read`.
macro_rules! debug_assert_cursor_in_range {
    ($current:expr, $start:expr, $end:expr) => {
        debug_assert!(
            $current >= $start && $current <= $end,
            "INV-PAGED-01 violated: current_offset {} outside [{}, {}]",
            $current,
            $start,
            $end
        )
    };
}

pub(crate) use debug_assert_commit_in_range;
pub(crate) use debug_assert_cursor_in_range;
pub(crate) use debug_assert_monotonic_flag;
pub(crate) use debug_assert_monotonic_seq;
pub(crate) use debug_assert_no_outstanding_window;
pub(crate) use debug_assert_padding_cleared;
pub(crate) use debug_assert_packet_fits_window;
pub(crate) use debug_assert_ring_conserved;
