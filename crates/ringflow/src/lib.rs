//! Bounded, cancellable byte/packet streaming primitives.
//!
//! Six pieces, each independently usable, sharing one design vocabulary
//! (cancellation tokens, bounded blocking, packet framing, backpressure):
//!
//! - [`ring`] — a lock-free-in-name-only bithread circular buffer: single
//!   producer, single reader, windowed zero-copy access, no internal locking
//!   (the wrapping buffer's mutex supplies atomicity).
//! - [`pipe`] — a one-shot rendezvous handshake between exactly one writer
//!   and one reader.
//! - [`byte_buffer`] — a packetized, bounded byte pipeline over a [`ring`].
//! - [`packet_buffer`] — like [`byte_buffer`] but preserves whole-packet
//!   boundaries, padding around the ring's wrap point instead of splitting a
//!   packet across it.
//! - [`paged_buffer`] — a random-access, append-growable byte store backed
//!   by a deque of fixed-size pages.
//! - [`async_stream`] — a write-coalescing facade over a seekable backing
//!   stream, draining an op queue on a dedicated worker thread.
//!
//! [`cancel`] holds the cancellation-token contract every blocking call in
//! this crate takes; [`error`] holds the per-component `thiserror` enums;
//! [`metrics`] holds the atomics-backed observability counters; `invariants`
//! holds debug-only consistency checks gated behind `cfg(debug_assertions)`.

pub mod async_stream;
pub mod byte_buffer;
pub mod cancel;
pub mod error;
mod invariants;
pub mod metrics;
pub mod packet_buffer;
pub mod paged_buffer;
pub mod pipe;
pub mod ring;

pub use async_stream::{
    AsyncByteStream, AsyncStreamConfig, BackingStream, MemBackingStream, MemBackingStreamHandle,
};
pub use byte_buffer::{ByteBufferConfig, ByteConsumer, ByteDataBuffer};
pub use cancel::{CancelFlag, CancellationToken, Cancelled, NeverCancelled};
pub use error::{BufferError, PacketBufferError, PagedBufferError, PipeError, RingError, StreamError};
pub use packet_buffer::{PacketBuffer, PacketBufferConfig, PacketConsumer};
pub use paged_buffer::{MemPage, Page, PagedBuffer, PagedBufferConfig};
pub use pipe::{pipe, Pipe, PipeReader, PipeWriter};
pub use ring::{ReadWindow, Ring, WriteWindow};
