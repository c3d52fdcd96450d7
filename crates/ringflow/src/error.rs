//! Crate-wide error types, one small `thiserror` enum per component surface,
//! following the teacher's `ChannelError`/`StreamError` convention.

use thiserror::Error;

/// Errors from the bithread ring (component A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    /// `commit_write`/`commit_read` was asked to commit more bytes than the
    /// outstanding window contains.
    #[error("commit of {requested} bytes exceeds window of {available} bytes")]
    OutOfRange { requested: usize, available: usize },
    /// A write (or read) window was requested while one was already
    /// outstanding. The ring admits exactly one of each kind at a time.
    #[error("a write or read window is already outstanding")]
    WindowOutstanding,
    /// `Ring::new` was asked for a zero-capacity ring.
    #[error("ring capacity must be nonzero")]
    ZeroCapacity,
}

/// Errors from the bithread pipe (component B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PipeError {
    /// The operation was cancelled before it could complete.
    #[error("pipe operation cancelled")]
    Cancelled,
    /// The peer side was dropped, so the rendezvous can never complete.
    #[error("pipe peer disconnected")]
    Disconnected,
}

impl From<crate::cancel::Cancelled> for PipeError {
    fn from(_: crate::cancel::Cancelled) -> Self {
        PipeError::Cancelled
    }
}

/// Errors from the byte data buffer (component C).
#[derive(Debug, Clone, Error)]
pub enum BufferError {
    /// The operation was cancelled before it could complete.
    #[error("buffer operation cancelled")]
    Cancelled,
    /// `process` was called with a slice whose length is not a multiple of
    /// `input_packet_size`. Per spec this is logged and the whole slice is
    /// reported consumed rather than retried, so this variant is only ever
    /// returned by APIs (like direct construction validation) where no
    /// "consumed" count can be reported instead.
    #[error("data length {len} is not a multiple of input packet size {packet_size}")]
    Misaligned { len: usize, packet_size: usize },
    /// `required_free_space` does not satisfy the config constraint
    /// `required_free_space < storage size`.
    #[error("required_free_space {required} must be less than storage size {storage_size}")]
    InvalidConfig {
        required: usize,
        storage_size: usize,
    },
    /// The buffer has latched a producer-submitted error via `set_exception`.
    #[error("producer reported an error: {0}")]
    Latched(String),
}

impl From<crate::cancel::Cancelled> for BufferError {
    fn from(_: crate::cancel::Cancelled) -> Self {
        BufferError::Cancelled
    }
}

impl From<RingError> for BufferError {
    fn from(e: RingError) -> Self {
        BufferError::Latched(e.to_string())
    }
}

/// Errors from the packet buffer (component D).
#[derive(Debug, Clone, Error)]
pub enum PacketBufferError {
    /// The operation was cancelled before it could complete.
    #[error("packet buffer operation cancelled")]
    Cancelled,
    /// A packet larger than the ring's storage can never be admitted.
    #[error("packet of {size} bytes exceeds storage size {storage_size}")]
    TooLarge { size: usize, storage_size: usize },
    /// The buffer has latched a producer-submitted error via `set_exception`.
    #[error("producer reported an error: {0}")]
    Latched(String),
}

impl From<crate::cancel::Cancelled> for PacketBufferError {
    fn from(_: crate::cancel::Cancelled) -> Self {
        PacketBufferError::Cancelled
    }
}

impl From<RingError> for PacketBufferError {
    fn from(e: RingError) -> Self {
        PacketBufferError::Latched(e.to_string())
    }
}

/// Errors from the paged buffer (component E).
#[derive(Debug, Clone, Error)]
pub enum PagedBufferError {
    /// The operation was cancelled before it could complete.
    #[error("paged buffer operation cancelled")]
    Cancelled,
    /// `seek` was asked for an offset past the logical end of storage.
    #[error("seek offset {offset} exceeds storage size {storage_size}")]
    SeekOutOfRange { offset: usize, storage_size: usize },
    /// A page only partially consumed a write; per spec this is fatal
    /// because inputs are bounded to fit.
    #[error("page accepted only {accepted} of {requested} bytes")]
    ShortWrite { accepted: usize, requested: usize },
    /// The backing page object reported a failure.
    #[error("page I/O failed: {0}")]
    PageFailed(String),
    /// A second `read` was attempted while one was already in flight. The
    /// paged buffer admits at most one active read at a time.
    #[error("a read is already in progress")]
    ReadInProgress,
}

impl From<crate::cancel::Cancelled> for PagedBufferError {
    fn from(_: crate::cancel::Cancelled) -> Self {
        PagedBufferError::Cancelled
    }
}

/// Errors from the asynchronous buffered byte stream (component F).
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// The operation was cancelled before it could complete.
    #[error("stream operation cancelled")]
    Cancelled,
    /// The worker (or a prior write) latched a failure from the backing
    /// stream; every subsequent op fails with the same error.
    #[error("backing stream failed: {0}")]
    Latched(String),
    /// The worker thread is no longer running.
    #[error("worker has stopped")]
    WorkerStopped,
}

impl From<crate::cancel::Cancelled> for StreamError {
    fn from(_: crate::cancel::Cancelled) -> Self {
        StreamError::Cancelled
    }
}
