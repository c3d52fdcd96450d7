//! Component E: the paged buffer.
//!
//! An append-only byte log held as a deque of opaque, fixed-size pages. Push
//! appends (splitting across page boundaries as needed), read streams bytes
//! out through a page-supplied [`crate::byte_buffer::ByteConsumer`] starting
//! at a movable cursor, pop discards consumed bytes from the front, and seek
//! repositions the cursor. Unlike the ring-backed components, there is no
//! intrinsic blocking here: push/read only ever suspend inside the page's own
//! I/O, never on a condvar of this buffer's own.
//!
//! Grounded on the teacher's `Config::new` panicking-assert constructor style
//! (`config.rs`) for [`PagedBufferConfig`], and on the same outer-mutex
//! discipline as components C/D for the index state.

use crate::byte_buffer::ByteConsumer;
use crate::cancel::CancellationToken;
use crate::error::PagedBufferError;
use crate::invariants::debug_assert_cursor_in_range;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A single fixed-size storage unit. Implementations decide where the bytes
/// actually live (memory, a file, a network-backed cache, ...); the paged
/// buffer only ever touches a page through this interface, and only while its
/// own index mutex is released.
pub trait Page: Send + Sync {
    /// Writes `data` starting at `offset` within the page. Returns the number
    /// of bytes actually written, which the caller bounds to fit the page's
    /// remaining capacity before calling; a page that accepts fewer than that
    /// is reported as a fatal short write.
    fn write(
        &self,
        offset: usize,
        data: &[u8],
        token: &dyn CancellationToken,
    ) -> Result<usize, PagedBufferError>;

    /// Hands the page's content starting at `offset` to `consumer`. Returns
    /// the number of bytes the consumer accepted.
    fn read(
        &self,
        offset: usize,
        consumer: &mut dyn ByteConsumer,
        token: &dyn CancellationToken,
    ) -> Result<usize, PagedBufferError>;
}

/// An in-memory [`Page`] backed by a fixed-size byte array.
pub struct MemPage {
    size: usize,
    data: Mutex<Box<[u8]>>,
}

impl MemPage {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            data: Mutex::new(vec![0u8; size].into_boxed_slice()),
        }
    }
}

impl Page for MemPage {
    fn write(
        &self,
        offset: usize,
        data: &[u8],
        _token: &dyn CancellationToken,
    ) -> Result<usize, PagedBufferError> {
        let mut buf = self.data.lock().unwrap();
        let avail = self.size.saturating_sub(offset);
        let n = data.len().min(avail);
        buf[offset..offset + n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn read(
        &self,
        offset: usize,
        consumer: &mut dyn ByteConsumer,
        token: &dyn CancellationToken,
    ) -> Result<usize, PagedBufferError> {
        let buf = self.data.lock().unwrap();
        let avail = self.size.saturating_sub(offset);
        let processed = consumer.process(&buf[offset..offset + avail], token);
        Ok(processed.min(avail))
    }
}

/// Configuration for a [`PagedBuffer`].
#[derive(Debug, Clone, Copy)]
pub struct PagedBufferConfig {
    pub page_size: usize,
}

impl PagedBufferConfig {
    /// # Panics
    ///
    /// Panics if `page_size` is zero.
    pub const fn new(page_size: usize) -> Self {
        assert!(page_size > 0, "page_size must be nonzero");
        Self { page_size }
    }
}

impl Default for PagedBufferConfig {
    fn default() -> Self {
        Self::new(4096)
    }
}

struct IndexState {
    pages: VecDeque<Arc<dyn Page>>,
    /// Absolute page index of `pages[0]` (pages already dropped by `pop` are
    /// not retained, so this is the count of pages ever dropped).
    dropped_pages: usize,
    /// Absolute offset of the first live byte.
    start_offset: usize,
    /// Absolute read cursor; always `>= start_offset`.
    current_offset: usize,
    /// Unused bytes at the end of the last page (0 if there is no tail page
    /// to append into, i.e. the buffer is freshly created or the last page
    /// is exactly full).
    tail_size: usize,
}

/// An append-only byte log backed by a deque of [`Page`]s.
pub struct PagedBuffer {
    page_size: usize,
    new_page: Box<dyn Fn() -> Arc<dyn Page> + Send + Sync>,
    index: Mutex<IndexState>,
    write_mutex: Mutex<()>,
    active_read: AtomicBool,
}

impl PagedBuffer {
    /// `new_page` is called to allocate each fresh page as the buffer grows;
    /// it must return pages of `config.page_size` bytes.
    pub fn new(
        config: PagedBufferConfig,
        new_page: impl Fn() -> Arc<dyn Page> + Send + Sync + 'static,
    ) -> Self {
        Self {
            page_size: config.page_size,
            new_page: Box::new(new_page),
            index: Mutex::new(IndexState {
                pages: VecDeque::new(),
                dropped_pages: 0,
                start_offset: 0,
                current_offset: 0,
                tail_size: 0,
            }),
            write_mutex: Mutex::new(()),
            active_read: AtomicBool::new(false),
        }
    }

    /// Convenience constructor backed by [`MemPage`]s.
    pub fn new_in_memory(config: PagedBufferConfig) -> Self {
        let page_size = config.page_size;
        Self::new(config, move || Arc::new(MemPage::new(page_size)) as Arc<dyn Page>)
    }

    fn write_head(&self, idx: &IndexState) -> usize {
        if idx.pages.is_empty() {
            idx.dropped_pages * self.page_size
        } else {
            (idx.dropped_pages + idx.pages.len()) * self.page_size - idx.tail_size
        }
    }

    /// Number of bytes currently live (pushed but not yet popped).
    pub fn storage_size(&self) -> usize {
        let idx = self.index.lock().unwrap();
        self.write_head(&idx) - idx.start_offset
    }

    /// Number of bytes not yet consumed by the read cursor.
    pub fn unread_size(&self) -> usize {
        let idx = self.index.lock().unwrap();
        self.write_head(&idx) - idx.current_offset
    }

    /// Appends `data` to the end of the buffer, allocating new pages as
    /// needed. A page that accepts fewer bytes than it was asked for (after
    /// the request was already bounded to its remaining capacity) fails the
    /// whole push, since partial page writes are never expected in normal
    /// operation.
    pub fn push(&self, data: &[u8], token: &dyn CancellationToken) -> Result<(), PagedBufferError> {
        if data.is_empty() {
            return Ok(());
        }
        let _write_guard = self.write_mutex.lock().unwrap();
        let mut offset_in_data = 0;

        while offset_in_data < data.len() {
            let (page, page_offset) = {
                let mut idx = self.index.lock().unwrap();
                if idx.tail_size == 0 {
                    let page = (self.new_page)();
                    idx.pages.push_back(Arc::clone(&page));
                    idx.tail_size = self.page_size;
                    (page, 0)
                } else {
                    let page = idx
                        .pages
                        .back()
                        .expect("tail_size > 0 implies a tail page exists")
                        .clone();
                    let page_offset = self.page_size - idx.tail_size;
                    (page, page_offset)
                }
            };

            let capacity_remaining = self.page_size - page_offset;
            let chunk = &data[offset_in_data..];
            let expected = chunk.len().min(capacity_remaining);
            let written = page.write(page_offset, &chunk[..expected], token)?;
            if written != expected {
                return Err(PagedBufferError::ShortWrite {
                    accepted: written,
                    requested: expected,
                });
            }

            let mut idx = self.index.lock().unwrap();
            idx.tail_size -= written;
            offset_in_data += written;
        }

        Ok(())
    }

    /// Streams bytes starting at the read cursor to `consumer`, advancing the
    /// cursor by however much the consumer accepted. Returns `0` if the
    /// cursor has caught up to the write head. Only one `read` may be in
    /// flight at a time; a concurrent call returns
    /// [`PagedBufferError::ReadInProgress`].
    pub fn read(
        &self,
        consumer: &mut dyn ByteConsumer,
        token: &dyn CancellationToken,
    ) -> Result<usize, PagedBufferError> {
        if self.active_read.swap(true, Ordering::AcqRel) {
            return Err(PagedBufferError::ReadInProgress);
        }
        let result = self.read_inner(consumer, token);
        self.active_read.store(false, Ordering::Release);
        result
    }

    fn read_inner(
        &self,
        consumer: &mut dyn ByteConsumer,
        token: &dyn CancellationToken,
    ) -> Result<usize, PagedBufferError> {
        let (page, page_offset, captured_current) = {
            let idx = self.index.lock().unwrap();
            let head = self.write_head(&idx);
            debug_assert_cursor_in_range!(idx.current_offset, idx.start_offset, head);
            if idx.current_offset >= head {
                return Ok(0);
            }
            let page_idx = idx.current_offset / self.page_size - idx.dropped_pages;
            let page_offset = idx.current_offset % self.page_size;
            let page = idx.pages[page_idx].clone();
            (page, page_offset, idx.current_offset)
        };

        let processed = page.read(page_offset, consumer, token)?;

        let mut idx = self.index.lock().unwrap();
        if idx.current_offset == captured_current {
            // Nothing moved the cursor while the page I/O ran unlocked.
            idx.current_offset += processed;
        }
        // Otherwise a concurrent `seek` repositioned the cursor during the
        // unlocked I/O; this read's bytes are stale and its advance is
        // dropped rather than overwriting the new position.
        Ok(processed)
    }

    /// Discards `size` bytes from the front of the live data, dropping any
    /// page that becomes entirely consumed. If the read cursor was inside the
    /// popped region it is clamped forward to the new `start_offset`.
    pub fn pop(&self, size: usize) -> Result<(), PagedBufferError> {
        let mut idx = self.index.lock().unwrap();
        let head = self.write_head(&idx);
        idx.start_offset = (idx.start_offset + size).min(head);
        if idx.current_offset < idx.start_offset {
            idx.current_offset = idx.start_offset;
        }
        while !idx.pages.is_empty() {
            let front_end = (idx.dropped_pages + 1) * self.page_size;
            if front_end > idx.start_offset {
                break;
            }
            idx.pages.pop_front();
            idx.dropped_pages += 1;
        }
        Ok(())
    }

    /// Repositions the read cursor to `start_offset + offset`. `offset` is
    /// relative to the first live byte and must not exceed the amount of
    /// live data.
    pub fn seek(&self, offset: usize) -> Result<(), PagedBufferError> {
        let mut idx = self.index.lock().unwrap();
        let storage_size = self.write_head(&idx) - idx.start_offset;
        if offset > storage_size {
            return Err(PagedBufferError::SeekOutOfRange {
                offset,
                storage_size,
            });
        }
        idx.current_offset = idx.start_offset + offset;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::NeverCancelled;

    struct Collector {
        out: Vec<u8>,
    }

    impl ByteConsumer for Collector {
        fn process(&mut self, window: &[u8], _token: &dyn CancellationToken) -> usize {
            self.out.extend_from_slice(window);
            window.len()
        }

        fn end_of_data(&mut self, _token: &dyn CancellationToken) {}
    }

    #[test]
    fn push_spans_multiple_pages_and_read_streams_it_back() {
        let buf = PagedBuffer::new_in_memory(PagedBufferConfig::new(4));
        buf.push(b"hello world!", &NeverCancelled).unwrap();
        assert_eq!(buf.storage_size(), 12);

        let mut collector = Collector { out: Vec::new() };
        loop {
            let n = buf.read(&mut collector, &NeverCancelled).unwrap();
            if n == 0 {
                break;
            }
        }
        assert_eq!(&collector.out, b"hello world!");
        assert_eq!(buf.unread_size(), 0);
    }

    #[test]
    fn pop_drops_fully_consumed_pages() {
        let buf = PagedBuffer::new_in_memory(PagedBufferConfig::new(4));
        buf.push(b"abcdefgh", &NeverCancelled).unwrap();
        buf.pop(5).unwrap();
        assert_eq!(buf.storage_size(), 3);

        let mut collector = Collector { out: Vec::new() };
        buf.read(&mut collector, &NeverCancelled).unwrap();
        assert_eq!(&collector.out, b"fgh");
    }

    #[test]
    fn seek_repositions_cursor_relative_to_start_offset() {
        let buf = PagedBuffer::new_in_memory(PagedBufferConfig::new(4));
        buf.push(b"0123456789", &NeverCancelled).unwrap();
        buf.seek(5).unwrap();

        let mut collector = Collector { out: Vec::new() };
        loop {
            let n = buf.read(&mut collector, &NeverCancelled).unwrap();
            if n == 0 {
                break;
            }
        }
        assert_eq!(&collector.out, b"56789");
    }

    #[test]
    fn seek_past_live_data_is_rejected() {
        let buf = PagedBuffer::new_in_memory(PagedBufferConfig::new(4));
        buf.push(b"abc", &NeverCancelled).unwrap();
        assert!(matches!(
            buf.seek(4),
            Err(PagedBufferError::SeekOutOfRange { .. })
        ));
    }

    #[test]
    fn concurrent_read_is_rejected() {
        let buf = PagedBuffer::new_in_memory(PagedBufferConfig::new(4));
        buf.push(b"abcd", &NeverCancelled).unwrap();
        buf.active_read.store(true, Ordering::SeqCst);
        let mut collector = Collector { out: Vec::new() };
        assert!(matches!(
            buf.read(&mut collector, &NeverCancelled),
            Err(PagedBufferError::ReadInProgress)
        ));
        buf.active_read.store(false, Ordering::SeqCst);
    }

    #[test]
    fn seek_during_unlocked_read_io_wins_over_stale_advance() {
        use std::sync::{OnceLock, Weak};

        // A page whose `read` seeks the buffer back into itself mid-call,
        // modeling a concurrent `seek` racing in while `read_inner` has
        // released the index mutex for the page's own (here, synchronous
        // but logically unlocked) I/O.
        struct SeekingPage {
            inner: MemPage,
            buf: OnceLock<Weak<PagedBuffer>>,
            seek_to: usize,
        }
        impl Page for SeekingPage {
            fn write(
                &self,
                offset: usize,
                data: &[u8],
                token: &dyn CancellationToken,
            ) -> Result<usize, PagedBufferError> {
                self.inner.write(offset, data, token)
            }
            fn read(
                &self,
                offset: usize,
                consumer: &mut dyn ByteConsumer,
                token: &dyn CancellationToken,
            ) -> Result<usize, PagedBufferError> {
                let buf = self
                    .buf
                    .get()
                    .and_then(Weak::upgrade)
                    .expect("buf set before any read runs");
                buf.seek(self.seek_to).unwrap();
                self.inner.read(offset, consumer, token)
            }
        }

        let page_size = 8;
        let page = Arc::new(SeekingPage {
            inner: MemPage::new(page_size),
            buf: OnceLock::new(),
            seek_to: 3,
        });
        let buf = Arc::new(PagedBuffer::new(PagedBufferConfig::new(page_size), {
            let page = Arc::clone(&page);
            move || Arc::clone(&page) as Arc<dyn Page>
        }));
        page.buf
            .set(Arc::downgrade(&buf))
            .unwrap_or_else(|_| unreachable!());

        buf.push(b"abcdefgh", &NeverCancelled).unwrap();
        buf.seek(0).unwrap();

        let mut collector = Collector { out: Vec::new() };
        let n = buf.read(&mut collector, &NeverCancelled).unwrap();

        // `read_inner` captured current_offset == 0 before calling into the
        // page, so it reads the whole page starting at 0; but the page's
        // own I/O repositioned the cursor to 3 while the index mutex was
        // released, and that reposition must win over read's stale advance.
        assert_eq!(&collector.out, b"abcdefgh");
        assert_eq!(n, 8);
        assert_eq!(buf.unread_size(), 5);

        let mut collector2 = Collector { out: Vec::new() };
        buf.read(&mut collector2, &NeverCancelled).unwrap();
        assert_eq!(&collector2.out, b"defgh");
    }
}
