//! Property-based coverage for the paged buffer's linearizability claim:
//! single-threaded scripts of push/pop/seek/read behave like an abstract
//! byte queue with a movable read cursor.

use proptest::prelude::*;
use ringflow::cancel::{CancellationToken, NeverCancelled};
use ringflow::paged_buffer::{PagedBuffer, PagedBufferConfig};
use ringflow::ByteConsumer;

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

#[derive(Debug, Clone)]
enum Op {
    Push(Vec<u8>),
    Pop(usize),
    Seek(usize),
    Read,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..30).prop_map(Op::Push),
        (0usize..40).prop_map(Op::Pop),
        (0usize..60).prop_map(Op::Seek),
        Just(Op::Read),
    ]
}

proptest! {
    #[test]
    fn matches_abstract_queue_semantics(
        page_size in 1usize..16,
        ops in prop::collection::vec(op_strategy(), 0..60),
    ) {
        let buf = PagedBuffer::new_in_memory(PagedBufferConfig::new(page_size));

        // Shadow model: `model` holds all bytes ever pushed; `start` and
        // `cursor` are absolute offsets into it, mirroring the buffer's own
        // `start_offset`/`current_offset`.
        let mut model: Vec<u8> = Vec::new();
        let mut start = 0usize;
        let mut cursor = 0usize;

        for op in ops {
            match op {
                Op::Push(data) => {
                    if !data.is_empty() {
                        buf.push(&data, &NeverCancelled).unwrap();
                        model.extend_from_slice(&data);
                    }
                }
                Op::Pop(n) => {
                    buf.pop(n).unwrap();
                    start = (start + n).min(model.len());
                    if cursor < start {
                        cursor = start;
                    }
                }
                Op::Seek(offset) => {
                    let storage_size = model.len().saturating_sub(start);
                    if offset <= storage_size {
                        buf.seek(offset).unwrap();
                        cursor = start + offset;
                    }
                    // An out-of-range seek is rejected by both the real
                    // buffer and this model alike (no-op).
                }
                Op::Read => {
                    let mut collector = Collector { out: Vec::new() };
                    let n = buf.read(&mut collector, &NeverCancelled).unwrap();
                    let available = model.len().saturating_sub(cursor);
                    prop_assert_eq!(n, collector.out.len());
                    prop_assert!(n <= available);
                    if n > 0 {
                        prop_assert_eq!(&collector.out[..], &model[cursor..cursor + n]);
                        cursor += n;
                    } else {
                        prop_assert_eq!(available, 0);
                    }
                }
            }

            prop_assert_eq!(buf.storage_size(), model.len() - start);
            prop_assert_eq!(buf.unread_size(), model.len() - cursor);
        }
    }
}
