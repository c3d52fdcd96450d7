use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ringflow::{ByteBufferConfig, ByteConsumer, ByteDataBuffer, CancellationToken, NeverCancelled};
use std::sync::Arc;
use std::thread;

const TOTAL_BYTES: u64 = 64 * 1024 * 1024;

struct Sink {
    received: u64,
}

impl ByteConsumer for Sink {
    fn process(&mut self, window: &[u8], _token: &dyn CancellationToken) -> usize {
        self.received += window.len() as u64;
        black_box(window);
        window.len()
    }

    fn end_of_data(&mut self, _token: &dyn CancellationToken) {}
}

fn bench_byte_buffer_spsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("byte_buffer_spsc");
    group.throughput(Throughput::Bytes(TOTAL_BYTES));

    for storage_size in [4096usize, 64 * 1024, 1024 * 1024] {
        group.bench_with_input(
            BenchmarkId::from_parameter(storage_size),
            &storage_size,
            |b, &storage_size| {
                b.iter(|| {
                    let buf = Arc::new(
                        ByteDataBuffer::new(storage_size, ByteBufferConfig::default()).unwrap(),
                    );
                    let producer = Arc::clone(&buf);
                    let producer_handle = thread::spawn(move || {
                        let chunk = vec![0u8; 4096];
                        let mut sent = 0u64;
                        while sent < TOTAL_BYTES {
                            let n = producer.process(&chunk, &NeverCancelled).unwrap();
                            if n == 0 {
                                std::hint::spin_loop();
                                continue;
                            }
                            sent += n as u64;
                        }
                        producer.end_of_data(&NeverCancelled);
                    });

                    let mut sink = Sink { received: 0 };
                    while sink.received < TOTAL_BYTES {
                        buf.read(&mut sink, &NeverCancelled).unwrap();
                    }
                    producer_handle.join().unwrap();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_byte_buffer_spsc);
criterion_main!(benches);
