//! Throughput Benchmark for EmberKV
//!
//! This benchmark measures the cache engine, the header parser and the
//! connection state machine under various workloads.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use emberkv::commands::CommandHandler;
use emberkv::connection::{Connection, ConnectionStats};
use emberkv::coroutine::{yield_now, Scheduler};
use emberkv::protocol::Parser;
use emberkv::storage::StorageEngine;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

/// Benchmark PUT operations
fn bench_put(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    let mut group = c.benchmark_group("put");
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            let value = Bytes::from("small_value");
            engine.put(key, value);
            i += 1;
        });
    });

    group.bench_function("put_large", |b| {
        let mut i = 0u64;
        let value = Bytes::from("x".repeat(64 * 1024)); // 64KB value
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            engine.put(key, value.clone());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark eviction pressure: every insert evicts once the cache is full
fn bench_evicting_put(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::with_capacity(64 * 1024));
    let value = Bytes::from("x".repeat(1024));

    let mut group = c.benchmark_group("evict");
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_full_cache", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            engine.put(key, value.clone());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark GET operations
fn bench_get(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    // Pre-populate with data
    for i in 0..100_000 {
        let key = Bytes::from(format!("key:{}", i));
        let value = Bytes::from(format!("value:{}", i));
        engine.put(key, value);
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(engine.get(key.as_bytes()));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(engine.get(key.as_bytes()));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark concurrent access
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_mixed", |b| {
        b.iter(|| {
            let engine = Arc::new(StorageEngine::new());
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let engine = Arc::clone(&engine);
                    thread::spawn(move || {
                        for i in 0..10_000 {
                            let key = Bytes::from(format!("key:{}:{}", t, i));
                            let value = Bytes::from("value");
                            engine.put(key.clone(), value);
                            engine.get(&key);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(engine.len());
        });
    });

    group.finish();
}

/// Benchmark header parsing
fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_header", |b| {
        let mut parser = Parser::new();
        b.iter(|| {
            parser.parse(black_box(b"set user:1000 0 0 128 noreply\r\n")).unwrap();
            black_box(parser.build().unwrap());
            parser.reset();
        });
    });

    group.bench_function("get_many_keys", |b| {
        let mut parser = Parser::new();
        let line = format!(
            "get {}\r\n",
            (0..32).map(|i| format!("key:{}", i)).collect::<Vec<_>>().join(" ")
        );
        b.iter(|| {
            parser.parse(black_box(line.as_bytes())).unwrap();
            black_box(parser.build().unwrap());
            parser.reset();
        });
    });

    group.finish();
}

/// Replays the same request bytes forever and discards responses.
struct Replay {
    request: &'static [u8],
    budget: usize,
}

impl Read for Replay {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.budget == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        self.budget -= 1;
        let n = self.request.len().min(buf.len());
        buf[..n].copy_from_slice(&self.request[..n]);
        Ok(n)
    }
}

impl Write for Replay {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Benchmark the connection state machine without a socket
fn bench_connection(c: &mut Criterion) {
    let handler = CommandHandler::new(Arc::new(StorageEngine::new()));
    let stats = Arc::new(ConnectionStats::new());
    let request: &'static [u8] = b"set k 0 0 5\r\nhello\r\nget k\r\n";

    let mut group = c.benchmark_group("connection");
    group.throughput(Throughput::Elements(2));

    group.bench_function("set_get_cycle", |b| {
        let stream = Replay { request, budget: 0 };
        let mut conn = Connection::new(stream, "bench", Arc::clone(&stats));
        b.iter(|| {
            conn.stream_mut().budget = 1;
            black_box(conn.advance(&handler).unwrap());
        });
    });

    group.finish();
}

/// Benchmark routine switching
fn bench_scheduler(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler");

    group.bench_function("yield_ring_of_16", |b| {
        b.iter(|| {
            let scheduler = Scheduler::new();
            for _ in 0..16 {
                scheduler.spawn(async {
                    for _ in 0..64 {
                        yield_now().await;
                    }
                });
            }
            black_box(scheduler.run());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_put,
    bench_evicting_put,
    bench_get,
    bench_concurrent,
    bench_parse,
    bench_connection,
    bench_scheduler,
);

criterion_main!(benches);
