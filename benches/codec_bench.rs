//! Benchmarks for the bitmap codec and the task runtime.
//!
//! Benchmarks cover:
//! - Serialization throughput per format
//! - Deserialization throughput per format
//! - Text rendering
//! - Parallel deserialization through the runtime

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

use croaring::Bitmap;
use rand::{rngs::StdRng, Rng, SeedableRng};
use roaring_offload::codec::{deserialize, serialize, to_text_bytes, SerializationFormat, TextStyle};
use roaring_offload::config::RuntimeConfig;
use roaring_offload::core::Runtime;
use roaring_offload::ops::DeserializeParallelTask;

// ============================================================================
// Inputs
// ============================================================================

fn sparse(count: usize) -> Bitmap {
    let mut rng = StdRng::seed_from_u64(42);
    let values: Vec<u32> = (0..count).map(|_| rng.random()).collect();
    Bitmap::of(&values)
}

fn dense(count: u32) -> Bitmap {
    let mut bitmap = Bitmap::new();
    bitmap.add_range(0..count);
    bitmap.run_optimize();
    bitmap
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialize");
    for (name, bitmap) in [("sparse_100k", sparse(100_000)), ("dense_1m", dense(1_000_000))] {
        group.throughput(Throughput::Elements(bitmap.cardinality()));
        for format in SerializationFormat::ALL {
            group.bench_with_input(BenchmarkId::new(format.as_str(), name), &bitmap, |b, bitmap| {
                b.iter(|| serialize(black_box(bitmap), format));
            });
        }
    }
    group.finish();
}

fn bench_deserialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("deserialize");
    let bitmap = sparse(100_000);
    group.throughput(Throughput::Elements(bitmap.cardinality()));
    for format in SerializationFormat::ALL {
        let bytes = serialize(&bitmap, format).expect("serialize").to_vec();
        group.bench_with_input(BenchmarkId::from_parameter(format.as_str()), &bytes, |b, bytes| {
            b.iter(|| deserialize(black_box(bytes), format));
        });
    }
    group.finish();
}

fn bench_text(c: &mut Criterion) {
    let bitmap = sparse(100_000);
    c.bench_function("to_text/comma_separated", |b| {
        b.iter(|| to_text_bytes(black_box(&bitmap), TextStyle::CommaSeparated));
    });
}

fn bench_parallel_deserialize(c: &mut Criterion) {
    let runtime = Runtime::new(RuntimeConfig::new()).expect("runtime");
    let inputs: Vec<Vec<u8>> = (0..64)
        .map(|i| {
            serialize(&sparse(10_000 + i), SerializationFormat::Portable)
                .expect("serialize")
                .to_vec()
        })
        .collect();

    c.bench_function("parallel_deserialize/64x10k", |b| {
        b.iter(|| {
            let task = DeserializeParallelTask::new(
                inputs.iter().cloned().map(|bytes| (bytes, SerializationFormat::Portable)),
            );
            let mut promise = runtime.spawn_parallel_promise(task);
            runtime.run_until_idle();
            black_box(promise.try_take())
        });
    });
    runtime.shutdown();
}

criterion_group!(
    benches,
    bench_serialize,
    bench_deserialize,
    bench_text,
    bench_parallel_deserialize
);
criterion_main!(benches);
