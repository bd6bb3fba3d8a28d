//! Memory-type and queue-family selection benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stagearray::{select_memory_type, select_queue_family, MemoryProperty, QueueFamily, QueueFlags};

fn bench_memory_type(c: &mut Criterion) {
    // A typical discrete GPU table
    let table = [
        MemoryProperty::DEVICE_LOCAL,
        MemoryProperty::DEVICE_LOCAL,
        MemoryProperty::HOST_VISIBLE_COHERENT,
        MemoryProperty::HOST_VISIBLE_COHERENT | MemoryProperty::HOST_CACHED,
        MemoryProperty::DEVICE_LOCAL | MemoryProperty::HOST_VISIBLE_COHERENT,
    ];

    let mut group = c.benchmark_group("memory_type");

    group.bench_function("first_match", |b| {
        b.iter(|| select_memory_type(black_box(&table), black_box(0b11111), MemoryProperty::DEVICE_LOCAL))
    });

    group.bench_function("last_match", |b| {
        let desired = MemoryProperty::DEVICE_LOCAL | MemoryProperty::HOST_VISIBLE;
        b.iter(|| select_memory_type(black_box(&table), black_box(0b11111), desired))
    });

    group.bench_function("no_match", |b| {
        b.iter(|| select_memory_type(black_box(&table), black_box(0b00011), MemoryProperty::HOST_CACHED))
    });

    group.finish();
}

fn bench_queue_family(c: &mut Criterion) {
    let families = [
        QueueFamily { flags: QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER, queue_count: 16 },
        QueueFamily { flags: QueueFlags::TRANSFER | QueueFlags::SPARSE_BINDING, queue_count: 2 },
        QueueFamily { flags: QueueFlags::COMPUTE | QueueFlags::TRANSFER, queue_count: 8 },
    ];

    c.bench_function("queue_family_transfer", |b| {
        b.iter(|| select_queue_family(black_box(&families), QueueFlags::TRANSFER))
    });
}

criterion_group!(benches, bench_memory_type, bench_queue_family);
criterion_main!(benches);
