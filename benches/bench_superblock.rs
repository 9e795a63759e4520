//! Benchmarks for `haystore::superblock`.
#![allow(missing_docs)]

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use haystore::{MemIndexer, NeedleV1, SuperBlock};
use std::collections::HashMap;
use std::sync::Arc;

fn payloads() -> Vec<Vec<u8>> {
    // Mixed small-object sizes, the workload the container is built for.
    [64usize, 200, 512, 1024, 4096]
        .iter()
        .map(|&n| vec![0xabu8; n])
        .collect()
}

fn bench_append_and_recover(c: &mut Criterion) {
    let bodies = payloads();

    let mut group = c.benchmark_group("superblock");

    group.bench_function("add_1k_direct", |b| {
        b.iter_batched(
            || {
                let tmp = tempfile::tempdir().unwrap();
                let block =
                    SuperBlock::open(tmp.path().join("block.dat"), Arc::new(NeedleV1)).unwrap();
                (tmp, block)
            },
            |(_tmp, mut block)| {
                for i in 0..1000i64 {
                    let body = &bodies[i as usize % bodies.len()];
                    block.add(i, i * 31, body).unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("write_1k_then_flush", |b| {
        b.iter_batched(
            || {
                let tmp = tempfile::tempdir().unwrap();
                let block =
                    SuperBlock::open(tmp.path().join("block.dat"), Arc::new(NeedleV1)).unwrap();
                (tmp, block)
            },
            |(_tmp, mut block)| {
                for i in 0..1000i64 {
                    let body = &bodies[i as usize % bodies.len()];
                    block.write(i, i * 31, body).unwrap();
                }
                block.flush().unwrap();
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("get_1k", |b| {
        b.iter_batched(
            || {
                let tmp = tempfile::tempdir().unwrap();
                let mut block =
                    SuperBlock::open(tmp.path().join("block.dat"), Arc::new(NeedleV1)).unwrap();
                let mut frames = Vec::new();
                for i in 0..1000i64 {
                    let body = &bodies[i as usize % bodies.len()];
                    frames.push(block.add(i, i * 31, body).unwrap());
                }
                (tmp, block, frames)
            },
            |(_tmp, block, frames)| {
                let mut buf = vec![0u8; 8192];
                for &(slot, framed) in &frames {
                    block.get(slot, &mut buf[..framed as usize]).unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("recovery_1k", |b| {
        b.iter_batched(
            || {
                let tmp = tempfile::tempdir().unwrap();
                let path = tmp.path().join("block.dat");
                let mut block = SuperBlock::open(&path, Arc::new(NeedleV1)).unwrap();
                for i in 0..1000i64 {
                    let body = &bodies[i as usize % bodies.len()];
                    let (slot, _) = block.add(i, i * 31, body).unwrap();
                    if i % 7 == 0 {
                        block.del(slot).unwrap();
                    }
                }
                block.close();
                (tmp, path)
            },
            |(_tmp, path)| {
                let mut block = SuperBlock::open(&path, Arc::new(NeedleV1)).unwrap();
                let mut needles = HashMap::new();
                let mut ix = MemIndexer::new();
                block.recovery(&mut needles, &mut ix, 0).unwrap();
                std::hint::black_box((needles, ix));
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_append_and_recover);
criterion_main!(benches);
