//! Benchmarks the untyped allocator's split chain (SPEC_FULL.md §4.14):
//! repeated small-object carve-outs against a fixed arena, the workload
//! `alloc_4k`/`alloc` sees under steady-state component loading.

use criterion::{criterion_group, criterion_main, Criterion};
use sos_root::{mock_bootinfo, CSpace, UntypedTable};

fn fresh_table() -> (UntypedTable, CSpace) {
    let bi = mock_bootinfo();
    let mut ut = UntypedTable::new(bi.memory_bounds().unwrap().0, 1 << 16);
    for u in bi.non_device_untyped() {
        ut.add_untyped_range(u.paddr, u.cap, 1usize << (u.size_bits - sos_root::PAGE_BITS));
    }
    let cs = CSpace::new_two_level(bi.init_cnode, 8, 8, 16);
    (ut, cs)
}

fn bench_alloc_4k(c: &mut Criterion) {
    c.bench_function("untyped_alloc_4k", |b| {
        b.iter_batched(
            fresh_table,
            |(mut ut, _cs)| {
                for _ in 0..64 {
                    let page = ut.alloc_4k().unwrap();
                    criterion::black_box(page);
                }
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn bench_alloc_split(c: &mut Criterion) {
    c.bench_function("untyped_alloc_split_to_64b", |b| {
        b.iter_batched(
            fresh_table,
            |(mut ut, mut cs)| {
                for _ in 0..16 {
                    let small = ut.alloc(6, &mut cs).unwrap();
                    criterion::black_box(small);
                }
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_alloc_4k, bench_alloc_split);
criterion_main!(benches);
