use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use foa::{ConcurrentTable, Pow2Mask, SetPolicy, Flat};
use fxhash::FxBuildHasher;
use rayon::prelude::*;

type IntSet = ConcurrentTable<SetPolicy<u64>, Pow2Mask, Flat, FxBuildHasher>;

const ITER: u64 = 32 * 1024;

fn task_insert_disjoint(values: &[u64]) -> IntSet {
    let set: IntSet = ConcurrentTable::new(FxBuildHasher::default());
    set.reserve(values.len());
    values.par_iter().for_each(|&v| {
        set.insert(v);
    });
    set
}

fn insert_disjoint_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("ConcurrentTable/insert_disjoint_keys");
    group.throughput(Throughput::Elements(ITER));
    let max = num_cpus::get();
    let values: Vec<u64> = (0..ITER).collect();

    for threads in (1..=max).filter(|t| *t == 1 || *t % 4 == 0) {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |bencher, &threads| {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap();
            pool.install(|| bencher.iter(|| task_insert_disjoint(&values)));
        });
    }
    group.finish();
}

fn task_visit_existing(set: &IntSet, values: &[u64]) {
    values.par_iter().for_each(|v| {
        let mut seen = false;
        set.visit(v, |_| seen = true);
        assert!(seen);
    });
}

fn visit_already_inserted(c: &mut Criterion) {
    let mut group = c.benchmark_group("ConcurrentTable/visit_already_inserted");
    group.throughput(Throughput::Elements(ITER));
    let max = num_cpus::get();
    let values: Vec<u64> = (0..ITER).collect();
    let set = task_insert_disjoint(&values);

    for threads in (1..=max).filter(|t| *t == 1 || *t % 4 == 0) {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |bencher, &threads| {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap();
            pool.install(|| bencher.iter(|| task_visit_existing(&set, &values)));
        });
    }
    group.finish();
}

fn contended_try_emplace_or_visit(c: &mut Criterion) {
    let mut group = c.benchmark_group("ConcurrentTable/contended_counter_increment");
    let max = num_cpus::get();

    for threads in (1..=max).filter(|t| *t == 1 || *t % 4 == 0) {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |bencher, &threads| {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap();
            bencher.iter(|| {
                let map: ConcurrentTable<foa::MapPolicy<u64, u64>, Pow2Mask, Flat, FxBuildHasher> =
                    ConcurrentTable::new(FxBuildHasher::default());
                pool.install(|| {
                    (0..ITER).into_par_iter().for_each(|_| {
                        map.try_emplace_or_visit(&0, |v| *v += 1, || (0, 1));
                    });
                });
            });
        });
    }
    group.finish();
}

criterion_group!(benches, insert_disjoint_keys, visit_already_inserted, contended_try_emplace_or_visit);
criterion_main!(benches);
