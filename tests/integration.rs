use foa::{ConcurrentTable, Flat, MapPolicy, Pow2Mask, SetPolicy, Table};
use fxhash::FxBuildHasher;
use rayon::prelude::*;
use std::sync::Arc;

type FlatSet<T> = Table<SetPolicy<T>, Pow2Mask, Flat, FxBuildHasher>;
type FlatMap<K, V> = Table<MapPolicy<K, V>, Pow2Mask, Flat, FxBuildHasher>;
type ConcurrentFlatMap<K, V> = ConcurrentTable<MapPolicy<K, V>, Pow2Mask, Flat, FxBuildHasher>;
type ConcurrentFlatSet<T> = ConcurrentTable<SetPolicy<T>, Pow2Mask, Flat, FxBuildHasher>;

fn new_map<K, V>() -> FlatMap<K, V> {
    Table::new(FxBuildHasher::default())
}

fn new_set<T>() -> FlatSet<T> {
    Table::new(FxBuildHasher::default())
}

// Scenario 1: basic map roundtrip.
#[test]
fn basic_map_roundtrip() {
    let mut m: FlatMap<String, i32> = new_map();
    m.insert(("a".to_string(), 1));
    m.insert(("b".to_string(), 2));
    m.insert(("c".to_string(), 3));

    assert_eq!(m.get("b").map(|(_, v)| *v), Some(2));
    assert_eq!(m.erase("a"), 1);
    assert!(m.get("a").is_none());
    assert_eq!(m.len(), 2);
}

// Scenario 2: rehash preserves the set, starting from zero capacity.
#[test]
fn rehash_preserves_set_from_zero_capacity() {
    let mut set: FlatSet<i32> = new_set();
    for i in 0..1000 {
        set.insert(i);
    }
    for i in 0..1000 {
        assert!(set.contains(&i), "missing {i} after growth from zero capacity");
    }
    assert!(set.bucket_count() >= 999);
}

// Scenario 3: max_load_factor(0.5) roughly doubles required bucket count.
#[test]
fn load_factor_half_doubles_bucket_count() {
    let mut set: FlatSet<i32> = new_set();
    set.set_max_load_factor(0.5);
    for i in 0..1000 {
        set.insert(i);
    }
    assert!(set.bucket_count() >= 2000);
}

// Scenario 4: a visitor that re-enters its own table trips the reentrancy
// guard instead of deadlocking or corrupting state.
#[test]
#[should_panic(expected = "reentrant access")]
fn reentrancy_is_detected_across_visit_all() {
    let m: ConcurrentFlatMap<i32, i32> = ConcurrentTable::new(FxBuildHasher::default());
    m.insert((0, 0));
    m.visit_all(|_| {
        m.contains(&0);
    });
}

// Scenario 5: try_emplace_or_visit from a single thread, run 100 times,
// first call inserts with 0, the rest increment.
#[test]
fn try_emplace_or_visit_100_times_yields_99() {
    let m: ConcurrentFlatMap<i32, i32> = ConcurrentTable::new(FxBuildHasher::default());
    for _ in 0..100 {
        m.try_emplace_or_visit(&5, |v| v.1 += 1, || (5, 0));
    }
    let mut observed = None;
    m.visit(&5, |v| observed = Some(v.1));
    assert_eq!(observed, Some(99));
}

// Scenario 6: N threads insert disjoint ranges; join sees every key exactly
// once via visit_all.
#[test]
fn concurrent_disjoint_range_inserts_all_observed() {
    let threads = num_cpus::get().max(2);
    let per_thread: i64 = 4096;
    let set: Arc<ConcurrentFlatSet<i64>> = Arc::new(ConcurrentTable::new(FxBuildHasher::default()));
    set.reserve(threads * per_thread as usize);

    (0..threads).into_par_iter().for_each(|t| {
        let base = t as i64 * per_thread;
        for i in base..base + per_thread {
            assert!(set.insert(i));
        }
    });

    assert_eq!(set.len(), threads * per_thread as usize);
    let mut seen = std::collections::HashSet::new();
    let count = set.visit_all(|v| {
        seen.insert(*v);
    });
    assert_eq!(count, threads * per_thread as usize);
    assert_eq!(seen.len(), threads * per_thread as usize);
}

// Universal invariant: insert/erase round-trips back to the prior size and
// bucket count when no rehash was triggered.
#[test]
fn insert_then_erase_returns_to_prior_bucket_count() {
    let mut set: FlatSet<i32> = new_set();
    set.insert(1);
    set.insert(2);
    let bucket_count = set.bucket_count();
    assert_eq!(set.erase(&1), 1);
    set.insert(1);
    assert_eq!(set.len(), 2);
    assert_eq!(set.bucket_count(), bucket_count);
}

// Universal invariant: a constant hasher (worst-case probe exhaustion)
// still finds every key, triggering rehash rather than corrupting state.
#[test]
fn constant_hash_probe_exhaustion_triggers_rehash_not_data_loss() {
    use std::hash::{BuildHasher, Hasher};

    #[derive(Clone, Default)]
    struct ConstantHasher;
    impl Hasher for ConstantHasher {
        fn finish(&self) -> u64 {
            7
        }
        fn write(&mut self, _bytes: &[u8]) {}
    }
    impl BuildHasher for ConstantHasher {
        type Hasher = ConstantHasher;
        fn build_hasher(&self) -> ConstantHasher {
            ConstantHasher
        }
    }

    let mut set: Table<SetPolicy<i32>, Pow2Mask, Flat, ConstantHasher> = Table::new(ConstantHasher);
    for i in 0..64 {
        set.insert(i);
    }
    for i in 0..64 {
        assert!(set.contains(&i), "lost {i} under constant-hash probe exhaustion");
    }
    assert_eq!(set.len(), 64);
}

// Infinite max_load_factor disables load-driven rehashing entirely.
#[test]
fn infinite_max_load_factor_disables_rehash_on_count() {
    let mut set: FlatSet<i32> = new_set();
    set.set_max_load_factor(f64::INFINITY);
    set.reserve(4096);
    let bucket_count = set.bucket_count();
    for i in 0..(bucket_count as i32) {
        set.insert(i);
    }
    assert_eq!(set.bucket_count(), bucket_count);
}

// Node-layout extract/insert_node splices an element between two tables
// without touching its value.
#[test]
fn node_extract_splices_between_tables() {
    use foa::Node;
    type NodeSet = Table<SetPolicy<String>, Pow2Mask, Node, FxBuildHasher>;

    let mut a: NodeSet = Table::new(FxBuildHasher::default());
    let mut b: NodeSet = Table::new(FxBuildHasher::default());
    a.insert("moved".to_string());
    a.insert("stays".to_string());

    let handle = a.extract("moved");
    assert!(!a.contains("moved"));
    assert!(a.contains("stays"));
    assert!(matches!(b.insert_node(handle), Ok(true)));
    assert!(b.contains("moved"));
}
