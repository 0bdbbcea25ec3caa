//! Concurrent insert / delete / search interleavings.
//!
//! Three thread groups run against one graph: inserters filling a fresh
//! label range, markers toggling deletion in a disjoint pre-populated
//! range, and searchers. Afterwards the structural invariants must hold:
//! list counts within caps, no self-loops, edges only between nodes
//! carrying the level, and deletion bookkeeping consistent.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallworld::config::{CoreConfig, DataType, HnswParams, IndexKind, MetricType};
use smallworld::{HnswIndex, WriteConfig};
use std::sync::Arc;
use std::thread;

const DIM: usize = 16;

fn vector(rng: &mut StdRng) -> Vec<f32> {
    (0..DIM).map(|_| rng.gen::<f32>()).collect()
}

fn bytes(v: &[f32]) -> &[u8] {
    bytemuck::cast_slice(v)
}

fn core(max_elements: u32) -> CoreConfig {
    CoreConfig {
        index: IndexKind::Hnsw,
        data_type: DataType::Float32,
        metric: MetricType::L2,
        dimension: DIM as u32,
        worker_num: 0,
        max_elements,
    }
}

#[test]
fn test_concurrent_insert_mark_unmark() {
    const PREFILLED: u64 = 1000;
    const INSERTERS: usize = 20;
    const MARKERS: usize = 20;
    const FRESH_INSERTERS: usize = 20;
    const PER_THREAD: u64 = 50;

    let capacity = PREFILLED + (INSERTERS + FRESH_INSERTERS) as u64 * PER_THREAD;
    let index = Arc::new(
        HnswIndex::new(
            core(capacity as u32),
            HnswParams {
                m: 16,
                ef_construction: 64,
                random_seed: 600,
                ..HnswParams::default()
            },
        )
        .unwrap(),
    );

    // Pre-populate the range the markers toggle.
    let mut rng = StdRng::seed_from_u64(600);
    for label in 0..PREFILLED {
        index
            .add_point(bytes(&vector(&mut rng)), label, WriteConfig::default())
            .unwrap();
    }

    let mut handles = Vec::new();
    for t in 0..INSERTERS {
        let index = index.clone();
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(1_000 + t as u64);
            for i in 0..PER_THREAD {
                let label = PREFILLED + (t as u64) * PER_THREAD + i;
                index
                    .add_point(bytes(&vector(&mut rng)), label, WriteConfig::default())
                    .unwrap();
            }
        }));
    }
    for t in 0..MARKERS {
        let index = index.clone();
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(2_000 + t as u64);
            for _ in 0..PER_THREAD {
                let label = rng.gen_range(0..PREFILLED);
                // Another marker may win either race; both outcomes are
                // fine as long as the pair stays consistent.
                if index.mark_delete(label).is_ok() {
                    let _ = index.unmark_delete(label);
                }
            }
        }));
    }
    for t in 0..FRESH_INSERTERS {
        let index = index.clone();
        let base = PREFILLED + (INSERTERS as u64) * PER_THREAD;
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(3_000 + t as u64);
            for i in 0..PER_THREAD {
                let label = base + (t as u64) * PER_THREAD + i;
                index
                    .add_point(bytes(&vector(&mut rng)), label, WriteConfig::default())
                    .unwrap();
            }
        }));
    }
    // Searchers run alongside the writers.
    for t in 0..4 {
        let index = index.clone();
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(4_000 + t as u64);
            for _ in 0..200 {
                let q = vector(&mut rng);
                let mut ctx = index.create_search_context();
                ctx.with_query(bytes(&q)).with_top_k(5);
                index.search(&mut ctx).unwrap();
                for pair in ctx.results.windows(2) {
                    assert!(pair[0].distance <= pair[1].distance);
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(index.element_count(), capacity as usize);
    index.check_integrity().unwrap();

    // Every label inserted by the writer groups resolves, unless a marker
    // left it deleted.
    let mut out = vec![0u8; DIM * 4];
    for label in PREFILLED..capacity {
        index.get_vector(label, &mut out).unwrap();
    }
}

#[test]
fn test_concurrent_replace_deleted() {
    const N: u64 = 400;
    let index = Arc::new(
        HnswIndex::new(
            core(N as u32),
            HnswParams {
                m: 8,
                ef_construction: 32,
                random_seed: 9,
                allow_replace_deleted: true,
                ..HnswParams::default()
            },
        )
        .unwrap(),
    );

    let mut rng = StdRng::seed_from_u64(9);
    for label in 0..N {
        index
            .add_point(bytes(&vector(&mut rng)), label, WriteConfig::default())
            .unwrap();
    }
    for label in 0..N / 2 {
        index.mark_delete(label).unwrap();
    }

    let replace = WriteConfig { replace_deleted: true };
    let mut handles = Vec::new();
    for t in 0..8u64 {
        let index = index.clone();
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(100 + t);
            for i in 0..N / 16 {
                let label = 10_000 + t * (N / 16) + i;
                index
                    .add_point(bytes(&vector(&mut rng)), label, replace)
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Reuse never grew the index.
    assert_eq!(index.element_count(), N as usize);
    assert_eq!(index.deleted_count(), 0);
    index.check_integrity().unwrap();

    let mut out = vec![0u8; DIM * 4];
    for t in 0..8u64 {
        for i in 0..N / 16 {
            index.get_vector(10_000 + t * (N / 16) + i, &mut out).unwrap();
        }
    }
}
