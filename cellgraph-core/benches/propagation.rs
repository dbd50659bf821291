use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use cellgraph_core::{atom, derived, Atom, PrimitiveAtom, Store};

/// A source atom followed by `len` derived atoms, each adding one.
fn build_chain(len: usize) -> (PrimitiveAtom<u64>, Atom<u64>) {
    let source = atom(0_u64);
    let mut tail: Atom<u64> = source.as_atom().clone();
    for _ in 0..len {
        let prev = tail.clone();
        tail = derived(move |get| Ok(get.get(&prev)? + 1));
    }
    (source, tail)
}

/// One source read by `width` derived atoms.
fn build_fan(width: usize) -> (PrimitiveAtom<u64>, Vec<Atom<u64>>) {
    let source = atom(0_u64);
    let leaves = (0..width as u64)
        .map(|offset| {
            let source = source.clone();
            derived(move |get| Ok(get.get(&source)? + offset))
        })
        .collect();
    (source, leaves)
}

fn bench_propagation(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation");
    group.sample_size(50);

    for &len in &[16_usize, 256] {
        group.bench_function(format!("chain_write_then_read(len={len})"), |b| {
            b.iter_batched(
                || {
                    let store = Store::new();
                    let (source, tail) = build_chain(len);
                    let _ = store.get(&tail);
                    (store, source, tail)
                },
                |(store, source, tail)| {
                    let _ = store.update(&source, |n| n + 1);
                    black_box(store.get(&tail).ok());
                },
                BatchSize::SmallInput,
            );
        });
    }

    for &width in &[16_usize, 256] {
        group.bench_function(format!("fan_out_notify(width={width})"), |b| {
            let store = Store::new();
            let (source, leaves) = build_fan(width);
            let subscriptions: Vec<_> = leaves
                .iter()
                .map(|leaf| store.subscribe(leaf, || {}))
                .collect();
            b.iter(|| {
                let _ = store.update(&source, |n| n + 1);
            });
            drop(subscriptions);
        });
    }

    group.bench_function("cached_read", |b| {
        let store = Store::new();
        let (_source, tail) = build_chain(64);
        let _ = store.get(&tail);
        b.iter(|| black_box(store.get(&tail).ok()));
    });

    group.finish();
}

criterion_group!(benches, bench_propagation);
criterion_main!(benches);
