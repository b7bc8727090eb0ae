use criterion::{criterion_group, criterion_main, Criterion};
use frp_core::*;

fn frp_deep_update(c: &mut Criterion) {
    c.bench_function("frp_deep_update", |b| {
        b.iter(|| {
            let runtime = create_runtime();
            let (sig, set) = create_behavior(0);
            let mut chained = sig.map(|n| *n + 1);
            for _ in 0..999 {
                chained = chained.map(|n| *n + 1);
            }
            let _sub = chained.subscribe(|_| {});
            set.publish(1);
            assert_eq!(chained.at(), 1001);
            runtime.dispose();
        });
    });
}

criterion_group!(deep_update, frp_deep_update);
criterion_main!(deep_update);
