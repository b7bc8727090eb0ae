use criterion::{criterion_group, criterion_main, Criterion};
use frp_core::*;

fn frp_fan_out(c: &mut Criterion) {
    c.bench_function("frp_fan_out", |b| {
        b.iter(|| {
            let runtime = create_runtime();
            let (sig, set) = create_behavior(0);
            let maps = (0..1000).map(|_| sig.map(|n| *n)).collect::<Vec<_>>();
            assert_eq!(maps.iter().map(|m| m.at()).sum::<i32>(), 0);
            set.publish(1);
            assert_eq!(maps.iter().map(|m| m.at()).sum::<i32>(), 1000);
            runtime.dispose();
        });
    });
}

fn frp_fan_out_observed(c: &mut Criterion) {
    c.bench_function("frp_fan_out_observed", |b| {
        b.iter(|| {
            let runtime = create_runtime();
            let (sig, set) = create_behavior(0i64);
            let total = std::rc::Rc::new(std::cell::Cell::new(0i64));
            let subs = (0..1000)
                .map(|_| {
                    let total = std::rc::Rc::clone(&total);
                    sig.map(|n| *n).subscribe(move |n| total.set(total.get() + n))
                })
                .collect::<Vec<_>>();
            set.publish(1);
            assert_eq!(total.get(), 1000);
            for sub in subs {
                sub.deactivate();
            }
            runtime.dispose();
        });
    });
}

criterion_group!(fan_out, frp_fan_out, frp_fan_out_observed);
criterion_main!(fan_out);
