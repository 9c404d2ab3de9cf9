use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tether_bind::{Engine, Registry, ScriptRef, Shared};

struct Counter {
    n: i64,
}

fn engine() -> Engine {
    let mut registry = Registry::new();
    registry.declare_global("add", |a: i64, b: i64| a + b).unwrap();
    registry.declare_global("sum", |items: Vec<i64>| items.iter().sum::<i64>()).unwrap();
    registry
        .declare_managed_class::<Counter>("Counter")
        .unwrap()
        .add_member("bump", |c: &mut Counter, by: i64| {
            c.n += by;
            c.n
        })
        .unwrap();
    let engine = Engine::new().unwrap();
    engine.apply(&registry).unwrap();
    engine
}

fn bench_global_call(c: &mut Criterion) {
    let engine = engine();
    c.bench_function("call_add", |b| {
        b.iter(|| engine.call::<_, i64>("add", (black_box(3), black_box(4))).unwrap());
    });
}

fn bench_member_call(c: &mut Criterion) {
    let engine = engine();
    let counter = Shared::new(Counter { n: 0 });
    let handle: ScriptRef = engine.to_ref(&counter).unwrap();
    c.bench_function("call_member", |b| {
        b.iter(|| {
            engine
                .call_method::<_, i64>(&handle, "bump", (black_box(1),))
                .unwrap()
        });
    });
    engine.close();
}

fn bench_sequence_marshal(c: &mut Criterion) {
    let engine = engine();
    let mut group = c.benchmark_group("marshal_vec");
    for len in [16usize, 256, 4096] {
        let items: Vec<i64> = (0..len as i64).collect();
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::new("sum", len), &items, |b, items| {
            b.iter(|| engine.call::<_, i64>("sum", (items.clone(),)).unwrap());
        });
    }
    group.finish();
}

fn bench_object_exposure(c: &mut Criterion) {
    let engine = engine();
    c.bench_function("expose_release", |b| {
        b.iter(|| {
            let counter = Shared::new(Counter { n: 0 });
            let handle = engine.to_ref(&counter).unwrap();
            engine.release_object(&counter).unwrap();
            drop(handle);
        });
    });
    engine.close();
}

criterion_group!(
    benches,
    bench_global_call,
    bench_member_call,
    bench_sequence_marshal,
    bench_object_exposure
);
criterion_main!(benches);
