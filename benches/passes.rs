//! Seed and step pass throughput on a 720p canvas.
//! Run: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pixfn::engine::EngineState;
use pixfn::slots::{Channel, FormulaLayout, SlotId};

fn bench_passes(c: &mut Criterion) {
    let mut engine = EngineState::new(1280, 720, FormulaLayout::Full).expect("create engine");
    engine.set_formulas([
        (SlotId::start(Channel::Red), "x*y/7"),
        (SlotId::change(Channel::Green), "(r+b)/2+s"),
        (SlotId::change(Channel::Blue), "b^2-x+y"),
    ]);

    let mut group = c.benchmark_group("passes");
    group.sample_size(30);

    group.bench_function("seed_720p", |b| {
        b.iter(|| black_box(engine.reset()));
    });

    group.bench_function("step_720p", |b| {
        b.iter(|| black_box(engine.step_once()));
    });

    group.finish();
}

criterion_group!(benches, bench_passes);
criterion_main!(benches);
