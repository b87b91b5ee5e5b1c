use auxide_rack::units;
use auxide_rack::{EngineConfig, Rack};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn rack(block_size: usize) -> Rack {
    Rack::new(&EngineConfig {
        block_size,
        ..EngineConfig::default()
    })
}

fn bench_process_block(c: &mut Criterion) {
    let mut rack = rack(1024);
    let osc = rack.mount(units::sine(440.0)).unwrap();
    let gain = rack.mount(units::gain(0.5)).unwrap();
    rack.patch_output(&osc.port("out"), &gain.port("in")).unwrap();
    rack.emit(gain.port("out").into(), None).unwrap();
    let mut out = vec![vec![0.0; 1024]; 2];

    c.bench_function("process_block_1024", |b| {
        b.iter(|| {
            rack.process(black_box(&mut out));
            black_box(&out);
        })
    });
}

fn bench_timing_stability(c: &mut Criterion) {
    // Worst-case graph: chain of gains
    let mut rack = rack(64);
    let mut prev = rack.mount(units::sine(440.0)).unwrap();
    for _ in 0..10 {
        let next = rack.mount(units::gain(1.0)).unwrap();
        rack.patch_output(&prev.port("out"), &next.port("in")).unwrap();
        prev = next;
    }
    rack.emit(prev.port("out").into(), Some(0)).unwrap();
    let mut out = vec![vec![0.0; 64]; 2];

    c.bench_function("rt_timing_stability", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                rack.process(black_box(&mut out));
            }
            black_box(&out);
        })
    });
}

fn bench_feedback_group(c: &mut Criterion) {
    let mut rack = rack(256);
    let mix = rack.mount(units::mix()).unwrap();
    let gain = rack.mount(units::gain(0.9)).unwrap();
    let osc = rack.mount(units::sine(220.0)).unwrap();
    rack.patch_output(&osc.port("out"), &mix.port("a")).unwrap();
    rack.patch_output(&mix.port("out"), &gain.port("in")).unwrap();
    rack.patch_output(&gain.port("out"), &mix.port("b")).unwrap();
    rack.emit(mix.port("out").into(), None).unwrap();
    let mut out = vec![vec![0.0; 256]; 2];

    c.bench_function("feedback_group_256", |b| {
        b.iter(|| {
            rack.process(black_box(&mut out));
            black_box(&out);
        })
    });
}

fn bench_plan_rebuild(c: &mut Criterion) {
    let mut rack = rack(64);
    let mut prev = rack.mount(units::sine(440.0)).unwrap();
    for _ in 0..50 {
        let next = rack.mount(units::mix()).unwrap();
        rack.patch_output(&prev.port("out"), &next.port("a")).unwrap();
        prev = next;
    }

    c.bench_function("plan_rebuild_50", |b| {
        b.iter(|| {
            let id = rack.mount(units::blank()).unwrap();
            rack.unmount(id).unwrap();
            black_box(rack.refresh_plan());
        })
    });
}

criterion_group!(
    benches,
    bench_process_block,
    bench_timing_stability,
    bench_feedback_group,
    bench_plan_rebuild
);
criterion_main!(benches);
