//! # Guidance Benchmark

use criterion::{criterion_group, criterion_main, Criterion};

use guide_lib::guidance::{GuidanceEngine, Params, Pose, ReferenceLine};

fn guidance_benchmark(c: &mut Criterion) {
    let mut engine = GuidanceEngine::new(Params::default()).unwrap();
    engine.set_ref_line(Some(ReferenceLine::new(30.0, 1.5)));
    engine.set_autosteer(true);

    // Poses spread over several guide lines and both directions of travel
    let poses: Vec<Pose> = (0..64)
        .map(|i| {
            let i = i as f64;
            Pose::new(i * 3.7 - 100.0, i * -2.1 + 40.0, i * 0.4)
        })
        .collect();

    c.bench_function("GuidanceEngine::compute_command", |b| {
        b.iter(|| {
            for pose in poses.iter() {
                criterion::black_box(engine.compute_command(pose, 6.0));
            }
        })
    });

    c.bench_function("GuidanceEngine::nudge_to_reference_frame", |b| {
        b.iter(|| {
            for pose in poses.iter() {
                criterion::black_box(engine.nudge_to_reference_frame(pose.position_m));
            }
        })
    });
}

criterion_group!(benches, guidance_benchmark);
criterion_main!(benches);
