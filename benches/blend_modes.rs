use criterion::{black_box, criterion_group, criterion_main, Criterion};

use pulsemix::blend::{BlendMode, Frame, FrameBlender};

fn bench_blend_modes(c: &mut Criterion) {
    let frame_a = Frame::filled(640, 360, 3, 120);
    let frame_b = Frame::filled(640, 360, 3, 200);
    let alpha = Frame::filled(640, 360, 3, 180);

    let mut group = c.benchmark_group("blend");
    for mode in [
        BlendMode::Normal,
        BlendMode::Darken,
        BlendMode::Multiply,
        BlendMode::Screen,
        BlendMode::Add,
        BlendMode::Difference,
        BlendMode::Pick,
    ] {
        let blender = FrameBlender::new(mode);
        group.bench_function(format!("{mode:?}"), |b| {
            b.iter(|| {
                blender
                    .blend(
                        black_box(&frame_a),
                        black_box(&frame_b),
                        Some(black_box(&alpha)),
                        0.7,
                    )
                    .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_blend_modes);
criterion_main!(benches);
