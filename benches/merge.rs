//! Merge kernel benchmarks

use std::sync::Arc;

use clip_compositor::video::processor::{convert_depth, merge_frames};
use clip_compositor::video::{BitDepth, ClipFormat, Frame, MergeRule};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn generate_inputs(format: &ClipFormat, count: usize) -> Vec<Arc<Frame>> {
    (0..count)
        .map(|i| {
            let mut frame = Frame::new_black(format);
            for plane in 0..format.plane_count() {
                for (n, v) in frame.plane_mut(plane).iter_mut().enumerate() {
                    *v = (((n * 7 + i * 131) % 256) as u16) << 8;
                }
            }
            Arc::new(frame)
        })
        .collect()
}

fn bench_merge_rules(c: &mut Criterion) {
    let format = ClipFormat::yuv420(1920, 1080, BitDepth::SIXTEEN);
    let pool = rayon::ThreadPoolBuilder::new().build().ok();
    let mut group = c.benchmark_group("merge_1080p");
    group.throughput(Throughput::Elements(
        (format.width as u64) * (format.height as u64),
    ));

    for count in [3usize, 10] {
        let inputs = generate_inputs(&format, count);
        for rule in [MergeRule::Median, MergeRule::Mean, MergeRule::Lehmer { p: 2.0 }] {
            let name = format!("{}_x{}", rule.name(), count);
            group.bench_function(&name, |b| {
                b.iter(|| black_box(merge_frames(&inputs, rule, &format, pool.as_ref())))
            });
        }
    }

    group.finish();
}

fn bench_depth_conversion(c: &mut Criterion) {
    let format = ClipFormat::yuv420(1920, 1080, BitDepth::EIGHT);
    let frame = Frame::new_filled(&format, &[235, 128, 128]);
    let mut group = c.benchmark_group("depth_1080p");

    group.bench_function("8_to_16", |b| {
        b.iter(|| black_box(convert_depth(&frame, BitDepth::SIXTEEN)))
    });
    group.bench_function("16_to_10", |b| {
        let deep = convert_depth(&frame, BitDepth::SIXTEEN);
        b.iter(|| black_box(convert_depth(&deep, BitDepth::TEN)))
    });

    group.finish();
}

criterion_group!(benches, bench_merge_rules, bench_depth_conversion);
criterion_main!(benches);
