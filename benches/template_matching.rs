//! Benchmarks for template matching
//!
//! Locates a sprocket-hole pattern in the left stripe of synthetic frames.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use reel_stabilizer::alignment::TemplateMatcher;
use reel_stabilizer::frames::{Point, SyntheticReel};

/// Reel scaled up from the default 320x240 geometry
fn reel(scale: u32) -> SyntheticReel {
    let base = SyntheticReel::default();
    SyntheticReel {
        width: base.width * scale,
        height: base.height * scale,
        hole_width: base.hole_width * scale,
        hole_height: base.hole_height * scale,
        hole_origin: Point::new(base.hole_origin.x * scale as i32, base.hole_origin.y * scale as i32),
    }
}

fn bench_locate(c: &mut Criterion) {
    let mut group = c.benchmark_group("locate");
    let threads = num_cpus::get();

    for scale in [1u32, 2, 4] {
        let reel = reel(scale);
        let region = reel.hole_region(6 * scale as i32);
        let template = reel
            .render(Point::new(0, 0))
            .view_rect(
                region.top_left.x as u32,
                region.top_left.y as u32,
                region.width() as u32,
                region.height() as u32,
            )
            .to_gray();
        let frame = reel.render(Point::new(3, -5));
        let search = frame.view_rect(0, 0, reel.width / 4, reel.height).to_gray();
        let label = format!("{}x{}", reel.width, reel.height);

        for blur in [false, true] {
            let matcher = TemplateMatcher::new(threads, blur).expect("matcher pool");
            let id = BenchmarkId::new(if blur { "blurred" } else { "plain" }, &label);
            group.bench_with_input(id, &(&search, &template), |b, (search, template)| {
                b.iter(|| matcher.locate(black_box(search), black_box(template)))
            });
        }
    }

    group.finish();
}

fn bench_threads(c: &mut Criterion) {
    let reel = reel(4);
    let region = reel.hole_region(24);
    let template = reel
        .render(Point::new(0, 0))
        .view_rect(
            region.top_left.x as u32,
            region.top_left.y as u32,
            region.width() as u32,
            region.height() as u32,
        )
        .to_gray();
    let search = reel
        .render(Point::new(-2, 7))
        .view_rect(0, 0, reel.width / 4, reel.height)
        .to_gray();

    let mut group = c.benchmark_group("threads");
    for threads in [1usize, 2, 4] {
        let matcher = TemplateMatcher::new(threads, true).expect("matcher pool");
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, _| {
            b.iter(|| matcher.locate(black_box(&search), black_box(&template)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_locate, bench_threads);
criterion_main!(benches);
