use criterion::{criterion_group, criterion_main, Criterion};
use line_render::{content_footprint, cursor_position, Geometry};
use std::hint::black_box;

fn bench_cursor_math(c: &mut Criterion) {
    let geom = Geometry::new(80, 24, "$ ");
    let long_ascii = "x".repeat(4000);
    let mixed: String = "echo αβγ 漢字 ".repeat(200);

    c.bench_function("cursor_position_ascii_4k", |b| {
        b.iter(|| {
            cursor_position(
                black_box(long_ascii.as_bytes()),
                black_box(long_ascii.len() / 2),
                &geom,
            )
        })
    });

    c.bench_function("cursor_position_mixed_width", |b| {
        b.iter(|| cursor_position(black_box(mixed.as_bytes()), black_box(mixed.len()), &geom))
    });

    c.bench_function("footprint_wrapped", |b| {
        b.iter(|| content_footprint(black_box(long_ascii.as_bytes()), &geom))
    });
}

criterion_group!(benches, bench_cursor_math);
criterion_main!(benches);
