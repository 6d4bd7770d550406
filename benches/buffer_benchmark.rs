//! Stream buffer benchmark: appends, deltas and fence scanning.
//!
//! Target: append and fence feed stay flat as the buffer grows.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use inkstream::buffer::{FenceParser, StreamBuffer, DEFAULT_MATERIALIZE_THRESHOLD};

const TOKEN: &str = "lorem ipsum ";

fn buffer_append_token(c: &mut Criterion) {
    c.bench_function("buffer_append_token", |b| {
        let mut buffer = StreamBuffer::new(DEFAULT_MATERIALIZE_THRESHOLD);
        b.iter(|| {
            buffer.append(black_box(TOKEN));
        });
    });
}

fn buffer_delta_since(c: &mut Criterion) {
    let mut buffer = StreamBuffer::new(DEFAULT_MATERIALIZE_THRESHOLD);
    for _ in 0..10_000 {
        buffer.append(TOKEN);
    }
    let prev = buffer.len() - 4096;

    c.bench_function("buffer_delta_4k", |b| {
        b.iter(|| buffer.delta_since(black_box(prev)).len());
    });
}

fn buffer_materialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_materialize");

    for tokens in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(tokens), &tokens, |b, &tokens| {
            b.iter(|| {
                let mut buffer = StreamBuffer::new(DEFAULT_MATERIALIZE_THRESHOLD);
                for _ in 0..tokens {
                    buffer.append(TOKEN);
                }
                buffer.text().len()
            });
        });
    }

    group.finish();
}

fn fence_feed_prose(c: &mut Criterion) {
    let chunk = "A line of prose with `inline` code in it.\n";

    c.bench_function("fence_feed_prose_line", |b| {
        let mut fence = FenceParser::new(256);
        let mut base = 0;
        b.iter(|| {
            black_box(fence.feed(black_box(chunk), base));
            base += chunk.len();
        });
    });
}

fn fence_feed_code(c: &mut Criterion) {
    let lines: Vec<String> = (0..200).map(|i| format!("    let value_{i} = {i};\n")).collect();

    c.bench_function("fence_feed_code_block", |b| {
        b.iter(|| {
            let mut fence = FenceParser::new(256);
            let mut base = 0;
            let body = lines.iter().map(String::as_str);
            for chunk in std::iter::once("```rust\n").chain(body).chain(["```\n"]) {
                black_box(fence.feed(chunk, base));
                base += chunk.len();
            }
        });
    });
}

criterion_group!(
    benches,
    buffer_append_token,
    buffer_delta_since,
    buffer_materialize,
    fence_feed_prose,
    fence_feed_code,
);
criterion_main!(benches);
