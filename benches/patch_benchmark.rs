//! Patch benchmark: snapshot a growing document and reconcile it into the tree.
//!
//! Target: a tail-only change costs far less than a full rebuild.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use inkstream::tree::patch;
use inkstream::{
    ChunkKind, EngineConfig, ImmediateTicks, PresentationTree, PulldownTranspiler, RenderProfile,
    StreamEngine, Transpiler,
};

fn document(sections: usize) -> String {
    let mut doc = String::new();
    for i in 0..sections {
        doc.push_str(&format!("## Section {i}\n\n"));
        doc.push_str("Some **bold** prose with `code` and a [link](https://example.com).\n\n");
        doc.push_str("```rust\nfn main() {\n    println!(\"hi\");\n}\n```\n\n");
    }
    doc
}

fn transpile(source: &str) -> Vec<inkstream::Node> {
    PulldownTranspiler::new()
        .transpile(source, RenderProfile::Streaming)
        .unwrap_or_default()
}

fn patch_identical(c: &mut Criterion) {
    let source = document(50);
    let mut tree = PresentationTree::new();
    patch(&mut tree, transpile(&source), 6);

    c.bench_function("patch_50_sections_identical", |b| {
        b.iter(|| patch(&mut tree, black_box(transpile(&source)), 6));
    });
}

fn patch_tail_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("patch_tail_growth");

    for sections in [10, 50, 200] {
        let base = document(sections);
        let grown = format!("{base}A trailing paragraph that keeps growing");
        let input = (base, grown);
        group.bench_with_input(BenchmarkId::from_parameter(sections), &input, |b, (base, grown)| {
            let mut tree = PresentationTree::new();
            patch(&mut tree, transpile(base), 6);
            let mut flip = false;
            b.iter(|| {
                flip = !flip;
                let source = if flip { grown } else { base };
                patch(&mut tree, black_box(transpile(source)), 6)
            });
        });
    }

    group.finish();
}

fn engine_stream_document(c: &mut Criterion) {
    let source = document(20);
    let tokens: Vec<&str> = source.split_inclusive(' ').collect();

    c.bench_function("engine_stream_20_sections", |b| {
        b.iter(|| {
            let mut engine = StreamEngine::new(EngineConfig::default());
            for token in &tokens {
                engine.on_chunk("answer", token, ChunkKind::TextDelta);
                engine.tick();
            }
            engine.end_stream();
            engine.pump(&mut ImmediateTicks::new(), 1_000);
            black_box(engine.stats())
        });
    });
}

criterion_group!(benches, patch_identical, patch_tail_growth, engine_stream_document);
criterion_main!(benches);
