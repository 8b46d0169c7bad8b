use criterion::{criterion_group, criterion_main, Criterion};
use strata_text::{SourceEntry, Span, SpanTrackingMode, TextBuffer, TextBufferFactory};

// Versions kept before a buffer is recreated
const CAP: u64 = 100_000;

fn text() -> String {
    "The quick brown fox jumps over the lazy dog.\n".repeat(2_000)
}

fn insert(c: &mut Criterion) {
    let factory = TextBufferFactory::default();

    c.bench_function("insert_start", |bench| {
        let mut buf = factory.create_buffer(&text());
        bench.iter(|| {
            if buf.current_snapshot().version_number() >= CAP {
                buf = factory.create_buffer(&text());
            }
            buf.insert(0, "a").unwrap()
        });
    });

    c.bench_function("insert_middle", |bench| {
        let mut buf = factory.create_buffer(&text());
        bench.iter(|| {
            if buf.current_snapshot().version_number() >= CAP {
                buf = factory.create_buffer(&text());
            }
            let mid = buf.current_snapshot().length() / 2;
            buf.insert(mid, "a").unwrap()
        });
    });
}

fn multi_change(c: &mut Criterion) {
    let factory = TextBufferFactory::default();

    c.bench_function("replace_every_line", |bench| {
        let mut buf = factory.create_buffer(&text());
        bench.iter(|| {
            if buf.current_snapshot().version_number() >= CAP {
                buf = factory.create_buffer(&text());
            }
            let snap = buf.current_snapshot();
            let mut edit = buf.create_edit().unwrap();
            for line in snap.lines().step_by(10).filter(|line| line.span().len() >= 3) {
                let start = line.span().start;
                edit.replace(Span::new(start, start + 3), "THE").unwrap();
            }
            edit.apply().unwrap()
        });
    });
}

fn projected(buf: &TextBuffer) -> Vec<SourceEntry> {
    let len = buf.current_snapshot().length();
    (0..len)
        .step_by(len / 50)
        .map(|start| {
            let end = (start + len / 100).min(len);
            SourceEntry::span(buf, Span::new(start, end), SpanTrackingMode::EdgeExclusive).unwrap()
        })
        .chain([SourceEntry::literal("\n")])
        .collect()
}

fn projection(c: &mut Criterion) {
    let factory = TextBufferFactory::default();

    c.bench_function("edit_projected_source", |bench| {
        let buf = factory.create_buffer(&text());
        let proj = factory
            .create_projection_buffer(projected(&buf))
            .unwrap();
        bench.iter(|| {
            let mid = buf.current_snapshot().length() / 2;
            buf.insert(mid, "a").unwrap();
            proj.current_snapshot()
        });
    });
}

criterion_group!(benches, insert, multi_change, projection);
criterion_main!(benches);
