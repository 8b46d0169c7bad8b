use std::sync::Arc;

use parking_lot::Mutex;
use strata_text::{
    Affinity, BufferGraph, Error, PointTrackingMode, ReadOnlyEdge, Result, Snapshot,
    SnapshotPoint, SnapshotSpan, SourceEntry, Span, SpanTrackingMode, TextBuffer,
    TextBufferFactory, TrackingFidelity,
};

fn whole(buffer: &TextBuffer) -> SnapshotSpan {
    let snap = buffer.current_snapshot();
    let len = snap.length();
    SnapshotSpan::new(snap, Span::new(0, len))
}

fn point(buffer: &TextBuffer, pos: usize) -> SnapshotPoint {
    SnapshotPoint::new(buffer.current_snapshot(), pos)
}

#[test]
fn replace_inside_projected_buffer() {
    let factory = TextBufferFactory::default();
    let buf = factory.create_buffer("abcdef");
    let proj = factory
        .create_projection_buffer([SourceEntry::span(
            &buf,
            Span::new(0, 6),
            SpanTrackingMode::EdgeInclusive,
        )
        .unwrap()])
        .unwrap();

    let s0 = buf.current_snapshot();
    let fidelity = TrackingFidelity::Forward;
    let e = s0
        .create_tracking_point(5, PointTrackingMode::Positive, fidelity)
        .unwrap();
    let inside_neg = s0
        .create_tracking_point(3, PointTrackingMode::Negative, fidelity)
        .unwrap();
    let inside_pos = s0
        .create_tracking_point(3, PointTrackingMode::Positive, fidelity)
        .unwrap();

    let s1 = buf.replace(Span::new(2, 4), "XYZ").unwrap();
    assert_eq!("abXYZef", s1.text());
    assert_eq!(7, s1.length());
    assert_eq!(1, s1.version().changes().delta());
    assert_eq!(6, e.position(&s1).unwrap());
    assert_eq!(2, inside_neg.position(&s1).unwrap());
    assert_eq!(5, inside_pos.position(&s1).unwrap());

    // Resolving against the original version is the identity
    assert_eq!(3, inside_pos.position(&s0).unwrap());
    assert_eq!("abcdef", s0.text());

    let p1 = proj.current_snapshot();
    assert_eq!("abXYZef", p1.text());
    assert_eq!(1, p1.version_number());
}

#[test]
fn rejected_span_edits_leave_stack_untouched() {
    let factory = TextBufferFactory::default();
    let text = factory.create_buffer("abcdef");
    let lower = factory
        .create_projection_buffer([
            SourceEntry::span(&text, Span::new(0, 3), SpanTrackingMode::EdgeExclusive).unwrap(),
        ])
        .unwrap();
    let upper = factory
        .create_projection_buffer([SourceEntry::span(
            lower.buffer(),
            Span::new(0, 3),
            SpanTrackingMode::EdgeExclusive,
        )
        .unwrap()])
        .unwrap();

    let notified = Arc::new(Mutex::new(0));
    for buffer in [lower.buffer(), upper.buffer()] {
        let n = notified.clone();
        buffer.on_changed(move |_| *n.lock() += 1);
    }

    let duplicate =
        SourceEntry::span(&text, Span::new(0, 3), SpanTrackingMode::EdgeExclusive).unwrap();
    let err = lower.insert_spans(1, [duplicate]).unwrap_err();
    assert!(matches!(err, Error::DuplicateProjection { .. }));

    // The upper buffer already sees the lower one
    let cycle =
        SourceEntry::span(upper.buffer(), Span::new(0, 1), SpanTrackingMode::EdgeExclusive)
            .unwrap();
    let err = lower.insert_spans(0, [cycle]).unwrap_err();
    assert_eq!(Error::CycleDetected { buffer: upper.id() }, err);

    assert_eq!(0, *notified.lock());
    assert_eq!(1, lower.span_count());
    assert_eq!(vec![text.clone()], lower.source_buffers());
    for proj in [&lower, &upper] {
        let snap = proj.current_snapshot();
        assert_eq!("abc", snap.text());
        assert_eq!(0, snap.version_number());
    }
}

#[test]
fn elision_round_trip_keeps_hidden_insertion() {
    let factory = TextBufferFactory::default();
    let source = factory.create_buffer("one two three");
    let elision = factory
        .create_elision_buffer(&source, [whole(&source)])
        .unwrap();
    let hidden = SnapshotSpan::new(source.current_snapshot(), Span::new(4, 8));

    elision.elide_spans([hidden.clone()]).unwrap();
    assert_eq!("one three", elision.current_snapshot().text());

    source.insert(5, "X").unwrap();
    assert_eq!("one tXwo three", source.current_snapshot().text());
    assert_eq!("one three", elision.current_snapshot().text());

    let snap = elision.expand_spans([hidden]).unwrap();
    assert_eq!("one tXwo three", snap.text());
    assert_eq!(1, elision.visible_spans().len());
}

#[test]
fn snapshot_pins_content_type() {
    let factory = TextBufferFactory::default();
    factory.registry().add("code", &[]).unwrap();
    let rust = factory.registry().add("rust", &["code"]).unwrap();

    let buf = factory.create_buffer("fn main() {}");
    let s0 = buf.current_snapshot();
    let seen = Arc::new(Mutex::new(vec![]));
    let s = seen.clone();
    buf.on_content_type_changed(move |ev| {
        s.lock().push((
            ev.before_content_type.name().to_string(),
            ev.after_content_type.name().to_string(),
        ))
    });

    let s1 = buf.change_content_type(rust).unwrap();
    assert_eq!("text", s0.content_type().name());
    assert_eq!("rust", s1.content_type().name());
    assert!(s1.content_type().is_of_type("code"));
    assert!(s1.content_type().is_of_type("text"));

    assert_eq!(s0.text(), s1.text());
    assert_eq!(1, s1.version_number());
    assert_eq!(0, s1.version().reiterated_number());
    assert!(s1.version().changes().is_empty());
    assert_eq!(
        vec![("text".to_string(), "rust".to_string())],
        *seen.lock()
    );
}

#[test]
fn read_only_source_under_projection() {
    let factory = TextBufferFactory::default();
    let code = factory.create_buffer("let x = 1;");
    let proj = factory
        .create_projection_buffer([
            SourceEntry::span(&code, Span::new(0, 10), SpanTrackingMode::EdgeExclusive).unwrap(),
        ])
        .unwrap();
    let region = code
        .add_read_only_region(Span::new(4, 5), ReadOnlyEdge::Exclusive)
        .unwrap();

    let mut edit = code.create_edit().unwrap();
    let err = edit.replace(Span::new(4, 5), "y").unwrap_err();
    assert_eq!(Error::ReadOnly { span: Span::new(4, 5) }, err);
    edit.replace(Span::new(8, 9), "2").unwrap();
    edit.insert(4, "mut ").unwrap();
    let snap = edit.apply().unwrap();

    assert_eq!("let mut x = 2;", snap.text());
    assert_eq!("let mut x = 2;", proj.current_snapshot().text());
    assert!(code.is_read_only(Span::new(8, 9)).unwrap());
    assert!(!code.is_read_only(Span::new(4, 8)).unwrap());

    // Edits through the projection meet the source's regions
    assert_eq!(
        Error::ReadOnly {
            span: Span::new(8, 9)
        },
        proj.replace(Span::new(8, 9), "z").unwrap_err()
    );
    proj.replace(Span::new(12, 13), "3").unwrap();
    assert_eq!("let mut x = 3;", code.current_snapshot().text());

    assert!(code.remove_read_only_region(region).unwrap());
    code.replace(Span::new(8, 9), "y").unwrap();
    assert_eq!("let mut y = 3;", proj.current_snapshot().text());
}

#[test]
fn handlers_cannot_edit_sources_during_notification() {
    let factory = TextBufferFactory::default();
    let buf = factory.create_buffer("abc");
    let proj = factory
        .create_projection_buffer([
            SourceEntry::span(&buf, Span::new(0, 3), SpanTrackingMode::EdgeInclusive).unwrap(),
        ])
        .unwrap();

    let result: Arc<Mutex<Option<Result<Snapshot>>>> = Arc::new(Mutex::new(None));
    let r = result.clone();
    let source = buf.clone();
    proj.on_changed(move |_| *r.lock() = Some(source.insert(0, "!")));

    buf.insert(3, "d").unwrap();
    let result = result.lock().take().unwrap();
    assert_eq!(Error::EditInProgress { buffer: buf.id() }, result.unwrap_err());
    assert_eq!("abcd", buf.current_snapshot().text());
    assert_eq!("abcd", proj.current_snapshot().text());
    assert!(!buf.is_edit_in_progress());

    // Once notification is over the source is editable again
    buf.insert(0, "!").unwrap();
    assert_eq!("!abcd", proj.current_snapshot().text());
}

#[test]
fn notifications_follow_subscription_order() {
    let factory = TextBufferFactory::default();
    let buf = factory.create_buffer("abc");
    let log = Arc::new(Mutex::new(vec![]));

    let l = log.clone();
    buf.on_changed(move |_| l.lock().push("first".to_string()));
    let proj = factory
        .create_projection_buffer([
            SourceEntry::span(&buf, Span::new(0, 3), SpanTrackingMode::EdgeInclusive).unwrap(),
        ])
        .unwrap();
    let l = log.clone();
    proj.on_changed(move |ev| l.lock().push(format!("projection {}", ev.after.text())));
    let l = log.clone();
    buf.on_changed(move |ev| l.lock().push(format!("last {}", ev.after.version_number())));

    buf.insert(1, "x").unwrap();
    assert_eq!(
        vec![
            "first".to_string(),
            "projection axbc".to_string(),
            "last 1".to_string()
        ],
        *log.lock()
    );
}

#[test]
fn graph_over_elided_projection() {
    let factory = TextBufferFactory::default();
    let doc = factory.create_buffer("# title\n");
    let code = factory.create_buffer("fn main() {}");
    let proj = factory
        .create_projection_buffer([
            SourceEntry::span(&doc, Span::new(0, 8), SpanTrackingMode::EdgeExclusive).unwrap(),
            SourceEntry::span(&code, Span::new(0, 12), SpanTrackingMode::EdgeInclusive).unwrap(),
        ])
        .unwrap();
    assert_eq!("# title\nfn main() {}", proj.current_snapshot().text());

    let elision = factory
        .create_elision_buffer(proj.buffer(), [whole(proj.buffer())])
        .unwrap();
    let header = SnapshotSpan::new(proj.current_snapshot(), Span::new(0, 8));
    elision.elide_spans([header]).unwrap();
    assert_eq!("fn main() {}", elision.current_snapshot().text());

    let graph = BufferGraph::new(elision.buffer());
    assert_eq!(4, graph.buffers().len());
    for buffer in [elision.buffer(), proj.buffer(), &doc, &code] {
        assert!(graph.contains(buffer.id()));
    }

    let down = graph
        .map_down_to_buffer(&point(elision.buffer(), 3), &code, Affinity::Predecessor)
        .unwrap();
    assert_eq!(3, down.position);
    assert_eq!(Ok('m'), down.snapshot.char_at(down.position));

    let up = graph
        .map_up_to_buffer(&point(&code, 3), elision.buffer(), Affinity::Predecessor)
        .unwrap();
    assert_eq!(3, up.position);
    assert!(graph
        .map_up_to_buffer(&point(&doc, 2), elision.buffer(), Affinity::Predecessor)
        .is_none());

    code.insert(0, "pub ").unwrap();
    assert_eq!("pub fn main() {}", elision.current_snapshot().text());
    let up = graph
        .map_up_to_buffer(&point(&code, 7), elision.buffer(), Affinity::Predecessor)
        .unwrap();
    assert_eq!(7, up.position);
}
