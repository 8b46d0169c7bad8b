use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;
use crate::{EditOptions, TextBuffer, TextBufferFactory};

use PointTrackingMode::*;
use TrackingFidelity::*;

fn buffer(text: &str) -> TextBuffer {
    TextBufferFactory::default().create_buffer(text)
}

fn span_after_insert(mode: SpanTrackingMode, at: usize) -> Span {
    let buf = buffer("abcdef");
    let span = buf
        .current_snapshot()
        .create_tracking_span(Span::new(2, 4), mode, Forward)
        .unwrap();
    let snap = buf.insert(at, "X").unwrap();
    span.span_in(snap.version()).unwrap()
}

#[test]
fn identity() {
    let buf = buffer("abcdef");
    let snap = buf.current_snapshot();
    let point = snap.create_tracking_point(3, Positive, Forward).unwrap();
    let span = snap
        .create_tracking_span(Span::new(1, 4), SpanTrackingMode::EdgeInclusive, HighFidelity)
        .unwrap();

    buf.insert(0, "xyz").unwrap();
    buf.delete(Span::new(0, 5)).unwrap();

    assert_eq!(3, point.position(&snap).unwrap());
    assert_eq!(Span::new(1, 4), span.span(&snap).unwrap().span);
}

#[test]
fn replace_scenario() {
    let buf = buffer("abcdef");
    let s0 = buf.current_snapshot();
    let e = s0.create_tracking_point(5, Positive, Forward).unwrap();
    let inside_neg = s0.create_tracking_point(3, Negative, Forward).unwrap();
    let inside_pos = s0.create_tracking_point(3, Positive, Forward).unwrap();

    let s1 = buf.replace(Span::new(2, 4), "XYZ").unwrap();
    assert_eq!("abXYZef", s1.text());
    assert_eq!(7, s1.length());

    assert_eq!(6, e.position(&s1).unwrap());
    assert_eq!(Some('e'), e.character(&s1).unwrap());
    assert_eq!(2, inside_neg.position(&s1).unwrap());
    assert_eq!(5, inside_pos.position(&s1).unwrap());
}

#[test]
fn insertion_at_point() {
    let buf = buffer("abcdef");
    let s0 = buf.current_snapshot();
    let pos = s0.create_tracking_point(2, Positive, Forward).unwrap();
    let neg = s0.create_tracking_point(2, Negative, Forward).unwrap();

    let s1 = buf.insert(2, "123").unwrap();
    assert_eq!(5, pos.position(&s1).unwrap());
    assert_eq!(2, neg.position(&s1).unwrap());
}

#[test]
fn backward() {
    let buf = buffer("abcdef");
    let s0 = buf.current_snapshot();
    let s1 = buf.replace(Span::new(2, 4), "XYZ").unwrap();

    let point = s1.create_tracking_point(6, Negative, Forward).unwrap();
    assert_eq!(5, point.position(&s0).unwrap());
    assert_eq!(6, point.position(&s1).unwrap());
}

#[test]
fn span_edges() {
    use SpanTrackingMode::*;

    assert_eq!(Span::new(3, 5), span_after_insert(EdgeExclusive, 2));
    assert_eq!(Span::new(2, 4), span_after_insert(EdgeExclusive, 4));
    assert_eq!(Span::new(2, 5), span_after_insert(EdgeInclusive, 2));
    assert_eq!(Span::new(2, 5), span_after_insert(EdgeInclusive, 4));
    assert_eq!(Span::new(3, 5), span_after_insert(EdgePositive, 2));
    assert_eq!(Span::new(2, 5), span_after_insert(EdgePositive, 4));
    assert_eq!(Span::new(2, 5), span_after_insert(EdgeNegative, 2));
    assert_eq!(Span::new(2, 4), span_after_insert(EdgeNegative, 4));
}

#[test]
fn empty_exclusive_span_stays_empty() {
    let buf = buffer("abc");
    let span = buf
        .current_snapshot()
        .create_tracking_span(Span::empty(1), SpanTrackingMode::EdgeExclusive, Forward)
        .unwrap();
    let snap = buf.insert(1, "xx").unwrap();
    let span = span.span(&snap).unwrap().span;
    assert!(span.is_empty());
}

#[test]
fn span_text_follows_edits() {
    let buf = buffer("hello world");
    let span = buf
        .current_snapshot()
        .create_tracking_span(Span::new(6, 11), SpanTrackingMode::EdgeInclusive, Forward)
        .unwrap();
    buf.insert(0, ">> ").unwrap();
    let snap = buf.replace(Span::new(9, 14), "rust").unwrap();
    assert_eq!(">> hello rust", snap.text());
    assert_eq!("rust", span.text(&snap).unwrap());
    assert_eq!(9, span.start_point(&snap).unwrap().position);
    assert_eq!(13, span.end_point(&snap).unwrap().position);
}

#[test]
fn custom_behavior_called_per_version() {
    struct Counting(AtomicUsize);

    impl TrackingBehavior for Counting {
        fn track(&self, span: Span, changes: &ChangeSet, direction: TrackingDirection) -> Span {
            self.0.fetch_add(1, Ordering::Relaxed);
            track_span(changes, span, SpanTrackingMode::EdgeInclusive, direction)
        }
    }

    let buf = buffer("abcdef");
    let behavior = Arc::new(Counting(AtomicUsize::new(0)));
    let span = buf
        .current_snapshot()
        .create_custom_tracking_span(Span::new(2, 4), behavior.clone(), HighFidelity)
        .unwrap();
    assert_eq!(SpanTrackingMode::Custom, span.mode());

    buf.insert(2, "<").unwrap();
    buf.insert(5, ">").unwrap();
    let snap = buf.insert(0, "_").unwrap();
    assert_eq!("<cd>", span.text(&snap).unwrap());
    assert_eq!(3, behavior.0.load(Ordering::Relaxed));
}

#[test]
fn custom_mode_needs_behavior() {
    let snap = buffer("abc").current_snapshot();
    let err = snap
        .create_tracking_span(Span::new(0, 1), SpanTrackingMode::Custom, Forward)
        .unwrap_err();
    assert_eq!(Error::CustomTrackingRequiresBehavior, err);
}

#[test]
fn high_fidelity_returns_to_reiterated_position() {
    let buf = buffer("abc");
    let s0 = buf.current_snapshot();
    let forward = s0.create_tracking_point(2, Positive, Forward).unwrap();
    let high = s0.create_tracking_point(2, Positive, HighFidelity).unwrap();

    buf.delete(Span::new(1, 3)).unwrap();

    // Undo the deletion
    let mut edit = buf
        .create_edit_with(EditOptions {
            reiterated_version: Some(0),
        })
        .unwrap();
    edit.insert(1, "bc").unwrap();
    let s2 = edit.apply().unwrap();
    assert_eq!("abc", s2.text());
    assert_eq!(0, s2.version().reiterated_number());

    assert_eq!(3, forward.position(&s2).unwrap());
    assert_eq!(2, high.position(&s2).unwrap());
}

#[test]
fn out_of_order_resolution() {
    let buf = buffer("abcdef");
    let point = buf
        .current_snapshot()
        .create_tracking_point(4, Positive, Forward)
        .unwrap();
    let s1 = buf.insert(0, "1").unwrap();
    let s2 = buf.insert(0, "2").unwrap();
    let s3 = buf.delete(Span::new(0, 3)).unwrap();

    assert_eq!(3, point.position(&s3).unwrap());
    assert_eq!(5, point.position(&s1).unwrap());
    assert_eq!(6, point.position(&s2).unwrap());
    assert_eq!(3, point.position(&s3).unwrap());
}

#[test]
fn foreign_version() {
    let a = buffer("abc");
    let b = buffer("abc");
    let point = a
        .current_snapshot()
        .create_tracking_point(1, Positive, Forward)
        .unwrap();
    let err = point.position(&b.current_snapshot()).unwrap_err();
    assert_eq!(
        Error::ForeignVersion {
            expected: a.id(),
            found: b.id()
        },
        err
    );
}

#[test]
fn character_at_end_of_text() {
    let buf = buffer("abc");
    let point = buf
        .current_snapshot()
        .create_tracking_point(3, Negative, Forward)
        .unwrap();
    let snap = buf.insert(3, "d").unwrap();
    assert_eq!(3, point.position(&snap).unwrap());
    assert_eq!(Some('d'), point.character(&snap).unwrap());
    assert_eq!(None, point.character(&buf.delete(Span::new(3, 4)).unwrap()).unwrap());
}
