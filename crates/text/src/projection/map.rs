use std::sync::Arc;

use ropey::Rope;
use smallvec::SmallVec;

use crate::{
    BufferId, PointTrackingMode, Snapshot, SnapshotPoint, SnapshotSpan, Span, SpanTrackingMode,
};

/// Tie break used when a position falls on the seam of two spans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Affinity {
    /// Prefer the span ending at the position
    #[default]
    Predecessor,
    /// Prefer the span starting at the position
    Successor,
}

impl Affinity {
    /// Tracking mode used when a point has to be moved to another version
    pub fn tracking_mode(self) -> PointTrackingMode {
        match self {
            Affinity::Predecessor => PointTrackingMode::Negative,
            Affinity::Successor => PointTrackingMode::Positive,
        }
    }
}

/// One piece of a projection snapshot's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpan {
    Buffer(SnapshotSpan),
    Literal(Arc<str>),
}

impl SourceSpan {
    pub fn len(&self) -> usize {
        match self {
            SourceSpan::Buffer(span) => span.span.len(),
            SourceSpan::Literal(text) => text.chars().count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, SourceSpan::Literal(_))
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            SourceSpan::Buffer(span) => Some(&span.snapshot),
            SourceSpan::Literal(_) => None,
        }
    }

    fn source_of(&self, buffer: BufferId) -> Option<&SnapshotSpan> {
        match self {
            SourceSpan::Buffer(span) if span.snapshot.buffer_id() == buffer => Some(span),
            _ => None,
        }
    }
}

/// A span a composite position maps into. Several candidates exist when the
/// position is on a seam.
#[derive(Debug, Clone)]
pub struct MapCandidate {
    /// Index of the source span
    pub index: usize,
    /// Position in the source, `None` for literals
    pub point: Option<SnapshotPoint>,
    pub is_empty: bool,
    /// Whether text typed here may land in this span
    pub writable: bool,
}

/// Source spans of one projection or elision snapshot, together with the
/// composite position each of them starts at.
#[derive(Debug)]
pub struct ProjectionMap {
    spans: Vec<SourceSpan>,
    /// Composite start of every span followed by the total length
    starts: Vec<usize>,
    writable_literals: bool,
}

impl ProjectionMap {
    pub(crate) fn new(spans: Vec<SourceSpan>, writable_literals: bool) -> ProjectionMap {
        let mut starts = Vec::with_capacity(spans.len() + 1);
        let mut pos = 0;
        for span in &spans {
            starts.push(pos);
            pos += span.len();
        }
        starts.push(pos);

        ProjectionMap {
            spans,
            starts,
            writable_literals,
        }
    }

    /// Build the composite text
    pub(crate) fn rope(&self) -> Rope {
        let mut rope = Rope::new();
        for span in &self.spans {
            match span {
                SourceSpan::Buffer(s) => {
                    let slice = s.snapshot.rope().slice(s.span.start..s.span.end);
                    rope.append(Rope::from(slice));
                }
                SourceSpan::Literal(text) => {
                    let len = rope.len_chars();
                    rope.insert(len, text);
                }
            }
        }
        rope
    }

    pub fn len(&self) -> usize {
        self.starts[self.spans.len()]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Whether typed text may land in literal spans
    pub fn writable_literals(&self) -> bool {
        self.writable_literals
    }

    pub fn source_spans(&self) -> &[SourceSpan] {
        &self.spans
    }

    /// Composite position span `index` starts at. `span_count()` gives the
    /// total length.
    pub fn span_start(&self, index: usize) -> usize {
        self.starts[index]
    }

    /// Composite range covered by span `index`
    pub fn composite_span(&self, index: usize) -> Span {
        Span::new(self.starts[index], self.starts[index + 1])
    }

    /// Distinct source snapshots in order of first appearance
    pub fn source_snapshots(&self) -> Vec<Snapshot> {
        let mut result: Vec<Snapshot> = vec![];
        for snapshot in self.spans.iter().filter_map(SourceSpan::snapshot) {
            if !result.iter().any(|s| s.buffer_id() == snapshot.buffer_id()) {
                result.push(snapshot.clone());
            }
        }
        result
    }

    /// Indices of the spans containing `pos` or ending at it
    fn indices_at(&self, pos: usize) -> std::ops::Range<usize> {
        let n = self.spans.len();
        let first = self.starts[1..].partition_point(|end| *end < pos);
        let mut last = first;
        while last < n && self.starts[last] <= pos {
            last += 1;
        }
        first..last
    }

    pub fn candidates(&self, pos: usize) -> Vec<MapCandidate> {
        if pos > self.len() {
            return vec![];
        }

        self.indices_at(pos)
            .map(|index| {
                let span = &self.spans[index];
                let offset = pos - self.starts[index];
                let point = match span {
                    SourceSpan::Buffer(s) => {
                        Some(SnapshotPoint::new(s.snapshot.clone(), s.span.start + offset))
                    }
                    SourceSpan::Literal(_) => None,
                };
                MapCandidate {
                    index,
                    point,
                    is_empty: span.is_empty(),
                    writable: !span.is_literal() || self.writable_literals,
                }
            })
            .collect()
    }

    /// Map a composite position down into its source. On a seam the
    /// affinity picks the span. Literal text has no source.
    pub fn map_to_source(&self, pos: usize, affinity: Affinity) -> Option<SnapshotPoint> {
        let mut candidates = self.candidates(pos);
        let candidate = match affinity {
            Affinity::Predecessor => candidates.into_iter().next(),
            Affinity::Successor => candidates.pop(),
        };
        candidate?.point
    }

    /// Map a composite span down into source spans. An empty span maps like
    /// a point on every span it touches, a non empty one maps to the
    /// non empty pieces it overlaps.
    pub fn map_span_to_source(&self, span: Span) -> Vec<SnapshotSpan> {
        let mut result = vec![];
        if span.end > self.len() {
            return result;
        }

        for (index, source) in self.spans.iter().enumerate() {
            let SourceSpan::Buffer(source) = source else {
                continue;
            };
            let composite = self.composite_span(index);
            let Some(piece) = clip(span, composite) else {
                continue;
            };

            let start = source.span.start + piece.start - composite.start;
            result.push(SnapshotSpan::new(
                source.snapshot.clone(),
                Span::from_len(start, piece.len()),
            ));
        }
        result
    }

    /// Composite positions of a source point. A source position projected
    /// more than once, or sitting on a seam, maps to several positions.
    pub fn map_from_source(&self, point: &SnapshotPoint, affinity: Affinity) -> Vec<usize> {
        let buffer = point.snapshot.buffer_id();
        let mut result: SmallVec<[usize; 2]> = SmallVec::new();

        for (index, span) in self.spans.iter().enumerate() {
            let Some(source) = span.source_of(buffer) else {
                continue;
            };
            let Some(pos) = translate_point(point, &source.snapshot, affinity.tracking_mode())
            else {
                continue;
            };

            if source.span.contains_or_ends_at(pos) {
                let composite = self.starts[index] + pos - source.span.start;
                if result.last() != Some(&composite) {
                    result.push(composite);
                }
            }
        }
        result.into_vec()
    }

    /// Composite spans covering a source span, sorted with touching pieces
    /// merged.
    pub fn map_span_from_source(&self, span: &SnapshotSpan, mode: SpanTrackingMode) -> Vec<Span> {
        let buffer = span.snapshot.buffer_id();
        let mut pieces = vec![];

        for (index, entry) in self.spans.iter().enumerate() {
            let Some(source) = entry.source_of(buffer) else {
                continue;
            };
            let Some(translated) = translate_span(span, &source.snapshot, mode) else {
                continue;
            };
            let Some(piece) = clip(translated, source.span) else {
                continue;
            };

            let start = self.starts[index] + piece.start - source.span.start;
            pieces.push(Span::from_len(start, piece.len()));
        }

        normalize_spans(pieces)
    }
}

/// Part of `span` inside `range`. Empty spans only need to touch the range.
fn clip(span: Span, range: Span) -> Option<Span> {
    if span.is_empty() {
        range
            .contains_or_ends_at(span.start)
            .then_some(span)
    } else {
        span.overlap(&range)
    }
}

/// Sort and merge overlapping or touching spans
pub(crate) fn normalize_spans(mut spans: Vec<Span>) -> Vec<Span> {
    spans.sort();
    let mut result: Vec<Span> = Vec::with_capacity(spans.len());
    for span in spans {
        match result.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => result.push(span),
        }
    }
    result
}

pub(crate) fn translate_point(
    point: &SnapshotPoint,
    target: &Snapshot,
    mode: PointTrackingMode,
) -> Option<usize> {
    if point.snapshot.is_same(target) {
        return Some(point.position);
    }

    match point.translate_to(target, mode) {
        Ok(point) => Some(point.position),
        Err(e) => {
            log::warn!("Cannot map point from {:?} to {:?}: {e}", point.snapshot, target);
            None
        }
    }
}

pub(crate) fn translate_span(
    span: &SnapshotSpan,
    target: &Snapshot,
    mode: SpanTrackingMode,
) -> Option<Span> {
    if span.snapshot.is_same(target) {
        return Some(span.span);
    }

    match span.translate_to(target, mode) {
        Ok(span) => Some(span.span),
        Err(e) => {
            log::warn!("Cannot map span from {:?} to {:?}: {e}", span.snapshot, target);
            None
        }
    }
}
