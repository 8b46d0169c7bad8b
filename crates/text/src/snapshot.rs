use std::{fmt, sync::Arc};

use ropey::{Rope, RopeSlice};

use crate::{
    projection::ProjectionMap, BufferId, BufferKind, ContentType, Error, PointTrackingMode,
    Result, Span, SpanTrackingMode, TrackingBehavior, TrackingFidelity, TrackingPoint,
    TrackingSpan, Version,
};

struct SnapshotInner {
    buffer: BufferId,
    kind: BufferKind,
    version: Version,
    text: Rope,
    content_type: ContentType,
    projection: Option<Arc<ProjectionMap>>,
}

/// Immutable text of a buffer at exactly one version.
///
/// Snapshots are cheap to clone and can be read from any thread. The content
/// type is pinned when the snapshot is created.
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

impl Snapshot {
    pub(crate) fn new(
        buffer: BufferId,
        kind: BufferKind,
        version: Version,
        text: Rope,
        content_type: ContentType,
        projection: Option<Arc<ProjectionMap>>,
    ) -> Snapshot {
        debug_assert_eq!(
            version.length(),
            text.len_chars(),
            "Snapshot text does not match version length"
        );
        Snapshot {
            inner: Arc::new(SnapshotInner {
                buffer,
                kind,
                version,
                text,
                content_type,
                projection,
            }),
        }
    }

    pub fn buffer_id(&self) -> BufferId {
        self.inner.buffer
    }

    pub fn kind(&self) -> BufferKind {
        self.inner.kind
    }

    pub fn version(&self) -> &Version {
        &self.inner.version
    }

    pub fn version_number(&self) -> u64 {
        self.inner.version.number()
    }

    pub fn content_type(&self) -> &ContentType {
        &self.inner.content_type
    }

    /// Source spans of a projection or elision snapshot
    pub fn projection(&self) -> Option<&ProjectionMap> {
        self.inner.projection.as_deref()
    }

    pub(crate) fn projection_arc(&self) -> Option<&Arc<ProjectionMap>> {
        self.inner.projection.as_ref()
    }

    /// Direct access to the underlying storage
    pub fn rope(&self) -> &Rope {
        &self.inner.text
    }

    pub fn length(&self) -> usize {
        self.inner.text.len_chars()
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    pub fn line_count(&self) -> usize {
        self.inner.text.len_lines()
    }

    pub fn text(&self) -> String {
        self.inner.text.to_string()
    }

    pub fn text_in(&self, span: Span) -> Result<String> {
        Ok(self.slice(span)?.into())
    }

    pub fn slice(&self, span: Span) -> Result<RopeSlice<'_>> {
        self.check_span(span)?;
        Ok(self.inner.text.slice(span.start..span.end))
    }

    pub fn char_at(&self, pos: usize) -> Result<char> {
        if pos >= self.length() {
            return Err(Error::OutOfRange {
                position: pos,
                length: self.length(),
            });
        }
        Ok(self.inner.text.char(pos))
    }

    pub fn line_number_from_position(&self, pos: usize) -> Result<usize> {
        self.check_position(pos)?;
        Ok(self.inner.text.char_to_line(pos))
    }

    pub fn line_from_position(&self, pos: usize) -> Result<Line> {
        let number = self.line_number_from_position(pos)?;
        self.line(number)
    }

    pub fn line(&self, number: usize) -> Result<Line> {
        let text = &self.inner.text;
        let count = text.len_lines();
        if number >= count {
            return Err(Error::LineOutOfRange {
                line: number,
                count,
            });
        }

        let start = text.line_to_char(number);
        let end_including_break = if number + 1 < count {
            text.line_to_char(number + 1)
        } else {
            text.len_chars()
        };
        let break_len = line_break_len(text.slice(start..end_including_break));

        Ok(Line {
            number,
            start,
            end: end_including_break - break_len,
            end_including_break,
        })
    }

    pub fn lines(&self) -> Lines<'_> {
        Lines {
            snapshot: self,
            next: 0,
        }
    }

    pub fn check_position(&self, pos: usize) -> Result<()> {
        if pos > self.length() {
            return Err(Error::OutOfRange {
                position: pos,
                length: self.length(),
            });
        }
        Ok(())
    }

    pub fn check_span(&self, span: Span) -> Result<()> {
        if span.start > span.end || span.end > self.length() {
            return Err(Error::SpanOutOfRange {
                span,
                length: self.length(),
            });
        }
        Ok(())
    }

    pub fn create_tracking_point(
        &self,
        pos: usize,
        mode: PointTrackingMode,
        fidelity: TrackingFidelity,
    ) -> Result<TrackingPoint> {
        self.check_position(pos)?;
        Ok(TrackingPoint::new(
            self.inner.version.clone(),
            pos,
            mode,
            fidelity,
        ))
    }

    pub fn create_tracking_span(
        &self,
        span: Span,
        mode: SpanTrackingMode,
        fidelity: TrackingFidelity,
    ) -> Result<TrackingSpan> {
        self.check_span(span)?;
        TrackingSpan::new(self.inner.version.clone(), span, mode, fidelity)
    }

    pub fn create_custom_tracking_span(
        &self,
        span: Span,
        behavior: Arc<dyn TrackingBehavior>,
        fidelity: TrackingFidelity,
    ) -> Result<TrackingSpan> {
        self.check_span(span)?;
        Ok(TrackingSpan::custom(
            self.inner.version.clone(),
            span,
            behavior,
            fidelity,
        ))
    }

    /// Same buffer and same version
    pub fn is_same(&self, other: &Snapshot) -> bool {
        self.inner.buffer == other.inner.buffer && self.inner.version == other.inner.version
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.is_same(other)
    }
}

impl Eq for Snapshot {}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("buffer", &self.inner.buffer)
            .field("kind", &self.inner.kind)
            .field("version", &self.inner.version.number())
            .field("length", &self.length())
            .finish()
    }
}

/// Length of the line break at the end of `line`
fn line_break_len(line: RopeSlice<'_>) -> usize {
    let len = line.len_chars();
    if len == 0 {
        return 0;
    }

    match line.char(len - 1) {
        '\n' if len >= 2 && line.char(len - 2) == '\r' => 2,
        '\n' | '\r' | '\u{000B}' | '\u{000C}' | '\u{0085}' | '\u{2028}' | '\u{2029}' => 1,
        _ => 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line {
    pub number: usize,
    pub start: usize,
    /// End of the line content, before the line break
    pub end: usize,
    pub end_including_break: usize,
}

impl Line {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }

    pub fn span_including_break(&self) -> Span {
        Span::new(self.start, self.end_including_break)
    }

    pub fn break_len(&self) -> usize {
        self.end_including_break - self.end
    }
}

#[derive(Debug)]
pub struct Lines<'a> {
    snapshot: &'a Snapshot,
    next: usize,
}

impl<'a> Iterator for Lines<'a> {
    type Item = Line;

    fn next(&mut self) -> Option<Self::Item> {
        let line = self.snapshot.line(self.next).ok()?;
        self.next += 1;
        Some(line)
    }
}

/// A position tied to the snapshot it is valid in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPoint {
    pub snapshot: Snapshot,
    pub position: usize,
}

impl SnapshotPoint {
    pub fn new(snapshot: Snapshot, position: usize) -> SnapshotPoint {
        debug_assert!(position <= snapshot.length());
        SnapshotPoint { snapshot, position }
    }

    /// The corresponding position in another snapshot of the same buffer
    pub fn translate_to(&self, target: &Snapshot, mode: PointTrackingMode) -> Result<SnapshotPoint> {
        let point = self.snapshot.create_tracking_point(
            self.position,
            mode,
            TrackingFidelity::Forward,
        )?;
        point.point(target)
    }
}

/// A span tied to the snapshot it is valid in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSpan {
    pub snapshot: Snapshot,
    pub span: Span,
}

impl SnapshotSpan {
    pub fn new(snapshot: Snapshot, span: Span) -> SnapshotSpan {
        debug_assert!(span.end <= snapshot.length());
        SnapshotSpan { snapshot, span }
    }

    pub fn text(&self) -> String {
        self.snapshot
            .slice(self.span)
            .map(String::from)
            .unwrap_or_default()
    }

    pub fn start(&self) -> SnapshotPoint {
        SnapshotPoint::new(self.snapshot.clone(), self.span.start)
    }

    pub fn end(&self) -> SnapshotPoint {
        SnapshotPoint::new(self.snapshot.clone(), self.span.end)
    }

    /// The corresponding span in another snapshot of the same buffer
    pub fn translate_to(&self, target: &Snapshot, mode: SpanTrackingMode) -> Result<SnapshotSpan> {
        let span =
            self.snapshot
                .create_tracking_span(self.span, mode, TrackingFidelity::Forward)?;
        span.span(target)
    }
}
