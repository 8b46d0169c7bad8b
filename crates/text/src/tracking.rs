//! Positions and ranges that follow the text through edits.
//!
//! A tracking point or span is bound to the version it was created on.
//! Asking for it on another version of the same buffer replays the change
//! sets between the two versions, forward or backward in time, and returns a
//! fresh coordinate. Nothing about the point itself changes.
//!
//! ```text
//!  Text:      ab|cd|ef        abXYZef
//!  Change:       ---  +++
//!  Positive:     ^  ->   ^    sticks to the text after the change
//!  Negative:     ^  -> ^      sticks to the text before the change
//! ```

use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use serde::Deserialize;

use crate::{
    BufferId, Change, ChangeSet, Error, Result, Snapshot, SnapshotPoint, SnapshotSpan, Span,
    Version,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointTrackingMode {
    /// Insertions at the point push it forward, a point inside replaced text
    /// moves to the end of the new text.
    Positive,
    /// Insertions at the point leave it in place, a point inside replaced
    /// text moves to the start of the new text.
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanTrackingMode {
    /// Insertions at either edge stay outside of the span
    EdgeExclusive,
    /// Insertions at either edge become part of the span
    EdgeInclusive,
    /// Both edges track positively, the span grows at its end only
    EdgePositive,
    /// Both edges track negatively, the span grows at its start only
    EdgeNegative,
    /// Edges are moved by a caller supplied [`TrackingBehavior`]
    Custom,
}

impl SpanTrackingMode {
    /// Point tracking modes used for the start and the end of a span
    pub fn edge_modes(self) -> (PointTrackingMode, PointTrackingMode) {
        use PointTrackingMode::*;

        match self {
            SpanTrackingMode::EdgeExclusive => (Positive, Negative),
            SpanTrackingMode::EdgeInclusive | SpanTrackingMode::Custom => (Negative, Positive),
            SpanTrackingMode::EdgePositive => (Positive, Positive),
            SpanTrackingMode::EdgeNegative => (Negative, Negative),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrackingFidelity {
    /// Cheap tracking meant for moving forward in time. Going backward is
    /// supported but may lose information.
    #[default]
    Forward,
    /// Remembers the positions the point passed through so that returning to
    /// a reiterated version (for example after an undo) restores the exact
    /// position it had there.
    HighFidelity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingDirection {
    Forward,
    Backward,
}

/// Custom span tracking. Called once for every version step between the
/// version the span is bound to and the requested version.
pub trait TrackingBehavior: Send + Sync {
    fn track(&self, span: Span, changes: &ChangeSet, direction: TrackingDirection) -> Span;
}

/// Move `pos` over one change set.
pub fn track_position(
    changes: &ChangeSet,
    pos: usize,
    mode: PointTrackingMode,
    direction: TrackingDirection,
) -> usize {
    let mut delta = 0isize;
    for change in changes.iter() {
        let (from, from_len, to, to_len) = endpoints(change, direction);
        match mode {
            PointTrackingMode::Positive => {
                if pos < from {
                    break;
                }
                if pos < from + from_len {
                    return to + to_len;
                }
            }
            PointTrackingMode::Negative => {
                if pos <= from {
                    break;
                }
                if pos < from + from_len {
                    return to;
                }
            }
        }
        delta += to_len as isize - from_len as isize;
    }

    (pos as isize + delta) as usize
}

/// Move both edges of `span` over one change set.
pub fn track_span(
    changes: &ChangeSet,
    span: Span,
    mode: SpanTrackingMode,
    direction: TrackingDirection,
) -> Span {
    let (start_mode, end_mode) = mode.edge_modes();
    let start = track_position(changes, span.start, start_mode, direction);
    let mut end = track_position(changes, span.end, end_mode, direction);
    if mode == SpanTrackingMode::EdgeExclusive {
        // An exclusive span cannot swallow text inserted at its edges, an
        // empty one stays empty.
        end = end.max(start);
    }
    assert!(
        start <= end,
        "Tracked span start {start} is after end {end}, tracking {span:?} with {mode:?}"
    );
    Span { start, end }
}

fn endpoints(change: &Change, direction: TrackingDirection) -> (usize, usize, usize, usize) {
    match direction {
        TrackingDirection::Forward => (
            change.old_position(),
            change.old_len(),
            change.new_position(),
            change.new_len(),
        ),
        TrackingDirection::Backward => (
            change.new_position(),
            change.new_len(),
            change.old_position(),
            change.old_len(),
        ),
    }
}

/// Replay `step` over every change set between `from` and `to`.
fn replay<T: Copy>(
    from: &Version,
    to: &Version,
    value: T,
    mut step: impl FnMut(T, &ChangeSet, TrackingDirection) -> T,
) -> T {
    let mut value = value;
    if to.number() > from.number() {
        for node in from.nodes_until(to) {
            value = step(value, node.changes(), TrackingDirection::Forward);
        }
    } else {
        for node in to.nodes_until(from).iter().rev() {
            value = step(value, node.changes(), TrackingDirection::Backward);
        }
    }
    value
}

/// Forward replay that jumps back to a remembered value whenever a version
/// reiterates one the value already passed through.
fn replay_high_fidelity<T: Copy>(
    from: &Version,
    to: &Version,
    value: T,
    mut step: impl FnMut(T, &ChangeSet, TrackingDirection) -> T,
) -> T {
    if from.reiterated_number() == to.reiterated_number() {
        return value;
    }

    if to.number() < from.number() {
        return replay(from, to, value, step);
    }

    let mut history = vec![(from.number(), value)];
    let mut value = value;
    for node in from.nodes_until(to) {
        let reiterated = node.reiterated_number();
        let remembered = (reiterated != node.number())
            .then(|| history.iter().rev().find(|(n, _)| *n == reiterated))
            .flatten();

        value = match remembered {
            Some((_, remembered)) => *remembered,
            None => step(value, node.changes(), TrackingDirection::Forward),
        };
        history.push((node.number(), value));
    }
    value
}

struct PointInner {
    version: Version,
    position: usize,
    mode: PointTrackingMode,
    fidelity: TrackingFidelity,
    /// Last forward resolution, version number and position
    cache: Mutex<Option<(u64, usize)>>,
}

/// A position that follows the text through edits.
#[derive(Clone)]
pub struct TrackingPoint {
    inner: Arc<PointInner>,
}

impl TrackingPoint {
    pub(crate) fn new(
        version: Version,
        position: usize,
        mode: PointTrackingMode,
        fidelity: TrackingFidelity,
    ) -> TrackingPoint {
        TrackingPoint {
            inner: Arc::new(PointInner {
                version,
                position,
                mode,
                fidelity,
                cache: Mutex::new(None),
            }),
        }
    }

    pub fn mode(&self) -> PointTrackingMode {
        self.inner.mode
    }

    pub fn fidelity(&self) -> TrackingFidelity {
        self.inner.fidelity
    }

    pub fn buffer(&self) -> BufferId {
        self.inner.version.buffer()
    }

    /// Version and position the point was created on
    pub fn origin(&self) -> (&Version, usize) {
        (&self.inner.version, self.inner.position)
    }

    pub fn position_in(&self, version: &Version) -> Result<usize> {
        let inner = &self.inner;
        inner.version.check_same_chain(version)?;

        if version.number() == inner.version.number() {
            return Ok(inner.position);
        }

        let mode = inner.mode;
        let step = |pos, changes: &ChangeSet, dir| track_position(changes, pos, mode, dir);
        let position = match inner.fidelity {
            TrackingFidelity::HighFidelity => {
                replay_high_fidelity(&inner.version, version, inner.position, step)
            }
            TrackingFidelity::Forward => {
                let mut cache = inner.cache.lock();
                let start = match *cache {
                    Some((number, pos)) if number <= version.number() => {
                        (inner.version.at(number), pos)
                    }
                    _ => (inner.version.clone(), inner.position),
                };
                let position = replay(&start.0, version, start.1, step);
                if version.number() > inner.version.number() {
                    *cache = Some((version.number(), position));
                }
                position
            }
        };

        log::trace!(
            "Tracked point {}@{} to {}@{}",
            inner.position,
            inner.version.number(),
            position,
            version.number()
        );
        Ok(position)
    }

    pub fn position(&self, snapshot: &Snapshot) -> Result<usize> {
        self.position_in(snapshot.version())
    }

    pub fn point(&self, snapshot: &Snapshot) -> Result<SnapshotPoint> {
        let position = self.position(snapshot)?;
        Ok(SnapshotPoint::new(snapshot.clone(), position))
    }

    /// Char right after the tracked position, `None` at the end of text
    pub fn character(&self, snapshot: &Snapshot) -> Result<Option<char>> {
        let position = self.position(snapshot)?;
        if position == snapshot.length() {
            return Ok(None);
        }
        snapshot.char_at(position).map(Some)
    }
}

impl fmt::Debug for TrackingPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingPoint")
            .field("version", &self.inner.version)
            .field("position", &self.inner.position)
            .field("mode", &self.inner.mode)
            .field("fidelity", &self.inner.fidelity)
            .finish()
    }
}

#[derive(Clone)]
enum SpanTracker {
    Mode(SpanTrackingMode),
    Custom(Arc<dyn TrackingBehavior>),
}

struct SpanInner {
    version: Version,
    span: Span,
    tracker: SpanTracker,
    fidelity: TrackingFidelity,
    cache: Mutex<Option<(u64, Span)>>,
}

/// A range that follows the text through edits.
#[derive(Clone)]
pub struct TrackingSpan {
    inner: Arc<SpanInner>,
}

impl TrackingSpan {
    pub(crate) fn new(
        version: Version,
        span: Span,
        mode: SpanTrackingMode,
        fidelity: TrackingFidelity,
    ) -> Result<TrackingSpan> {
        if mode == SpanTrackingMode::Custom {
            return Err(Error::CustomTrackingRequiresBehavior);
        }
        Ok(Self::with_tracker(
            version,
            span,
            SpanTracker::Mode(mode),
            fidelity,
        ))
    }

    pub(crate) fn custom(
        version: Version,
        span: Span,
        behavior: Arc<dyn TrackingBehavior>,
        fidelity: TrackingFidelity,
    ) -> TrackingSpan {
        Self::with_tracker(version, span, SpanTracker::Custom(behavior), fidelity)
    }

    fn with_tracker(
        version: Version,
        span: Span,
        tracker: SpanTracker,
        fidelity: TrackingFidelity,
    ) -> TrackingSpan {
        TrackingSpan {
            inner: Arc::new(SpanInner {
                version,
                span,
                tracker,
                fidelity,
                cache: Mutex::new(None),
            }),
        }
    }

    pub fn mode(&self) -> SpanTrackingMode {
        match &self.inner.tracker {
            SpanTracker::Mode(mode) => *mode,
            SpanTracker::Custom(_) => SpanTrackingMode::Custom,
        }
    }

    pub fn fidelity(&self) -> TrackingFidelity {
        self.inner.fidelity
    }

    pub fn buffer(&self) -> BufferId {
        self.inner.version.buffer()
    }

    /// Version and span the tracking span was created on
    pub fn origin(&self) -> (&Version, Span) {
        (&self.inner.version, self.inner.span)
    }

    pub fn span_in(&self, version: &Version) -> Result<Span> {
        let inner = &self.inner;
        inner.version.check_same_chain(version)?;

        if version.number() == inner.version.number() {
            return Ok(inner.span);
        }

        let tracker = inner.tracker.clone();
        let step = move |span: Span, changes: &ChangeSet, dir| {
            let tracked = match &tracker {
                SpanTracker::Mode(mode) => track_span(changes, span, *mode, dir),
                SpanTracker::Custom(behavior) => behavior.track(span, changes, dir),
            };
            assert!(
                tracked.start <= tracked.end,
                "Tracked span start {} is after end {}",
                tracked.start,
                tracked.end
            );
            tracked
        };

        let span = match inner.fidelity {
            TrackingFidelity::HighFidelity => {
                replay_high_fidelity(&inner.version, version, inner.span, step)
            }
            TrackingFidelity::Forward => {
                let mut cache = inner.cache.lock();
                let start = match *cache {
                    Some((number, span)) if number <= version.number() => {
                        (inner.version.at(number), span)
                    }
                    _ => (inner.version.clone(), inner.span),
                };
                let span = replay(&start.0, version, start.1, step);
                if version.number() > inner.version.number() {
                    *cache = Some((version.number(), span));
                }
                span
            }
        };

        log::trace!(
            "Tracked span {:?}@{} to {:?}@{}",
            inner.span,
            inner.version.number(),
            span,
            version.number()
        );
        Ok(span)
    }

    pub fn span(&self, snapshot: &Snapshot) -> Result<SnapshotSpan> {
        let span = self.span_in(snapshot.version())?;
        Ok(SnapshotSpan::new(snapshot.clone(), span))
    }

    pub fn text(&self, snapshot: &Snapshot) -> Result<String> {
        let span = self.span_in(snapshot.version())?;
        snapshot.text_in(span)
    }

    pub fn start_point(&self, snapshot: &Snapshot) -> Result<SnapshotPoint> {
        let span = self.span_in(snapshot.version())?;
        Ok(SnapshotPoint::new(snapshot.clone(), span.start))
    }

    pub fn end_point(&self, snapshot: &Snapshot) -> Result<SnapshotPoint> {
        let span = self.span_in(snapshot.version())?;
        Ok(SnapshotPoint::new(snapshot.clone(), span.end))
    }
}

impl fmt::Debug for TrackingSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingSpan")
            .field("version", &self.inner.version)
            .field("span", &self.inner.span)
            .field("mode", &self.mode())
            .field("fidelity", &self.inner.fidelity)
            .finish()
    }
}

#[cfg(test)]
mod test;
