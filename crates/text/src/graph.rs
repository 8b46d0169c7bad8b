//! Coordinate mapping across layered buffers.
//!
//! A buffer graph is rooted at a top buffer and contains every buffer it
//! projects, transitively. Mapping down walks from a composite buffer into
//! its sources, mapping up walks from a source into the buffers projecting
//! it. A mapping that cannot be made is `None` or an empty list.
//!
//! ```text
//!        top (projection)
//!        /            \
//!   elision          literal
//!      |
//!    text
//! ```

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    events::{
        ContentTypeChanged, GraphBufferContentTypeChanged, GraphBuffersChanged, SubscriptionId,
        Subscribers,
    },
    projection::{normalize_spans, translate_point, translate_span, Affinity, MapCandidate},
    BufferId, Snapshot, SnapshotPoint, SnapshotSpan, Span, SpanTrackingMode, TextBuffer,
};

/// Decides which span typed text lands in when a position sits on a seam.
pub trait InsertionPointPolicy: Send + Sync {
    /// Index into `candidates` of the chosen span, `None` if there is no
    /// acceptable span.
    fn choose(&self, candidates: &[MapCandidate]) -> Option<usize>;
}

/// Prefer a non empty writable span, then an empty writable span, then
/// whatever comes first.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestWritable;

impl InsertionPointPolicy for NearestWritable {
    fn choose(&self, candidates: &[MapCandidate]) -> Option<usize> {
        candidates
            .iter()
            .position(|c| c.writable && !c.is_empty)
            .or_else(|| candidates.iter().position(|c| c.writable))
            .or_else(|| (!candidates.is_empty()).then_some(0))
    }
}

struct Member {
    buffer: TextBuffer,
    subscriptions: [SubscriptionId; 2],
}

impl Member {
    fn unsubscribe(&self) {
        for id in self.subscriptions {
            self.buffer.unsubscribe(id);
        }
    }
}

struct GraphInner {
    top: TextBuffer,
    members: Mutex<Vec<Member>>,
    policy: Mutex<Arc<dyn InsertionPointPolicy>>,
    buffers_changed: Subscribers<GraphBuffersChanged>,
    content_type_changed: Subscribers<GraphBufferContentTypeChanged>,
}

impl Drop for GraphInner {
    fn drop(&mut self) {
        for member in self.members.get_mut().iter() {
            member.unsubscribe();
        }
    }
}

/// Buffers reachable from a top buffer through projection.
#[derive(Clone)]
pub struct BufferGraph {
    inner: Arc<GraphInner>,
}

impl BufferGraph {
    pub fn new(top: &TextBuffer) -> BufferGraph {
        let inner = Arc::new(GraphInner {
            top: top.clone(),
            members: Mutex::new(vec![]),
            policy: Mutex::new(Arc::new(NearestWritable)),
            buffers_changed: Subscribers::default(),
            content_type_changed: Subscribers::default(),
        });
        refresh(&inner);
        BufferGraph { inner }
    }

    pub fn top_buffer(&self) -> &TextBuffer {
        &self.inner.top
    }

    /// Member buffers, top buffer first and sources after the buffers
    /// projecting them.
    pub fn buffers(&self) -> Vec<TextBuffer> {
        self.inner
            .members
            .lock()
            .iter()
            .map(|member| member.buffer.clone())
            .collect()
    }

    pub fn buffers_matching(&self, pred: impl Fn(&TextBuffer) -> bool) -> Vec<TextBuffer> {
        self.inner
            .members
            .lock()
            .iter()
            .filter(|member| pred(&member.buffer))
            .map(|member| member.buffer.clone())
            .collect()
    }

    pub fn contains(&self, buffer: BufferId) -> bool {
        self.inner
            .members
            .lock()
            .iter()
            .any(|member| member.buffer.id() == buffer)
    }

    /// Replace the policy used by [`BufferGraph::map_down_to_insertion_point`]
    pub fn set_insertion_point_policy(&self, policy: impl InsertionPointPolicy + 'static) {
        *self.inner.policy.lock() = Arc::new(policy);
    }

    pub fn on_buffers_changed(
        &self,
        handler: impl Fn(&GraphBuffersChanged) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.buffers_changed.subscribe(Arc::new(handler))
    }

    pub fn on_content_type_changed(
        &self,
        handler: impl Fn(&GraphBufferContentTypeChanged) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.content_type_changed.subscribe(Arc::new(handler))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.buffers_changed.unsubscribe(id) || self.inner.content_type_changed.unsubscribe(id)
    }

    fn check_member(&self, snapshot: &Snapshot) -> bool {
        let member = self.contains(snapshot.buffer_id());
        if !member {
            log::warn!(
                "Buffer {} is not part of the graph of buffer {}",
                snapshot.buffer_id(),
                self.inner.top.id()
            );
        }
        member
    }

    // Map down

    /// Map `point` down until a snapshot of `target` is reached
    pub fn map_down_to_buffer(
        &self,
        point: &SnapshotPoint,
        target: &TextBuffer,
        affinity: Affinity,
    ) -> Option<SnapshotPoint> {
        let id = target.id();
        self.map_down_to_first_match(point, |snapshot| snapshot.buffer_id() == id, affinity)
    }

    /// Map `point` down into `target`'s buffer and translate the result to
    /// `target`.
    pub fn map_down_to_snapshot(
        &self,
        point: &SnapshotPoint,
        target: &Snapshot,
        affinity: Affinity,
    ) -> Option<SnapshotPoint> {
        let id = target.buffer_id();
        let found =
            self.map_down_to_first_match(point, |snapshot| snapshot.buffer_id() == id, affinity)?;
        let pos = translate_point(&found, target, affinity.tracking_mode())?;
        Some(SnapshotPoint::new(target.clone(), pos))
    }

    /// Map `point` down depth first until a snapshot matches `pred`. The
    /// point's own snapshot is tried first. On a seam the span picked by
    /// `affinity` is tried before the others.
    pub fn map_down_to_first_match(
        &self,
        point: &SnapshotPoint,
        pred: impl Fn(&Snapshot) -> bool,
        affinity: Affinity,
    ) -> Option<SnapshotPoint> {
        if !self.check_member(&point.snapshot) {
            return None;
        }
        map_down(point.clone(), &pred, affinity)
    }

    /// Map the position where text would be typed down into the first
    /// snapshot matching `pred`. Seams are resolved with the insertion point
    /// policy. If the policy picks literal text, the point has no source and
    /// the result is `None`.
    pub fn map_down_to_insertion_point(
        &self,
        point: &SnapshotPoint,
        pred: impl Fn(&Snapshot) -> bool,
    ) -> Option<SnapshotPoint> {
        if !self.check_member(&point.snapshot) {
            return None;
        }

        let policy = self.inner.policy.lock().clone();
        let mut point = point.clone();
        loop {
            if pred(&point.snapshot) {
                return Some(point);
            }

            let map = point.snapshot.projection()?;
            let candidates = map.candidates(point.position);
            let index = policy.choose(&candidates)?;
            point = candidates.get(index)?.point.clone()?;
        }
    }

    /// Map `span` down to the spans of `target` it covers
    pub fn map_down_span_to_buffer(
        &self,
        span: &SnapshotSpan,
        target: &TextBuffer,
    ) -> Vec<SnapshotSpan> {
        let id = target.id();
        self.map_down_span_to_first_match(span, |snapshot| snapshot.buffer_id() == id)
    }

    /// Map `span` down into `target`'s buffer and translate the pieces to
    /// `target`.
    pub fn map_down_span_to_snapshot(
        &self,
        span: &SnapshotSpan,
        target: &Snapshot,
        mode: SpanTrackingMode,
    ) -> Vec<SnapshotSpan> {
        let id = target.buffer_id();
        let pieces: Vec<Span> = self
            .map_down_span_to_first_match(span, |snapshot| snapshot.buffer_id() == id)
            .iter()
            .filter_map(|piece| translate_span(piece, target, mode))
            .collect();
        normalize_spans(pieces)
            .into_iter()
            .map(|s| SnapshotSpan::new(target.clone(), s))
            .collect()
    }

    pub fn map_down_span_to_first_match(
        &self,
        span: &SnapshotSpan,
        pred: impl Fn(&Snapshot) -> bool,
    ) -> Vec<SnapshotSpan> {
        if !self.check_member(&span.snapshot) {
            return vec![];
        }

        let mut found = vec![];
        map_down_span(span.clone(), &pred, &mut found);
        normalize_snapshot_spans(found)
    }

    // Map up

    /// Map `point` up into `target`. The point must belong to a buffer
    /// `target` projects, directly or through other projections.
    pub fn map_up_to_snapshot(
        &self,
        point: &SnapshotPoint,
        target: &Snapshot,
        affinity: Affinity,
    ) -> Option<SnapshotPoint> {
        if !self.check_member(&point.snapshot) || !self.check_member(target) {
            return None;
        }
        let pos = map_up(point, target, affinity)?;
        Some(SnapshotPoint::new(target.clone(), pos))
    }

    pub fn map_up_to_buffer(
        &self,
        point: &SnapshotPoint,
        target: &TextBuffer,
        affinity: Affinity,
    ) -> Option<SnapshotPoint> {
        self.map_up_to_snapshot(point, &target.current_snapshot(), affinity)
    }

    /// Map `point` up to the nearest buffer whose current snapshot matches
    /// `pred`. Buffers closer to the point are tried first.
    pub fn map_up_to_first_match(
        &self,
        point: &SnapshotPoint,
        pred: impl Fn(&Snapshot) -> bool,
        affinity: Affinity,
    ) -> Option<SnapshotPoint> {
        if !self.check_member(&point.snapshot) {
            return None;
        }
        if pred(&point.snapshot) {
            return Some(point.clone());
        }

        for buffer in self.projecting(point.snapshot.buffer_id()) {
            let snapshot = buffer.current_snapshot();
            if !pred(&snapshot) {
                continue;
            }
            if let Some(pos) = map_up(point, &snapshot, affinity) {
                return Some(SnapshotPoint::new(snapshot, pos));
            }
        }
        None
    }

    /// Composite spans of `target`'s current snapshot covering `span`
    pub fn map_up_span_to_buffer(
        &self,
        span: &SnapshotSpan,
        target: &TextBuffer,
        mode: SpanTrackingMode,
    ) -> Vec<SnapshotSpan> {
        self.map_up_span_to_snapshot(span, &target.current_snapshot(), mode)
    }

    pub fn map_up_span_to_snapshot(
        &self,
        span: &SnapshotSpan,
        target: &Snapshot,
        mode: SpanTrackingMode,
    ) -> Vec<SnapshotSpan> {
        if !self.check_member(&span.snapshot) || !self.check_member(target) {
            return vec![];
        }

        map_up_span(span, target, mode)
            .into_iter()
            .map(|s| SnapshotSpan::new(target.clone(), s))
            .collect()
    }

    pub fn map_up_span_to_first_match(
        &self,
        span: &SnapshotSpan,
        pred: impl Fn(&Snapshot) -> bool,
        mode: SpanTrackingMode,
    ) -> Vec<SnapshotSpan> {
        if !self.check_member(&span.snapshot) {
            return vec![];
        }
        if pred(&span.snapshot) {
            return vec![span.clone()];
        }

        for buffer in self.projecting(span.snapshot.buffer_id()) {
            let snapshot = buffer.current_snapshot();
            if !pred(&snapshot) {
                continue;
            }
            let spans = map_up_span(span, &snapshot, mode);
            if !spans.is_empty() {
                return spans
                    .into_iter()
                    .map(|s| SnapshotSpan::new(snapshot.clone(), s))
                    .collect();
            }
        }
        vec![]
    }

    /// Members projecting `source` directly or transitively, nearest first
    fn projecting(&self, source: BufferId) -> Vec<TextBuffer> {
        let members = self.buffers();
        let mut parents: FxHashMap<BufferId, Vec<TextBuffer>> = FxHashMap::default();
        for buffer in &members {
            for child in buffer.source_buffers() {
                parents.entry(child.id()).or_default().push(buffer.clone());
            }
        }

        let mut result = vec![];
        let mut visited = FxHashSet::default();
        visited.insert(source);
        let mut queue = VecDeque::from([source]);
        while let Some(id) = queue.pop_front() {
            for parent in parents.get(&id).into_iter().flatten() {
                if visited.insert(parent.id()) {
                    queue.push_back(parent.id());
                    result.push(parent.clone());
                }
            }
        }
        result
    }
}

impl fmt::Debug for BufferGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<BufferId> = self.buffers().iter().map(TextBuffer::id).collect();
        f.debug_struct("BufferGraph")
            .field("top", &self.inner.top.id())
            .field("buffers", &ids)
            .finish()
    }
}

/// Top buffer and everything it projects, breadth first
fn collect_members(top: &TextBuffer) -> Vec<TextBuffer> {
    let mut seen = FxHashSet::default();
    let mut queue = VecDeque::from([top.clone()]);
    let mut result = vec![];
    while let Some(buffer) = queue.pop_front() {
        if !seen.insert(buffer.id()) {
            continue;
        }
        queue.extend(buffer.source_buffers());
        result.push(buffer);
    }
    result
}

/// Bring the member list up to date with the projection relationships
fn refresh(inner: &Arc<GraphInner>) {
    let wanted = collect_members(&inner.top);

    let (added, removed) = {
        let mut members = inner.members.lock();
        let mut removed = vec![];
        members.retain(|member| {
            if wanted.contains(&member.buffer) {
                return true;
            }
            member.unsubscribe();
            removed.push(member.buffer.id());
            false
        });

        let mut added = vec![];
        for buffer in wanted {
            if members.iter().any(|m| m.buffer == buffer) {
                continue;
            }
            added.push(buffer.id());
            members.push(subscribe(inner, buffer));
        }

        // Keep breadth first order
        let order = collect_members(&inner.top);
        members.sort_by_key(|m| order.iter().position(|b| *b == m.buffer));
        (added, removed)
    };

    if added.is_empty() && removed.is_empty() {
        return;
    }

    log::debug!(
        "Buffer graph of {}: added {:?}, removed {:?}",
        inner.top.id(),
        added,
        removed
    );
    inner
        .buffers_changed
        .notify(&GraphBuffersChanged { added, removed });
}

fn subscribe(inner: &Arc<GraphInner>, buffer: TextBuffer) -> Member {
    let weak: Weak<GraphInner> = Arc::downgrade(inner);
    let sources = buffer.on_source_buffers_changed(move |_| {
        if let Some(inner) = weak.upgrade() {
            refresh(&inner);
        }
    });

    let weak: Weak<GraphInner> = Arc::downgrade(inner);
    let content_type = buffer.on_content_type_changed(move |event: &ContentTypeChanged| {
        if let Some(inner) = weak.upgrade() {
            inner
                .content_type_changed
                .notify(&GraphBufferContentTypeChanged {
                    buffer: event.after.buffer_id(),
                    before: event.before_content_type.clone(),
                    after: event.after_content_type.clone(),
                });
        }
    });

    Member {
        buffer,
        subscriptions: [sources, content_type],
    }
}

fn map_down(
    point: SnapshotPoint,
    pred: &impl Fn(&Snapshot) -> bool,
    affinity: Affinity,
) -> Option<SnapshotPoint> {
    if pred(&point.snapshot) {
        return Some(point);
    }

    let map = point.snapshot.projection()?;
    let mut candidates = map.candidates(point.position);
    if affinity == Affinity::Successor {
        candidates.reverse();
    }

    candidates
        .into_iter()
        .filter_map(|candidate| candidate.point)
        .find_map(|source| map_down(source, pred, affinity))
}

fn map_down_span(
    span: SnapshotSpan,
    pred: &impl Fn(&Snapshot) -> bool,
    found: &mut Vec<SnapshotSpan>,
) {
    if pred(&span.snapshot) {
        found.push(span);
        return;
    }

    let Some(map) = span.snapshot.projection() else {
        return;
    };
    for piece in map.map_span_to_source(span.span) {
        map_down_span(piece, pred, found);
    }
}

/// Position of `point` in `target`, searching through `target`'s sources
fn map_up(point: &SnapshotPoint, target: &Snapshot, affinity: Affinity) -> Option<usize> {
    if point.snapshot.buffer_id() == target.buffer_id() {
        return translate_point(point, target, affinity.tracking_mode());
    }

    let map = target.projection()?;
    let mut positions = vec![];
    for source in map.source_snapshots() {
        let Some(pos) = map_up(point, &source, affinity) else {
            continue;
        };
        let source_point = SnapshotPoint::new(source, pos);
        positions.extend(map.map_from_source(&source_point, affinity));
    }

    positions.sort_unstable();
    positions.dedup();
    match affinity {
        Affinity::Predecessor => positions.first().copied(),
        Affinity::Successor => positions.last().copied(),
    }
}

fn map_up_span(span: &SnapshotSpan, target: &Snapshot, mode: SpanTrackingMode) -> Vec<Span> {
    if span.snapshot.buffer_id() == target.buffer_id() {
        return translate_span(span, target, mode).into_iter().collect();
    }

    let Some(map) = target.projection() else {
        return vec![];
    };

    let mut result = vec![];
    for source in map.source_snapshots() {
        for piece in map_up_span(span, &source, mode) {
            let piece = SnapshotSpan::new(source.clone(), piece);
            result.extend(map.map_span_from_source(&piece, mode));
        }
    }
    normalize_spans(result)
}

/// Group spans by snapshot, merging touching ones
fn normalize_snapshot_spans(spans: Vec<SnapshotSpan>) -> Vec<SnapshotSpan> {
    let mut groups: Vec<(Snapshot, Vec<Span>)> = vec![];
    for span in spans {
        match groups.iter_mut().find(|(s, _)| s.is_same(&span.snapshot)) {
            Some((_, group)) => group.push(span.span),
            None => groups.push((span.snapshot, vec![span.span])),
        }
    }

    groups
        .into_iter()
        .flat_map(|(snapshot, spans)| {
            normalize_spans(spans)
                .into_iter()
                .map(move |span| SnapshotSpan::new(snapshot.clone(), span))
        })
        .collect()
}
