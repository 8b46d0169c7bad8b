//! Buffers composed from spans of other buffers.
//!
//! A projection buffer keeps an ordered list of entries, each either a
//! tracking span on a source buffer or a literal string. Its text is the
//! concatenation of the entries resolved on the sources' snapshots. When a
//! source changes the entries are resolved again and the projection buffer
//! gets a new version whose change set describes the same edit in composite
//! coordinates.
//!
//! ```text
//!  source a:  hello world        source b:  fn main
//!             -----                         --
//!  entries:   a[0..5]  " "  b[0..2]
//!  composite: hello fn
//! ```

mod edit;
mod elision;
mod map;

use std::{ops::Deref, sync::Arc};

use rustc_hash::{FxHashMap, FxHashSet};

pub(crate) use edit::{apply_mapped, map_change, ProjectedChange};
pub use elision::ElisionBuffer;
pub use map::{Affinity, MapCandidate, ProjectionMap, SourceSpan};
pub(crate) use map::{normalize_spans, translate_point, translate_span};

use crate::{
    buffer::WeakBuffer,
    change::PendingChange,
    events::{SourceBuffersChanged, SubscriptionId, TextContentChanged},
    BufferId, BufferKind, ChangeSet, ContentType, EngineConfig, Error, PointTrackingMode,
    ProjectionOptions, Result, Snapshot, SnapshotSpan, Span, SpanTrackingMode, TextBuffer,
    TrackingSpan,
};

/// One entry in a projection buffer's span list
#[derive(Debug, Clone)]
pub enum SourceEntry {
    Tracking { buffer: TextBuffer, span: TrackingSpan },
    Literal(Arc<str>),
}

impl SourceEntry {
    /// Track `span` of the buffer's current snapshot
    pub fn span(buffer: &TextBuffer, span: Span, mode: SpanTrackingMode) -> Result<SourceEntry> {
        let snapshot = buffer.current_snapshot();
        let fidelity = buffer.config().tracking.default_fidelity;
        let span = snapshot.create_tracking_span(span, mode, fidelity)?;
        Ok(SourceEntry::Tracking {
            buffer: buffer.clone(),
            span,
        })
    }

    pub fn tracking(buffer: &TextBuffer, span: TrackingSpan) -> Result<SourceEntry> {
        if span.buffer() != buffer.id() {
            return Err(Error::ForeignVersion {
                expected: buffer.id(),
                found: span.buffer(),
            });
        }
        Ok(SourceEntry::Tracking {
            buffer: buffer.clone(),
            span,
        })
    }

    pub fn literal(text: impl Into<Arc<str>>) -> SourceEntry {
        SourceEntry::Literal(text.into())
    }

    pub fn source_buffer(&self) -> Option<&TextBuffer> {
        match self {
            SourceEntry::Tracking { buffer, .. } => Some(buffer),
            SourceEntry::Literal(_) => None,
        }
    }

    fn edge_modes(&self) -> Option<(PointTrackingMode, PointTrackingMode)> {
        match self {
            SourceEntry::Tracking { span, .. } => Some(span.mode().edge_modes()),
            SourceEntry::Literal(_) => None,
        }
    }

    fn resolve(&self, snapshot: Option<&Snapshot>) -> Result<SourceSpan> {
        match (self, snapshot) {
            (SourceEntry::Tracking { span, .. }, Some(snapshot)) => {
                Ok(SourceSpan::Buffer(span.span(snapshot)?))
            }
            (SourceEntry::Tracking { buffer, span }, None) => {
                Ok(SourceSpan::Buffer(span.span(&buffer.current_snapshot())?))
            }
            (SourceEntry::Literal(text), _) => Ok(SourceSpan::Literal(text.clone())),
        }
    }
}

/// Distinct source buffers of `entries` in order of first appearance
fn distinct_buffers(entries: &[SourceEntry]) -> Vec<TextBuffer> {
    let mut result: Vec<TextBuffer> = vec![];
    for buffer in entries.iter().filter_map(SourceEntry::source_buffer) {
        if !result.contains(buffer) {
            result.push(buffer.clone());
        }
    }
    result
}

/// Span list state of a projection or elision buffer.
pub(crate) struct ProjectionState {
    entries: Vec<SourceEntry>,
    options: ProjectionOptions,
    sources: Vec<(TextBuffer, SubscriptionId)>,
    /// Single source of an elision buffer
    elision_source: Option<TextBuffer>,
}

impl ProjectionState {
    pub(crate) fn source_buffers(&self) -> Vec<TextBuffer> {
        distinct_buffers(&self.entries)
    }

    /// Subscribe to new sources and drop subscriptions to sources no entry
    /// refers to anymore. Returns the added and removed buffers.
    fn sync_sources(&mut self, owner: &TextBuffer) -> (Vec<BufferId>, Vec<BufferId>) {
        let wanted = distinct_buffers(&self.entries);

        let mut removed = vec![];
        self.sources.retain(|(source, subscription)| {
            if wanted.contains(source) {
                return true;
            }
            source.unsubscribe(*subscription);
            removed.push(source.id());
            false
        });

        let mut added = vec![];
        for source in wanted {
            if self.sources.iter().any(|(s, _)| *s == source) {
                continue;
            }

            let weak = owner.downgrade();
            let subscription = source.on_changed(move |event| on_source_changed(&weak, event));
            added.push(source.id());
            self.sources.push((source, subscription));
        }

        (added, removed)
    }
}

impl Drop for ProjectionState {
    fn drop(&mut self) {
        for (source, subscription) in &self.sources {
            source.unsubscribe(*subscription);
        }
    }
}

fn on_source_changed(owner: &WeakBuffer, event: &TextContentChanged) {
    let Some(buffer) = owner.upgrade() else {
        return;
    };

    let result = source_changed(&buffer, event);
    if let Err(e) = &result {
        log::error!(
            "Projection buffer {} failed to follow source {}: {e}",
            buffer.id(),
            event.after.buffer_id()
        );
    }
    debug_assert!(
        result.is_ok(),
        "Projection buffer {} is out of sync with its sources",
        buffer.id()
    );
}

/// Whether no text changed between `seen` and `current`. Versions without
/// changes, like content type changes, are not followed.
fn has_followed(seen: &Snapshot, current: &Snapshot) -> bool {
    seen.version()
        .nodes_until(current.version())
        .iter()
        .all(|node| node.changes().is_empty())
}

/// Whether every projection below `buffer` has followed the text of its
/// sources
fn is_settled(buffer: &TextBuffer) -> bool {
    let snapshot = buffer.current_snapshot();
    let Some(map) = snapshot.projection() else {
        return true;
    };

    let seen = map.source_snapshots();
    buffer.source_buffers().iter().all(|source| {
        let current = source.current_snapshot();
        seen.iter()
            .filter(|s| s.buffer_id() == source.id())
            .all(|s| has_followed(s, &current))
            && is_settled(source)
    })
}

/// The single non empty change set between two snapshots of a buffer.
/// `None` if there are several, the entry is then replaced as a whole.
fn changes_between(old: &Snapshot, current: &Snapshot) -> Option<ChangeSet> {
    let mut found = None;
    for node in old.version().nodes_until(current.version()) {
        if node.changes().is_empty() {
            continue;
        }
        if found.is_some() {
            return None;
        }
        found = Some(node.changes().clone());
    }
    Some(found.unwrap_or_default())
}

/// Resolve the entries whose sources moved on their current snapshots and
/// re-version the projection buffer as one step.
///
/// A source edit reaches a projection once through every path leading to it.
/// Notifications arriving while a projection below has not followed the edit
/// yet are skipped. Once every entry is current the later ones find nothing
/// to do, so observers never see half of a source edit.
fn source_changed(buffer: &TextBuffer, event: &TextContentChanged) -> Result<()> {
    let Some(state) = buffer.projection_state() else {
        return Ok(());
    };

    if !buffer.source_buffers().iter().all(is_settled) {
        log::trace!(
            "Projection buffer {} waits for its sources to follow buffer {}",
            buffer.id(),
            event.after.buffer_id()
        );
        return Ok(());
    }

    let (before, after, changes) = {
        let mut state = state.lock();
        let before = buffer.current_snapshot();
        let Some(old_map) = before.projection() else {
            return Ok(());
        };

        let mut spans = old_map.source_spans().to_vec();
        let mut pending = vec![];
        let mut stale = false;

        for (index, entry) in state.entries.iter().enumerate() {
            let (SourceEntry::Tracking { buffer: source, span: tracking }, SourceSpan::Buffer(old)) =
                (entry, &spans[index])
            else {
                continue;
            };

            let current = source.current_snapshot();
            if old.snapshot.is_same(&current) {
                continue;
            }

            stale = true;
            let new = tracking.span(&current)?;
            let composite_start = old_map.composite_span(index).start;
            let changes = changes_between(&old.snapshot, &current)
                .filter(|_| tracking.mode() != SpanTrackingMode::Custom);
            entry_changes(
                &mut pending,
                composite_start,
                old.span,
                &new,
                changes.as_ref(),
            )?;
            spans[index] = SourceSpan::Buffer(new);
        }

        if !stale {
            return Ok(());
        }

        if let Some(source) = state.elision_source.clone() {
            let current = source.current_snapshot();
            if let Some(merged) = elision::merge_visible(&source, &current, &spans)? {
                if merged.overlapped {
                    let text = ProjectionMap::new(merged.spans.clone(), false).rope().to_string();
                    pending = vec![PendingChange {
                        span: Span::new(0, before.length()),
                        text: text.into(),
                        master_offset: 0,
                    }];
                }
                state.entries = merged.entries;
                spans = merged.spans;
            }
        }

        let map = ProjectionMap::new(spans, state.options.writable_literal_spans);
        let changes = ChangeSet::normalize(before.rope(), pending)?;
        let text = map.rope();
        let (before, after) =
            buffer.commit(&before, changes.clone(), text, Some(Arc::new(map)), None)?;
        (before, after, changes)
    };

    log::debug!(
        "Projection buffer {} followed source {} to version {}",
        buffer.id(),
        event.after.buffer_id(),
        after.version_number()
    );
    buffer.notify_changed(&TextContentChanged {
        before,
        after,
        changes,
    });
    Ok(())
}

/// Composite changes of one entry whose source span moved from `old` to
/// `new`. Source changes are clipped to the entry. Without source changes,
/// or if clipping does not add up, the entry is replaced as a whole.
fn entry_changes(
    pending: &mut Vec<PendingChange>,
    composite_start: usize,
    old: Span,
    new: &SnapshotSpan,
    changes: Option<&ChangeSet>,
) -> Result<()> {
    let to_composite = |pos: usize| composite_start + pos - old.start;
    let mut pieces = vec![];
    let mut clipped = false;

    if let Some(changes) = changes {
        let mut delta = 0isize;
        for change in changes.iter() {
            let old_part = Span {
                start: change.old_position().max(old.start),
                end: change.old_end().min(old.end),
            };
            let new_part = Span {
                start: change.new_position().max(new.span.start),
                end: change.new_end().min(new.span.end),
            };
            let old_valid = old_part.start < old_part.end;
            let new_valid = new_part.start < new_part.end;
            if !old_valid && !new_valid {
                continue;
            }

            let span = if old_valid {
                Span::new(to_composite(old_part.start), to_composite(old_part.end))
            } else {
                let at = change.old_position().clamp(old.start, old.end);
                Span::empty(to_composite(at))
            };
            let text = if new_valid {
                new.snapshot.text_in(new_part)?
            } else {
                String::new()
            };

            delta += text.chars().count() as isize - span.len() as isize;
            pieces.push((span, text));
        }

        clipped = old.len() as isize + delta == new.span.len() as isize;
    }

    if !clipped {
        pieces.clear();
        if old.len() + new.span.len() != 0 {
            let text = new.snapshot.text_in(new.span)?;
            pieces.push((Span::from_len(composite_start, old.len()), text));
        }
    }

    for (span, text) in pieces {
        let master_offset = pending.len();
        pending.push(PendingChange {
            span,
            text: text.into(),
            master_offset,
        });
    }
    Ok(())
}

/// Adding spans of `source` to `target` would make `target` project itself
fn check_cycle(target: BufferId, source: &TextBuffer) -> Result<()> {
    let mut visited = FxHashSet::default();
    let mut stack = vec![source.clone()];
    while let Some(buffer) = stack.pop() {
        if buffer.id() == target {
            return Err(Error::CycleDetected {
                buffer: source.id(),
            });
        }
        if visited.insert(buffer.id()) {
            stack.extend(buffer.source_buffers());
        }
    }
    Ok(())
}

/// Reject source ranges projected more than once. Touching spans are
/// rejected too if both would take text inserted at the seam, unless the
/// options allow it.
fn check_duplicates(
    entries: &[SourceEntry],
    spans: &[SourceSpan],
    options: ProjectionOptions,
) -> Result<()> {
    let mut by_buffer: FxHashMap<BufferId, Vec<(Span, (PointTrackingMode, PointTrackingMode))>> =
        FxHashMap::default();
    for (entry, span) in entries.iter().zip(spans) {
        let (SourceSpan::Buffer(span), Some(modes)) = (span, entry.edge_modes()) else {
            continue;
        };
        by_buffer
            .entry(span.snapshot.buffer_id())
            .or_default()
            .push((span.span, modes));
    }

    for (buffer, mut spans) in by_buffer {
        spans.sort_by_key(|(span, _)| *span);
        for (i, (a, (_, a_end))) in spans.iter().enumerate() {
            for (b, (b_start, _)) in spans[i + 1..].iter() {
                if b.start > a.end {
                    break;
                }

                let duplicate = a == b || a.overlaps(b);
                let seam = a.end == b.start
                    && *a_end == PointTrackingMode::Positive
                    && *b_start == PointTrackingMode::Negative;
                if duplicate || (seam && !options.permissive_edge_inclusive_source_spans) {
                    return Err(Error::DuplicateProjection { buffer, span: *b });
                }
            }
        }
    }
    Ok(())
}

/// Handle to a buffer composed from spans of other buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionBuffer {
    buffer: TextBuffer,
}

impl ProjectionBuffer {
    pub(crate) fn create(
        entries: Vec<SourceEntry>,
        options: ProjectionOptions,
        content_type: ContentType,
        config: Arc<EngineConfig>,
    ) -> Result<ProjectionBuffer> {
        let spans = entries
            .iter()
            .map(|entry| entry.resolve(None))
            .collect::<Result<Vec<SourceSpan>>>()?;
        check_duplicates(&entries, &spans, options)?;

        let map = ProjectionMap::new(spans, options.writable_literal_spans);
        let text = map.rope();
        let state = ProjectionState {
            entries,
            options,
            sources: vec![],
            elision_source: None,
        };
        let buffer = TextBuffer::new(
            BufferKind::Projection,
            text,
            content_type,
            config,
            Some((state, Arc::new(map))),
        );
        attach(&buffer);
        Ok(ProjectionBuffer { buffer })
    }

    pub(crate) fn from_buffer(buffer: TextBuffer) -> ProjectionBuffer {
        debug_assert_eq!(BufferKind::Projection, buffer.kind());
        ProjectionBuffer { buffer }
    }

    pub fn buffer(&self) -> &TextBuffer {
        &self.buffer
    }

    pub fn options(&self) -> ProjectionOptions {
        self.with_state(|state| state.options)
    }

    pub fn entries(&self) -> Vec<SourceEntry> {
        self.with_state(|state| state.entries.clone())
    }

    pub fn span_count(&self) -> usize {
        self.with_state(|state| state.entries.len())
    }

    /// Source spans of the current snapshot
    pub fn source_spans(&self) -> Vec<SourceSpan> {
        self.buffer
            .current_snapshot()
            .projection()
            .map(|map| map.source_spans().to_vec())
            .unwrap_or_default()
    }

    pub fn insert_spans(
        &self,
        index: usize,
        entries: impl IntoIterator<Item = SourceEntry>,
    ) -> Result<Snapshot> {
        self.replace_spans(index, 0, entries)
    }

    pub fn delete_spans(&self, index: usize, count: usize) -> Result<Snapshot> {
        self.replace_spans(index, count, [])
    }

    /// Replace `count` entries starting at `index` with `entries`. The span
    /// list is left as it was if any check fails.
    pub fn replace_spans(
        &self,
        index: usize,
        count: usize,
        entries: impl IntoIterator<Item = SourceEntry>,
    ) -> Result<Snapshot> {
        let entries: Vec<SourceEntry> = entries.into_iter().collect();
        replace_entries(&self.buffer, index, count, entries)
    }

    fn with_state<T>(&self, f: impl FnOnce(&ProjectionState) -> T) -> T {
        let state = self
            .buffer
            .projection_state()
            .map(|state| state.lock());
        match state {
            Some(state) => f(&state),
            None => unreachable!("Projection buffer {} has no span list", self.buffer.id()),
        }
    }
}

impl Deref for ProjectionBuffer {
    type Target = TextBuffer;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

/// Subscribe a freshly created buffer to its sources
fn attach(buffer: &TextBuffer) {
    if let Some(state) = buffer.projection_state() {
        state.lock().sync_sources(buffer);
    }
}

/// Shared span list edit of projection and elision buffers
fn replace_entries(
    buffer: &TextBuffer,
    index: usize,
    count: usize,
    entries: Vec<SourceEntry>,
) -> Result<Snapshot> {
    let _guard = buffer.begin_edit()?;
    let Some(state) = buffer.projection_state() else {
        return Err(Error::NoSpanList { buffer: buffer.id() });
    };

    for source in entries.iter().filter_map(SourceEntry::source_buffer) {
        check_cycle(buffer.id(), source)?;
    }

    let (before, after, changes, added, removed) = {
        let mut state = state.lock();
        let len = state.entries.len();
        if index > len {
            return Err(Error::InvalidSpanIndex { index, count: len });
        }
        if index + count > len {
            return Err(Error::InvalidSpanIndex {
                index: index + count,
                count: len,
            });
        }

        let before = buffer.current_snapshot();
        let Some(old_map) = before.projection() else {
            return Err(Error::NoSpanList { buffer: buffer.id() });
        };

        let inserted = entries
            .iter()
            .map(|entry| entry.resolve(None))
            .collect::<Result<Vec<SourceSpan>>>()?;

        let mut spans = old_map.source_spans().to_vec();
        spans
            .splice(index..index + count, inserted.iter().cloned())
            .for_each(drop);

        let mut all_entries = state.entries.clone();
        all_entries
            .splice(index..index + count, entries.iter().cloned())
            .for_each(drop);

        if state.elision_source.is_none() {
            check_duplicates(&all_entries, &spans, state.options)?;
        }

        let replaced = Span::new(old_map.span_start(index), old_map.span_start(index + count));
        let text = ProjectionMap::new(inserted, false).rope().to_string();
        let pending = vec![PendingChange {
            span: replaced,
            text: text.into(),
            master_offset: 0,
        }];

        let changes = ChangeSet::normalize(before.rope(), pending)?;
        let map = ProjectionMap::new(spans, state.options.writable_literal_spans);
        let rope = map.rope();
        let (before, after) =
            buffer.commit(&before, changes.clone(), rope, Some(Arc::new(map)), None)?;

        state.entries = all_entries;
        let (added, removed) = state.sync_sources(buffer);
        (before, after, changes, added, removed)
    };

    log::debug!(
        "Projection buffer {} replaced {count} spans at {index} with {}, version {}",
        buffer.id(),
        entries.len(),
        after.version_number()
    );
    buffer.notify_changed(&TextContentChanged {
        before: before.clone(),
        after: after.clone(),
        changes,
    });

    if !added.is_empty() || !removed.is_empty() {
        buffer.notify_sources_changed(&SourceBuffersChanged {
            before,
            after: after.clone(),
            added,
            removed,
        });
    }
    Ok(after)
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::TextBufferFactory;

    fn entry(buffer: &TextBuffer, start: usize, end: usize) -> SourceEntry {
        SourceEntry::span(buffer, Span::new(start, end), SpanTrackingMode::EdgeExclusive).unwrap()
    }

    fn inclusive(buffer: &TextBuffer, start: usize, end: usize) -> SourceEntry {
        SourceEntry::span(buffer, Span::new(start, end), SpanTrackingMode::EdgeInclusive).unwrap()
    }

    fn record_texts(buffer: &TextBuffer) -> Arc<parking_lot::Mutex<Vec<String>>> {
        let texts = Arc::new(parking_lot::Mutex::new(vec![]));
        let t = texts.clone();
        buffer.on_changed(move |ev| t.lock().push(ev.after.text()));
        texts
    }

    #[test]
    fn composes_sources_and_literals() {
        let factory = TextBufferFactory::default();
        let a = factory.create_buffer("hello world");
        let b = factory.create_buffer("fn main");
        let proj = factory
            .create_projection_buffer([entry(&a, 0, 5), SourceEntry::literal(" "), entry(&b, 0, 2)])
            .unwrap();

        assert_eq!("hello fn", proj.current_snapshot().text());
        assert_eq!(vec![a.clone(), b.clone()], proj.source_buffers());
        assert_eq!(3, proj.span_count());
    }

    #[test]
    fn follows_source_edits() {
        let factory = TextBufferFactory::default();
        let a = factory.create_buffer("abcdef");
        let proj = factory
            .create_projection_buffer([entry(&a, 1, 3), SourceEntry::literal("|"), entry(&a, 4, 6)])
            .unwrap();
        assert_eq!("bc|ef", proj.current_snapshot().text());

        let changes = Arc::new(parking_lot::Mutex::new(None));
        let c = changes.clone();
        proj.on_changed(move |ev| *c.lock() = Some(ev.changes.clone()));

        // Both edges of the replaced text fall inside the projected spans
        a.replace(Span::new(2, 5), "XY").unwrap();
        let snap = proj.current_snapshot();
        assert_eq!("abXYf", a.current_snapshot().text());
        assert_eq!("b|f", snap.text());
        assert_eq!(1, snap.version_number());

        let changes = changes.lock().clone().unwrap();
        assert_eq!(2, changes.len());
        assert_eq!(Span::new(1, 2), changes.as_slice()[0].old_span());
        assert_eq!("c", changes.as_slice()[0].old_text());
        assert!(changes.as_slice()[0].is_remove());
        assert_eq!(Span::new(3, 4), changes.as_slice()[1].old_span());
        assert_eq!("e", changes.as_slice()[1].old_text());

        a.insert(2, "-").unwrap();
        assert_eq!("b|f", proj.current_snapshot().text());
        a.insert(1, "+").unwrap();
        assert_eq!("b|f", proj.current_snapshot().text());
        assert_eq!(3, proj.current_snapshot().version_number());
        assert_eq!(1, proj.current_snapshot().version().reiterated_number());
    }

    #[test]
    fn edge_insertions_follow_tracking_mode() {
        let factory = TextBufferFactory::default();
        let a = factory.create_buffer("abcd");
        let inclusive =
            SourceEntry::span(&a, Span::new(1, 3), SpanTrackingMode::EdgeInclusive).unwrap();
        let proj = factory.create_projection_buffer([inclusive]).unwrap();
        a.insert(1, "<").unwrap();
        a.insert(4, ">").unwrap();
        assert_eq!("<bc>", proj.current_snapshot().text());

        let exclusive = factory.create_projection_buffer([entry(&a, 1, 5)]).unwrap();
        a.insert(1, "[").unwrap();
        assert_eq!("<bc>", exclusive.current_snapshot().text());
    }

    #[test]
    fn span_list_edits() {
        let factory = TextBufferFactory::default();
        let a = factory.create_buffer("abcdef");
        let proj = factory.create_projection_buffer([entry(&a, 0, 2)]).unwrap();

        proj.insert_spans(1, [SourceEntry::literal("-"), entry(&a, 4, 6)])
            .unwrap();
        assert_eq!("ab-ef", proj.current_snapshot().text());

        proj.replace_spans(0, 2, [entry(&a, 2, 3)]).unwrap();
        assert_eq!("cef", proj.current_snapshot().text());

        let snap = proj.delete_spans(1, 1).unwrap();
        assert_eq!("c", snap.text());
        assert_eq!(3, snap.version_number());
        assert_eq!(
            Error::InvalidSpanIndex { index: 2, count: 1 },
            proj.delete_spans(1, 1).unwrap_err()
        );
    }

    #[test]
    fn duplicates_rejected() {
        let factory = TextBufferFactory::default();
        let a = factory.create_buffer("abcdef");
        let proj = factory.create_projection_buffer([entry(&a, 1, 3)]).unwrap();

        let err = proj.insert_spans(1, [entry(&a, 1, 3)]).unwrap_err();
        assert!(matches!(err, Error::DuplicateProjection { .. }));
        let err = proj.insert_spans(0, [entry(&a, 2, 4)]).unwrap_err();
        assert!(matches!(err, Error::DuplicateProjection { .. }));
        assert_eq!(1, proj.span_count());
        assert_eq!("bc", proj.current_snapshot().text());
        assert_eq!(0, proj.current_snapshot().version_number());

        proj.insert_spans(1, [entry(&a, 3, 5)]).unwrap();
        assert_eq!("bcde", proj.current_snapshot().text());
    }

    #[test]
    fn touching_inclusive_spans() {
        let factory = TextBufferFactory::default();
        let a = factory.create_buffer("abcdef");
        let spans = || {
            [
                SourceEntry::span(&a, Span::new(0, 2), SpanTrackingMode::EdgeInclusive).unwrap(),
                SourceEntry::span(&a, Span::new(2, 4), SpanTrackingMode::EdgeInclusive).unwrap(),
            ]
        };
        assert!(factory.create_projection_buffer(spans()).is_err());

        let options = ProjectionOptions {
            permissive_edge_inclusive_source_spans: true,
            ..Default::default()
        };
        let proj = factory
            .create_projection_buffer_with(spans(), options, factory.default_content_type().clone())
            .unwrap();
        a.insert(2, "x").unwrap();
        assert_eq!("abxxcd", proj.current_snapshot().text());
    }

    #[test]
    fn cycles_rejected() {
        let factory = TextBufferFactory::default();
        let text = factory.create_buffer("abc");
        let a = factory.create_projection_buffer([entry(&text, 0, 1)]).unwrap();
        let b = factory
            .create_projection_buffer([entry(a.buffer(), 0, 1)])
            .unwrap();

        let err = a.insert_spans(1, [entry(b.buffer(), 0, 1)]).unwrap_err();
        assert_eq!(Error::CycleDetected { buffer: b.id() }, err);
        let err = a.insert_spans(1, [entry(a.buffer(), 0, 1)]).unwrap_err();
        assert_eq!(Error::CycleDetected { buffer: a.id() }, err);
        assert_eq!("a", a.current_snapshot().text());
        assert_eq!(0, a.current_snapshot().version_number());
    }

    #[test]
    fn source_buffers_changed_event() {
        let factory = TextBufferFactory::default();
        let a = factory.create_buffer("abc");
        let b = factory.create_buffer("xyz");
        let proj = factory.create_projection_buffer([entry(&a, 0, 1)]).unwrap();

        let events = Arc::new(parking_lot::Mutex::new(vec![]));
        let e = events.clone();
        proj.on_source_buffers_changed(move |ev| e.lock().push((ev.added.clone(), ev.removed.clone())));

        proj.insert_spans(1, [entry(&b, 0, 1)]).unwrap();
        proj.insert_spans(2, [entry(&b, 2, 3)]).unwrap();
        proj.delete_spans(0, 1).unwrap();
        assert_eq!(
            vec![(vec![b.id()], vec![]), (vec![], vec![a.id()])],
            *events.lock()
        );
    }

    #[test]
    fn dropping_projection_unsubscribes() {
        let factory = TextBufferFactory::default();
        let a = factory.create_buffer("abc");
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        a.on_changed(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });

        let proj = factory.create_projection_buffer([entry(&a, 0, 1)]).unwrap();
        drop(proj);
        a.insert(0, "x").unwrap();
        assert_eq!(1, count.load(Ordering::Relaxed));
        assert_eq!(1, a.changed_subscriber_count());
    }

    #[test]
    fn typing_at_seam_lands_in_writable_source() {
        let factory = TextBufferFactory::default();
        let a = factory.create_buffer("abc");
        let proj = factory
            .create_projection_buffer([SourceEntry::literal("> "), inclusive(&a, 0, 3)])
            .unwrap();

        let snap = proj.insert(2, "X").unwrap();
        assert_eq!("Xabc", a.current_snapshot().text());
        assert_eq!("> Xabc", snap.text());
        assert_eq!(1, snap.version_number());

        // Literals are not writable by default
        assert_eq!(
            Error::ReadOnly {
                span: Span::new(0, 1)
            },
            proj.replace(Span::new(0, 1), "<").unwrap_err()
        );
        assert!(!proj.is_edit_in_progress());
        assert_eq!("> Xabc", proj.current_snapshot().text());
    }

    #[test]
    fn writable_literals_edited_in_place() {
        let factory = TextBufferFactory::default();
        let a = factory.create_buffer("abc");
        let options = ProjectionOptions {
            writable_literal_spans: true,
            ..Default::default()
        };
        let proj = factory
            .create_projection_buffer_with(
                [SourceEntry::literal("> "), inclusive(&a, 0, 3)],
                options,
                factory.default_content_type().clone(),
            )
            .unwrap();

        let snap = proj.insert(2, "X").unwrap();
        assert_eq!("abc", a.current_snapshot().text());
        assert_eq!("> Xabc", snap.text());
        assert_eq!(1, snap.version_number());
        match &proj.entries()[0] {
            SourceEntry::Literal(text) => assert_eq!("> X", text.as_ref()),
            other => panic!("expected a literal, got {other:?}"),
        }

        // The replacement covers the literal and the source
        let snap = proj.replace(Span::new(1, 4), "-").unwrap();
        assert_eq!("bc", a.current_snapshot().text());
        assert_eq!(">-bc", snap.text());
        assert_eq!(3, snap.version_number());
    }

    #[test]
    fn one_edit_per_source() {
        let factory = TextBufferFactory::default();
        let a = factory.create_buffer("abc");
        let b = factory.create_buffer("xyz");
        let proj = factory
            .create_projection_buffer([
                inclusive(&a, 0, 3),
                SourceEntry::literal("|"),
                inclusive(&b, 0, 3),
            ])
            .unwrap();
        b.add_read_only_region(Span::new(0, 1), crate::ReadOnlyEdge::Exclusive)
            .unwrap();

        let mut edit = proj.create_edit().unwrap();
        edit.delete(Span::new(2, 3)).unwrap();
        edit.replace(Span::new(4, 5), "X").unwrap();
        assert_eq!(
            Error::ReadOnly {
                span: Span::new(0, 1)
            },
            edit.apply().unwrap_err()
        );
        assert_eq!("abc", a.current_snapshot().text());
        assert_eq!("abc|xyz", proj.current_snapshot().text());
        assert!(!a.is_edit_in_progress());

        let versions = (a.current_snapshot().version_number(), b.current_snapshot().version_number());
        let mut edit = proj.create_edit().unwrap();
        edit.delete(Span::new(2, 3)).unwrap();
        edit.insert(5, "-").unwrap();
        edit.insert(7, "!").unwrap();
        let snap = edit.apply().unwrap();
        assert_eq!("ab|x-yz!", snap.text());
        assert_eq!(versions.0 + 1, a.current_snapshot().version_number());
        assert_eq!(versions.1 + 1, b.current_snapshot().version_number());
        assert_eq!("x-yz!", b.current_snapshot().text());
    }

    #[test]
    fn source_reached_twice_gives_one_version() {
        let factory = TextBufferFactory::default();
        let s = factory.create_buffer("abc");
        let p = factory.create_projection_buffer([inclusive(&s, 0, 3)]).unwrap();
        let top = factory
            .create_projection_buffer([
                inclusive(p.buffer(), 0, 3),
                SourceEntry::literal("|"),
                inclusive(&s, 0, 3),
            ])
            .unwrap();
        let texts = record_texts(top.buffer());

        s.insert(0, "X").unwrap();
        assert_eq!(vec!["Xabc|Xabc".to_string()], *texts.lock());
        let snap = top.current_snapshot();
        assert_eq!(1, snap.version_number());
        assert_eq!(2, snap.version().changes().len());
    }

    #[test]
    fn direct_subscription_waits_for_nested_projection() {
        let factory = TextBufferFactory::default();
        let s = factory.create_buffer("abc");
        let t = factory.create_buffer("t");
        let p = factory.create_projection_buffer([inclusive(&t, 0, 1)]).unwrap();
        let top = factory
            .create_projection_buffer([
                inclusive(p.buffer(), 0, 1),
                SourceEntry::literal("|"),
                inclusive(&s, 0, 3),
            ])
            .unwrap();

        // The top buffer is notified by the source before the nested one
        p.replace_spans(0, 1, [inclusive(&s, 0, 3)]).unwrap();
        assert_eq!("abc|abc", top.current_snapshot().text());
        let texts = record_texts(top.buffer());

        s.insert(0, "X").unwrap();
        assert_eq!(vec!["Xabc|Xabc".to_string()], *texts.lock());
        assert_eq!("Xabc", p.current_snapshot().text());
    }

    #[test]
    fn content_type_change_below_does_not_block() {
        let factory = TextBufferFactory::default();
        let code = factory.registry().add("code", &[]).unwrap();
        let s = factory.create_buffer("abc");
        let t = factory.create_buffer("t");
        let p = factory.create_projection_buffer([inclusive(&s, 0, 3)]).unwrap();
        let top = factory
            .create_projection_buffer([
                inclusive(p.buffer(), 0, 3),
                SourceEntry::literal("|"),
                inclusive(&t, 0, 1),
            ])
            .unwrap();

        s.change_content_type(code).unwrap();
        t.insert(1, "!").unwrap();
        assert_eq!("abc|t!", top.current_snapshot().text());
    }

    struct Runaway;

    impl crate::TrackingBehavior for Runaway {
        fn track(&self, span: Span, _: &ChangeSet, _: crate::TrackingDirection) -> Span {
            Span::new(span.start, span.end + 100)
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "out of sync with its sources")]
    fn failing_to_follow_source_panics_in_debug() {
        let factory = TextBufferFactory::default();
        let a = factory.create_buffer("abc");
        let span = a
            .current_snapshot()
            .create_custom_tracking_span(
                Span::new(0, 3),
                Arc::new(Runaway),
                crate::TrackingFidelity::Forward,
            )
            .unwrap();
        let _proj = factory
            .create_projection_buffer([SourceEntry::tracking(&a, span).unwrap()])
            .unwrap();
        a.insert(0, "x").unwrap();
    }
}
