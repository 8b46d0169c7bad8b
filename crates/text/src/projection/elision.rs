use std::{ops::Deref, ops::Range, sync::Arc};

use strata_utils::ranges::RangeSet;

use crate::{
    change::PendingChange, events::TextContentChanged, BufferKind, ChangeSet, ContentType,
    EngineConfig, Error, ProjectionOptions, Result, Snapshot, SnapshotSpan, Span,
    SpanTrackingMode, TextBuffer,
};

use super::{attach, translate_span, ProjectionMap, ProjectionState, SourceEntry, SourceSpan};

/// Handle to a buffer showing a subset of a single source buffer.
///
/// The visible parts are edge inclusive spans of the source, so text typed
/// at the border of a hidden region shows up while text inserted strictly
/// inside it stays hidden until the region is expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElisionBuffer {
    buffer: TextBuffer,
}

impl ElisionBuffer {
    pub(crate) fn create(
        source: &TextBuffer,
        exposed: Vec<SnapshotSpan>,
        content_type: ContentType,
        config: Arc<EngineConfig>,
    ) -> Result<ElisionBuffer> {
        let snapshot = source.current_snapshot();
        let mut visible = RangeSet::new();
        for span in &exposed {
            visible.add(source_range(source, &snapshot, span)?);
        }

        let entries = visible_entries(source, &snapshot, &visible)?;
        let spans = resolve(&entries, &snapshot)?;
        let map = ProjectionMap::new(spans, false);
        let text = map.rope();
        let state = ProjectionState {
            entries,
            options: ProjectionOptions::default(),
            sources: vec![],
            elision_source: Some(source.clone()),
        };

        let buffer = TextBuffer::new(
            BufferKind::Elision,
            text,
            content_type,
            config,
            Some((state, Arc::new(map))),
        );
        attach(&buffer);
        Ok(ElisionBuffer { buffer })
    }

    pub(crate) fn from_buffer(buffer: TextBuffer) -> ElisionBuffer {
        debug_assert_eq!(BufferKind::Elision, buffer.kind());
        ElisionBuffer { buffer }
    }

    pub fn buffer(&self) -> &TextBuffer {
        &self.buffer
    }

    pub fn source_buffer(&self) -> TextBuffer {
        let state = self.buffer.projection_state().map(|state| state.lock());
        match state.as_ref().and_then(|state| state.elision_source.clone()) {
            Some(source) => source,
            None => unreachable!("Elision buffer {} has no source", self.buffer.id()),
        }
    }

    /// Visible source spans of the current snapshot
    pub fn visible_spans(&self) -> Vec<SnapshotSpan> {
        let snapshot = self.buffer.current_snapshot();
        let Some(map) = snapshot.projection() else {
            return vec![];
        };

        map.source_spans()
            .iter()
            .filter_map(|span| match span {
                SourceSpan::Buffer(span) => Some(span.clone()),
                SourceSpan::Literal(_) => None,
            })
            .collect()
    }

    /// Hide the given source spans
    pub fn elide_spans(&self, spans: impl IntoIterator<Item = SnapshotSpan>) -> Result<Snapshot> {
        self.modify_spans(spans, [])
    }

    /// Show the given source spans, clipped to the source
    pub fn expand_spans(&self, spans: impl IntoIterator<Item = SnapshotSpan>) -> Result<Snapshot> {
        self.modify_spans([], spans)
    }

    /// Hide `elide` and then show `expand` as one version and one
    /// notification.
    pub fn modify_spans(
        &self,
        elide: impl IntoIterator<Item = SnapshotSpan>,
        expand: impl IntoIterator<Item = SnapshotSpan>,
    ) -> Result<Snapshot> {
        let buffer = &self.buffer;
        let _guard = buffer.begin_edit()?;
        let source = self.source_buffer();
        let Some(state) = buffer.projection_state() else {
            return Err(Error::NoSpanList { buffer: buffer.id() });
        };

        let (before, after, changes) = {
            let mut state = state.lock();
            let before = buffer.current_snapshot();
            let snapshot = source.current_snapshot();

            let mut old = RangeSet::new();
            for span in before.projection().map(ProjectionMap::source_spans).unwrap_or_default() {
                let SourceSpan::Buffer(span) = span else {
                    continue;
                };
                if let Some(span) = translate_span(span, &snapshot, SpanTrackingMode::EdgeInclusive)
                {
                    old.add(span.start..span.end);
                }
            }

            let mut new = old.clone();
            for span in elide {
                new.remove(source_range(&source, &snapshot, &span)?);
            }
            for span in expand {
                new.add(source_range(&source, &snapshot, &span)?);
            }

            let pending = elision_changes(&old, &new, &snapshot)?;
            let changes = ChangeSet::normalize(before.rope(), pending)?;
            let entries = visible_entries(&source, &snapshot, &new)?;
            let spans = resolve(&entries, &snapshot)?;
            let map = ProjectionMap::new(spans, false);
            let text = map.rope();
            let (before, after) =
                buffer.commit(&before, changes.clone(), text, Some(Arc::new(map)), None)?;
            state.entries = entries;
            (before, after, changes)
        };

        log::debug!(
            "Elision buffer {} modified, {} changes, version {}",
            buffer.id(),
            changes.len(),
            after.version_number()
        );
        buffer.notify_changed(&TextContentChanged {
            before,
            after: after.clone(),
            changes,
        });
        Ok(after)
    }
}

impl Deref for ElisionBuffer {
    type Target = TextBuffer;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

/// `span` as a range of the source's current snapshot
fn source_range(source: &TextBuffer, current: &Snapshot, span: &SnapshotSpan) -> Result<Range<usize>> {
    let found = span.snapshot.buffer_id();
    if found != source.id() {
        return Err(Error::MultipleSources {
            expected: source.id(),
            found,
        });
    }

    let span = if span.snapshot.is_same(current) {
        span.span
    } else {
        span.translate_to(current, SpanTrackingMode::EdgeInclusive)?.span
    };
    Ok(span.start..span.end.min(current.length()))
}

fn visible_entries(
    source: &TextBuffer,
    snapshot: &Snapshot,
    visible: &RangeSet<usize>,
) -> Result<Vec<SourceEntry>> {
    let fidelity = source.config().tracking.default_fidelity;
    visible
        .iter()
        .map(|range| {
            let span =
                snapshot.create_tracking_span(range.into(), SpanTrackingMode::EdgeInclusive, fidelity)?;
            Ok(SourceEntry::Tracking {
                buffer: source.clone(),
                span,
            })
        })
        .collect()
}

fn resolve(entries: &[SourceEntry], snapshot: &Snapshot) -> Result<Vec<SourceSpan>> {
    entries
        .iter()
        .map(|entry| entry.resolve(Some(snapshot)))
        .collect()
}

pub(super) struct MergedVisible {
    pub(super) entries: Vec<SourceEntry>,
    pub(super) spans: Vec<SourceSpan>,
    /// Some source text was visible twice
    pub(super) overlapped: bool,
}

/// Merge visible spans that a source edit made touch or overlap, so that
/// text inserted at their seam is shown once. `None` if all spans are still
/// apart.
pub(super) fn merge_visible(
    source: &TextBuffer,
    snapshot: &Snapshot,
    spans: &[SourceSpan],
) -> Result<Option<MergedVisible>> {
    let visible: Vec<Span> = spans
        .iter()
        .filter_map(|span| match span {
            SourceSpan::Buffer(span) => Some(span.span),
            SourceSpan::Literal(_) => None,
        })
        .collect();

    let touching = visible.windows(2).any(|pair| pair[1].start <= pair[0].end);
    if !touching {
        return Ok(None);
    }

    let overlapped = visible.windows(2).any(|pair| pair[1].start < pair[0].end);
    let merged: RangeSet<usize> = visible.iter().map(Range::from).collect();
    let entries = visible_entries(source, snapshot, &merged)?;
    let spans = resolve(&entries, snapshot)?;

    log::debug!(
        "Merged {} visible spans of source {} into {}",
        visible.len(),
        source.id(),
        spans.len()
    );
    Ok(Some(MergedVisible {
        entries,
        spans,
        overlapped,
    }))
}

/// Number of visible chars before `pos`
fn visible_before(visible: &RangeSet<usize>, pos: usize) -> usize {
    visible
        .iter()
        .map(|range| range.end.min(pos).saturating_sub(range.start))
        .sum()
}

/// Composite changes turning the `old` visible set into `new`. Hidden
/// ranges become deletions and revealed ranges insertions.
fn elision_changes(
    old: &RangeSet<usize>,
    new: &RangeSet<usize>,
    source: &Snapshot,
) -> Result<Vec<PendingChange>> {
    let mut hidden = old.clone();
    for range in new.iter() {
        hidden.remove(range);
    }
    let mut shown = new.clone();
    for range in old.iter() {
        shown.remove(range);
    }

    let mut edits: Vec<(Range<usize>, bool)> = hidden
        .iter()
        .map(|range| (range, false))
        .chain(shown.iter().map(|range| (range, true)))
        .collect();
    edits.sort_by_key(|(range, _)| range.start);

    let mut pending = Vec::with_capacity(edits.len());
    for (range, show) in edits {
        let at = visible_before(old, range.start);
        let (span, text) = if show {
            (Span::empty(at), source.text_in(range.into())?)
        } else {
            (Span::from_len(at, range.len()), String::new())
        };
        let master_offset = pending.len();
        pending.push(PendingChange {
            span,
            text: text.into(),
            master_offset,
        });
    }
    Ok(pending)
}
