use std::sync::Arc;

use ropey::Rope;

use crate::{
    change::PendingChange, events::TextContentChanged, ChangeSet, Error, InsertionPointPolicy,
    Result, Snapshot, SnapshotSpan, Span, SpanTrackingMode, TextBuffer, TextEdit,
};

use super::{ProjectionMap, SourceEntry, SourceSpan};

/// A change of composite text mapped into one of the spans it touches
#[derive(Debug, Clone)]
pub(crate) enum ProjectedChange {
    Source {
        span: SnapshotSpan,
        text: Arc<str>,
    },
    /// `span` is relative to the start of literal `index`
    Literal {
        index: usize,
        span: Span,
        text: Arc<str>,
    },
}

/// Map a change of the composite text down into the spans it covers.
///
/// An insertion goes to the span `policy` picks among the candidates at its
/// position. A replacement takes every piece it covers and its text lands in
/// the first one. Literal pieces are refused unless literals are writable.
pub(crate) fn map_change(
    map: &ProjectionMap,
    span: Span,
    text: &Arc<str>,
    policy: &dyn InsertionPointPolicy,
) -> Result<Vec<ProjectedChange>> {
    if span.is_empty() {
        let candidates = map.candidates(span.start);
        let candidate = policy
            .choose(&candidates)
            .and_then(|i| candidates.get(i))
            .filter(|candidate| candidate.writable)
            .ok_or(Error::ReadOnly { span })?;

        let change = match &candidate.point {
            Some(point) => ProjectedChange::Source {
                span: SnapshotSpan::new(point.snapshot.clone(), Span::empty(point.position)),
                text: text.clone(),
            },
            None => ProjectedChange::Literal {
                index: candidate.index,
                span: Span::empty(span.start - map.span_start(candidate.index)),
                text: text.clone(),
            },
        };
        return Ok(vec![change]);
    }

    let mut result = vec![];
    for (index, source) in map.source_spans().iter().enumerate() {
        let composite = map.composite_span(index);
        let Some(piece) = span.overlap(&composite) else {
            continue;
        };

        let offset = piece.start - composite.start;
        let text: Arc<str> = if result.is_empty() {
            text.clone()
        } else {
            Arc::from("")
        };
        let change = match source {
            SourceSpan::Buffer(source) => ProjectedChange::Source {
                span: SnapshotSpan::new(
                    source.snapshot.clone(),
                    Span::from_len(source.span.start + offset, piece.len()),
                ),
                text,
            },
            SourceSpan::Literal(_) if map.writable_literals() => ProjectedChange::Literal {
                index,
                span: Span::from_len(offset, piece.len()),
                text,
            },
            SourceSpan::Literal(_) => return Err(Error::ReadOnly { span }),
        };
        result.push(change);
    }
    Ok(result)
}

/// Apply the mapped changes of a composite edit.
///
/// Every source buffer gets one edit. All of them are opened and filled
/// before the first is applied, so a change refused by a source leaves every
/// buffer as it was. The composite buffer follows the source edits through
/// their notifications. Edited literals re-version it once more at the end.
pub(crate) fn apply_mapped(
    buffer: &TextBuffer,
    changes: Vec<ProjectedChange>,
) -> Result<Snapshot> {
    let sources = buffer.source_buffers();
    let mut edits: Vec<TextEdit> = vec![];
    let mut literals = vec![];

    for change in changes {
        let (span, text) = match change {
            ProjectedChange::Source { span, text } => (span, text),
            ProjectedChange::Literal { index, span, text } => {
                literals.push((index, span, text));
                continue;
            }
        };

        let id = span.snapshot.buffer_id();
        let position = match edits.iter().position(|e| e.snapshot().buffer_id() == id) {
            Some(position) => position,
            None => {
                let source = sources.iter().find(|s| s.id() == id).ok_or(
                    Error::ForeignVersion {
                        expected: buffer.id(),
                        found: id,
                    },
                )?;
                edits.push(source.create_edit()?);
                edits.len() - 1
            }
        };

        let edit = &mut edits[position];
        let target = span.translate_to(edit.snapshot(), SpanTrackingMode::EdgeExclusive)?;
        edit.replace(target.span, &text)?;
    }

    let count = edits.len();
    for edit in edits {
        edit.apply()?;
    }
    if !literals.is_empty() {
        edit_literals(buffer, literals)?;
    }

    log::debug!(
        "Edit of buffer {} mapped to {count} source buffers",
        buffer.id()
    );
    Ok(buffer.current_snapshot())
}

/// Replace text inside literal entries and re-version the composite buffer
fn edit_literals(buffer: &TextBuffer, literals: Vec<(usize, Span, Arc<str>)>) -> Result<()> {
    let Some(state) = buffer.projection_state() else {
        return Err(Error::NoSpanList { buffer: buffer.id() });
    };

    let (before, after, changes) = {
        let mut state = state.lock();
        let before = buffer.current_snapshot();
        let Some(map) = before.projection() else {
            return Err(Error::NoSpanList { buffer: buffer.id() });
        };

        let mut entries = state.entries.clone();
        let mut spans = map.source_spans().to_vec();
        let mut pending = Vec::with_capacity(literals.len());

        // Applied back to front so earlier offsets stay valid, insertions at
        // one position keep the order they were made in.
        let mut literals: Vec<(usize, usize, Span, Arc<str>)> = literals
            .into_iter()
            .enumerate()
            .map(|(order, (index, span, text))| (index, order, span, text))
            .collect();
        literals.sort_by_key(|(index, order, span, _)| {
            (*index, span.start, !span.is_empty(), *order)
        });

        for (index, order, span, text) in literals.iter().rev() {
            let count = entries.len();
            let Some(SourceEntry::Literal(old)) = entries.get(*index) else {
                return Err(Error::InvalidSpanIndex {
                    index: *index,
                    count,
                });
            };

            let mut literal = Rope::from_str(old);
            if span.end > literal.len_chars() {
                return Err(Error::SpanOutOfRange {
                    span: *span,
                    length: literal.len_chars(),
                });
            }
            literal.remove(span.start..span.end);
            literal.insert(span.start, text);

            let literal: Arc<str> = literal.to_string().into();
            entries[*index] = SourceEntry::Literal(literal.clone());
            spans[*index] = SourceSpan::Literal(literal);
            pending.push(PendingChange {
                span: Span::from_len(map.span_start(*index) + span.start, span.len()),
                text: text.clone(),
                master_offset: *order,
            });
        }

        let changes = ChangeSet::normalize(before.rope(), pending)?;
        let map = ProjectionMap::new(spans, state.options.writable_literal_spans);
        let text = map.rope();
        let (before, after) =
            buffer.commit(&before, changes.clone(), text, Some(Arc::new(map)), None)?;
        state.entries = entries;
        (before, after, changes)
    };

    log::debug!(
        "Buffer {} edited {} literal spans, version {}",
        buffer.id(),
        changes.len(),
        after.version_number()
    );
    buffer.notify_changed(&TextContentChanged {
        before,
        after,
        changes,
    });
    Ok(())
}
