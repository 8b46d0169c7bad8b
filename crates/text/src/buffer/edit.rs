use std::sync::Arc;

use crate::{
    change::PendingChange,
    events::TextContentChanged,
    projection::{apply_mapped, map_change, ProjectedChange},
    ChangeSet, Error, InsertionPointPolicy, NearestWritable, Result, Snapshot, Span, TextBuffer,
};

use super::read_only::{ReadOnlyEdge, ReadOnlyRegion};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditOptions {
    /// Declare that the produced version reiterates this earlier version,
    /// for example when undoing back to it. Projection and elision buffers
    /// ignore it, their versions follow the source edits.
    pub reiterated_version: Option<u64>,
}

/// An open edit on a buffer.
///
/// Changes are given in the coordinates of the snapshot the edit was
/// created on and are checked as they are added. Nothing is visible until
/// [`TextEdit::apply`], dropping the edit discards it.
///
/// On projection and elision buffers every change is mapped down as it is
/// added. Applying the edit edits the source buffers, and writable literal
/// spans in place.
pub struct TextEdit {
    buffer: TextBuffer,
    base: Snapshot,
    read_only: Vec<(Span, ReadOnlyEdge)>,
    pending: Vec<PendingChange>,
    projected: Vec<ProjectedChange>,
    policy: Arc<dyn InsertionPointPolicy>,
    options: EditOptions,
}

impl TextEdit {
    pub(super) fn new(
        buffer: TextBuffer,
        base: Snapshot,
        regions: Vec<ReadOnlyRegion>,
        options: EditOptions,
    ) -> Result<TextEdit> {
        // Constructing the edit first makes sure the flag is cleared on error
        let mut edit = TextEdit {
            buffer,
            base,
            read_only: Vec::with_capacity(regions.len()),
            pending: vec![],
            projected: vec![],
            policy: Arc::new(NearestWritable),
            options,
        };

        if let Some(reiterated) = options.reiterated_version {
            let current = edit.base.version_number();
            if reiterated > current {
                return Err(Error::OutOfRange {
                    position: reiterated as usize,
                    length: current as usize,
                });
            }
        }

        for region in &regions {
            let span = region.span_in(&edit.base)?;
            edit.read_only.push((span, region.edge()));
        }
        Ok(edit)
    }

    /// The snapshot this edit is made against
    pub fn snapshot(&self) -> &Snapshot {
        &self.base
    }

    pub fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Policy choosing the span an insertion on a seam of a projection
    /// lands in. Applies to changes added afterwards.
    pub fn set_insertion_point_policy(&mut self, policy: impl InsertionPointPolicy + 'static) {
        self.policy = Arc::new(policy);
    }

    pub fn insert(&mut self, pos: usize, text: &str) -> Result<()> {
        self.replace(Span::empty(pos), text)
    }

    pub fn delete(&mut self, span: Span) -> Result<()> {
        self.replace(span, "")
    }

    pub fn replace(&mut self, span: Span, text: &str) -> Result<()> {
        self.base.check_span(span)?;

        if self.is_read_only(span) {
            return Err(Error::ReadOnly { span });
        }

        for other in &self.pending {
            if overlaps(other.span, span) {
                return Err(Error::OverlappingEdits {
                    first: other.span,
                    second: span,
                });
            }
        }

        let text: Arc<str> = Arc::from(text);
        if let Some(map) = self.base.projection() {
            let mapped = map_change(map, span, &text, self.policy.as_ref())?;
            self.projected.extend(mapped);
        }

        let master_offset = self.pending.len();
        self.pending.push(PendingChange {
            span,
            text,
            master_offset,
        });
        Ok(())
    }

    /// Whether a change of `span` would touch a read only region
    pub fn is_read_only(&self, span: Span) -> bool {
        self.read_only
            .iter()
            .any(|(region, edge)| blocks(*region, *edge, span))
    }

    /// Normalize the changes, append the new version and notify observers.
    /// An edit without changes still produces a version, with the reiterated
    /// version number of its predecessor.
    ///
    /// On projection and elision buffers the mapped changes are applied to
    /// the sources and the current snapshot is returned once the buffer has
    /// followed them. Without changes nothing happens.
    pub fn apply(mut self) -> Result<Snapshot> {
        if self.base.projection().is_some() {
            let projected = std::mem::take(&mut self.projected);
            return apply_mapped(&self.buffer, projected);
        }

        let pending = std::mem::take(&mut self.pending);
        let changes = ChangeSet::normalize(self.base.rope(), pending)?;
        let text = changes.apply_to(self.base.rope());

        let (before, after) = self.buffer.commit(
            &self.base,
            changes.clone(),
            text,
            None,
            self.options.reiterated_version,
        )?;

        // The edit stays open while observers run, edits they start are
        // refused.
        self.buffer.notify_changed(&TextContentChanged {
            before,
            after: after.clone(),
            changes,
        });
        Ok(after)
    }

    /// Discard the edit
    pub fn cancel(self) {}
}

impl Drop for TextEdit {
    fn drop(&mut self) {
        self.buffer.end_edit();
    }
}

/// Pending changes overlap if they share text, or if both are insertions at
/// the same position as a replacement. Insertions at the edges of a
/// replacement are allowed.
fn overlaps(a: Span, b: Span) -> bool {
    if a.is_empty() || b.is_empty() {
        return (a.start > b.start && a.start < b.end) || (b.start > a.start && b.start < a.end);
    }
    a.start < b.end && b.start < a.end
}

pub(super) fn blocks(region: Span, edge: ReadOnlyEdge, change: Span) -> bool {
    let inside = if change.is_empty() {
        region.start < change.start && change.start < region.end
    } else {
        change.start < region.end && region.start < change.end
    };

    match edge {
        ReadOnlyEdge::Exclusive => inside,
        ReadOnlyEdge::Inclusive => {
            inside
                || change.is_empty() && (change.start == region.start || change.start == region.end)
        }
    }
}
