use std::{
    cmp::Ordering,
    fmt,
    sync::{Arc, OnceLock},
};

use ropey::Rope;
use strata_utils::sorted_vec::SortedVec;

use crate::{Error, Result, Snapshot, Span};

/// Characters around an edit that decide whether the edit splits or joins a
/// `\r\n` pair. Evaluated against the snapshot the edit was made on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BoundaryConditions {
    /// The char right before the edit is `\r`
    pub preceding_return: bool,
    /// The char right after the replaced text is `\n`
    pub succeeding_newline: bool,
}

impl BoundaryConditions {
    pub(crate) fn at(rope: &Rope, span: Span) -> BoundaryConditions {
        let preceding_return = span.start > 0 && rope.char(span.start - 1) == '\r';
        let succeeding_newline = span.end < rope.len_chars() && rope.char(span.end) == '\n';
        BoundaryConditions {
            preceding_return,
            succeeding_newline,
        }
    }
}

/// One atomic replacement of `old_text` at `old_position` with `new_text`.
///
/// Positions are char offsets. `old_position` is in the coordinates of the
/// version before the change set, `new_position` in the coordinates of the
/// version after it.
#[derive(Clone)]
pub struct Change {
    old_position: usize,
    new_position: usize,
    old_text: Arc<str>,
    new_text: Arc<str>,
    old_len: usize,
    new_len: usize,
    boundary: BoundaryConditions,
    master_offset: usize,
    line_count_delta: OnceLock<isize>,
}

impl Change {
    /// Create a change against `snapshot`. `old_text` must be the text of
    /// the snapshot at `old_position`. The boundary conditions are read from
    /// the snapshot before the change is applied.
    pub fn create(
        old_position: usize,
        old_text: &str,
        new_text: &str,
        snapshot: &Snapshot,
    ) -> Result<Change> {
        let old_len = old_text.chars().count();
        let span = Span::from_len(old_position, old_len);
        if snapshot.text_in(span)? != old_text {
            return Err(Error::OldTextMismatch { span });
        }
        let boundary = BoundaryConditions::at(snapshot.rope(), span);
        Ok(Change::with_boundary(
            old_position,
            old_position,
            old_text.into(),
            new_text.into(),
            boundary,
            0,
        ))
    }

    pub(crate) fn with_boundary(
        old_position: usize,
        new_position: usize,
        old_text: Arc<str>,
        new_text: Arc<str>,
        boundary: BoundaryConditions,
        master_offset: usize,
    ) -> Change {
        Change {
            old_position,
            new_position,
            old_len: old_text.chars().count(),
            new_len: new_text.chars().count(),
            old_text,
            new_text,
            boundary,
            master_offset,
            line_count_delta: OnceLock::new(),
        }
    }

    pub fn old_position(&self) -> usize {
        self.old_position
    }

    pub fn new_position(&self) -> usize {
        self.new_position
    }

    pub fn old_end(&self) -> usize {
        self.old_position + self.old_len
    }

    pub fn new_end(&self) -> usize {
        self.new_position + self.new_len
    }

    pub fn old_span(&self) -> Span {
        Span::from_len(self.old_position, self.old_len)
    }

    pub fn new_span(&self) -> Span {
        Span::from_len(self.new_position, self.new_len)
    }

    pub fn old_text(&self) -> &str {
        &self.old_text
    }

    pub fn new_text(&self) -> &str {
        &self.new_text
    }

    pub fn old_len(&self) -> usize {
        self.old_len
    }

    pub fn new_len(&self) -> usize {
        self.new_len
    }

    pub fn boundary_conditions(&self) -> BoundaryConditions {
        self.boundary
    }

    /// Order of this change among changes made at the same position in one
    /// edit.
    pub fn master_offset(&self) -> usize {
        self.master_offset
    }

    pub fn delta(&self) -> isize {
        self.new_len as isize - self.old_len as isize
    }

    pub fn is_insert(&self) -> bool {
        self.old_len == 0 && self.new_len != 0
    }

    pub fn is_remove(&self) -> bool {
        self.new_len == 0 && self.old_len != 0
    }

    pub fn is_replace(&self) -> bool {
        self.new_len != 0 && self.old_len != 0
    }

    /// How much the line count changes, accounting for `\r\n` pairs split
    /// or joined at the edges of the change.
    pub fn line_count_delta(&self) -> isize {
        *self.line_count_delta.get_or_init(|| {
            adjusted_breaks(&self.new_text, self.boundary)
                - adjusted_breaks(&self.old_text, self.boundary)
        })
    }

    /// The change that undoes this one
    pub fn inverse(&self) -> Change {
        let inverse = Change {
            old_position: self.new_position,
            new_position: self.old_position,
            old_text: self.new_text.clone(),
            new_text: self.old_text.clone(),
            old_len: self.new_len,
            new_len: self.old_len,
            boundary: self.boundary,
            master_offset: self.master_offset,
            line_count_delta: OnceLock::new(),
        };
        if let Some(delta) = self.line_count_delta.get() {
            let _ = inverse.line_count_delta.set(-delta);
        }
        inverse
    }
}

impl fmt::Debug for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Change")
            .field("old", &self.old_span())
            .field("new", &self.new_span())
            .field("old_text", &self.old_text)
            .field("new_text", &self.new_text)
            .finish()
    }
}

impl PartialEq for Change {
    fn eq(&self, other: &Self) -> bool {
        self.old_position == other.old_position
            && self.new_position == other.new_position
            && self.old_text == other.old_text
            && self.new_text == other.new_text
    }
}

impl Eq for Change {}

/// Number of line breaks in `text`, `\r\n` counts as one. The recognized
/// breaks are LF, VT, FF, CR, CRLF, NEL, LS and PS.
pub fn count_line_breaks(text: &str) -> usize {
    let mut count = 0;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                count += 1;
            }
            '\n' | '\u{000B}' | '\u{000C}' | '\u{0085}' | '\u{2028}' | '\u{2029}' => count += 1,
            _ => {}
        }
    }
    count
}

/// Line breaks contributed by `text` when placed between the boundary
/// characters.
fn adjusted_breaks(text: &str, boundary: BoundaryConditions) -> isize {
    if text.is_empty() {
        // Removing everything between a \r and a \n joins them
        return -((boundary.preceding_return && boundary.succeeding_newline) as isize);
    }

    let mut breaks = count_line_breaks(text) as isize;
    if boundary.preceding_return && text.starts_with('\n') {
        breaks -= 1;
    }
    if boundary.succeeding_newline && text.ends_with('\r') {
        breaks -= 1;
    }
    breaks
}

/// Line count change of touching changes, treated as a single replacement
fn run_line_count_delta(run: &[Change]) -> isize {
    let old: String = run.iter().map(|c| c.old_text.as_ref()).collect();
    let new: String = run.iter().map(|c| c.new_text.as_ref()).collect();
    let boundary = BoundaryConditions {
        preceding_return: run[0].boundary.preceding_return,
        succeeding_newline: run[run.len() - 1].boundary.succeeding_newline,
    };
    adjusted_breaks(&new, boundary) - adjusted_breaks(&old, boundary)
}

/// A change waiting to be normalized into a change set.
#[derive(Debug, Clone)]
pub(crate) struct PendingChange {
    pub(crate) span: Span,
    pub(crate) text: Arc<str>,
    pub(crate) master_offset: usize,
}

impl PendingChange {
    fn key(&self) -> (usize, bool, usize) {
        // Insertions sort before a replacement starting at the same position
        (self.span.start, !self.span.is_empty(), self.master_offset)
    }
}

impl PartialEq for PendingChange {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PendingChange {}

impl PartialOrd for PendingChange {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingChange {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Ordered, non overlapping changes produced by one edit.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    changes: Arc<[Change]>,
}

impl ChangeSet {
    pub fn empty() -> ChangeSet {
        ChangeSet::default()
    }

    /// Build a change set from replacements described in the coordinates of
    /// `snapshot`.
    pub fn from_edits<S: Into<Span>, T: AsRef<str>>(
        snapshot: &Snapshot,
        edits: impl IntoIterator<Item = (S, T)>,
    ) -> Result<ChangeSet> {
        let pending = edits
            .into_iter()
            .enumerate()
            .map(|(i, (span, text))| PendingChange {
                span: span.into(),
                text: text.as_ref().into(),
                master_offset: i,
            })
            .collect();
        ChangeSet::normalize(snapshot.rope(), pending)
    }

    /// Sort the pending changes, reject overlaps and capture the replaced
    /// text and boundary conditions from `rope`.
    pub(crate) fn normalize(rope: &Rope, pending: Vec<PendingChange>) -> Result<ChangeSet> {
        let len = rope.len_chars();
        let sorted = SortedVec::from(pending);

        for change in sorted.iter() {
            if change.span.end > len {
                return Err(Error::SpanOutOfRange {
                    span: change.span,
                    length: len,
                });
            }
        }

        for pair in sorted.as_slice().windows(2) {
            if pair[0].span.end > pair[1].span.start {
                return Err(Error::OverlappingEdits {
                    first: pair[0].span,
                    second: pair[1].span,
                });
            }
        }

        let mut delta = 0isize;
        let mut changes = Vec::with_capacity(sorted.len());
        for pending in sorted.into_vec() {
            let Span { start, end } = pending.span;
            if start == end && pending.text.is_empty() {
                continue;
            }

            let old_text: String = rope.slice(start..end).into();
            let boundary = BoundaryConditions::at(rope, pending.span);
            let new_position = (start as isize + delta) as usize;
            let change = Change::with_boundary(
                start,
                new_position,
                old_text.into(),
                pending.text,
                boundary,
                pending.master_offset,
            );
            delta += change.delta();
            changes.push(change);
        }

        Ok(ChangeSet {
            changes: changes.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }

    pub fn get(&self, i: usize) -> Option<&Change> {
        self.changes.get(i)
    }

    pub fn as_slice(&self) -> &[Change] {
        &self.changes
    }

    pub fn delta(&self) -> isize {
        self.changes.iter().map(Change::delta).sum()
    }

    /// How much the line count changes. Touching changes are measured as one
    /// replacement, a `\r\n` pair they split or join is counted once.
    pub fn line_count_delta(&self) -> isize {
        let mut delta = 0;
        let mut rest: &[Change] = &self.changes;
        while !rest.is_empty() {
            let mut len = 1;
            while len < rest.len() && rest[len - 1].old_end() == rest[len].old_position {
                len += 1;
            }

            let (run, tail) = rest.split_at(len);
            delta += match run {
                [change] => change.line_count_delta(),
                _ => run_line_count_delta(run),
            };
            rest = tail;
        }
        delta
    }

    /// Change set that takes the resulting text back to the original
    pub fn inverse(&self) -> ChangeSet {
        let changes: Vec<Change> = self.changes.iter().map(Change::inverse).collect();
        ChangeSet {
            changes: changes.into(),
        }
    }

    /// Produce the text after this change set. `rope` must be the text the
    /// change set was made against.
    pub(crate) fn apply_to(&self, rope: &Rope) -> Rope {
        let mut result = rope.clone();
        for change in self.changes.iter().rev() {
            if change.old_len != 0 {
                result.remove(change.old_position..change.old_end());
            }
            if change.new_len != 0 {
                result.insert(change.old_position, &change.new_text);
            }
        }
        result
    }
}

impl fmt::Debug for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.changes.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}
