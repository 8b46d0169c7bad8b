use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    events::ReadOnlyRegionsChanged, Result, Snapshot, Span, SpanTrackingMode, TextBuffer,
    TrackingSpan,
};

use super::edit::blocks;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct RegionId(usize);

impl RegionId {
    fn next() -> RegionId {
        static NEXT_ID: AtomicUsize = AtomicUsize::new(0);
        RegionId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ReadOnlyEdge {
    /// Text may be inserted at the edges of the region
    #[default]
    Exclusive,
    /// Insertions at the edges are refused as well
    Inclusive,
}

/// A range of text edits may not touch. It follows the text like an edge
/// exclusive tracking span.
#[derive(Debug, Clone)]
pub struct ReadOnlyRegion {
    id: RegionId,
    span: TrackingSpan,
    edge: ReadOnlyEdge,
}

impl ReadOnlyRegion {
    pub fn id(&self) -> RegionId {
        self.id
    }

    pub fn edge(&self) -> ReadOnlyEdge {
        self.edge
    }

    pub fn tracking_span(&self) -> &TrackingSpan {
        &self.span
    }

    pub fn span_in(&self, snapshot: &Snapshot) -> Result<Span> {
        self.span.span_in(snapshot.version())
    }
}

impl TextBuffer {
    /// Protect `span` of the current snapshot from edits. Re-versions the
    /// buffer without changing the text.
    pub fn add_read_only_region(&self, span: Span, edge: ReadOnlyEdge) -> Result<RegionId> {
        let _guard = self.begin_edit()?;
        let snapshot = self.current_snapshot();
        let fidelity = self.config().tracking.default_fidelity;
        let tracking =
            snapshot.create_tracking_span(span, SpanTrackingMode::EdgeExclusive, fidelity)?;
        let region = ReadOnlyRegion {
            id: RegionId::next(),
            span: tracking,
            edge,
        };
        let id = region.id;

        let (before, after) = self.reversion(|state| state.read_only.push(region))?;
        log::debug!("Buffer {} read only region {span} added", self.id());
        self.notify_read_only_changed(&ReadOnlyRegionsChanged { before, after });
        Ok(id)
    }

    /// Remove a region, returns whether it existed. Nothing is re-versioned
    /// if the region was not found.
    pub fn remove_read_only_region(&self, id: RegionId) -> Result<bool> {
        let _guard = self.begin_edit()?;
        if !self.state().read_only.iter().any(|r| r.id == id) {
            return Ok(false);
        }

        let (before, after) = self.reversion(|state| state.read_only.retain(|r| r.id != id))?;
        log::debug!("Buffer {} read only region removed", self.id());
        self.notify_read_only_changed(&ReadOnlyRegionsChanged { before, after });
        Ok(true)
    }

    pub fn read_only_regions(&self) -> Vec<ReadOnlyRegion> {
        self.state().read_only.clone()
    }

    /// Whether changing `span` of the current snapshot would touch a read
    /// only region
    pub fn is_read_only(&self, span: Span) -> Result<bool> {
        let (snapshot, regions) = {
            let state = self.state();
            (state.current.clone(), state.read_only.clone())
        };
        snapshot.check_span(span)?;

        for region in regions {
            if blocks(region.span_in(&snapshot)?, region.edge, span) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
