mod edit;
mod read_only;

use std::{
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Weak,
    },
};

use parking_lot::Mutex;
use ropey::Rope;

pub use edit::{EditOptions, TextEdit};
pub use read_only::{ReadOnlyEdge, ReadOnlyRegion, RegionId};

use crate::{
    events::{
        ContentTypeChanged, ReadOnlyRegionsChanged, SourceBuffersChanged, SubscriptionId,
        Subscribers, TextContentChanged,
    },
    projection::{ElisionBuffer, ProjectionBuffer, ProjectionMap, ProjectionState},
    version::VersionChain,
    ChangeSet, ContentType, EngineConfig, Error, Result, Snapshot, Span,
};

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct BufferId(u32);

impl BufferId {
    pub fn next() -> BufferId {
        static NEXT_ID: AtomicU32 = AtomicU32::new(0);
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        BufferId(id)
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Owns its text, edited directly
    Text,
    /// Composed from spans of source buffers and literals
    Projection,
    /// Shows a subset of a single source buffer
    Elision,
}

pub(crate) struct BufferState {
    pub(crate) current: Snapshot,
    pub(crate) content_type: ContentType,
    pub(crate) edit_in_progress: bool,
    pub(crate) read_only: Vec<ReadOnlyRegion>,
}

pub(crate) struct BufferInner {
    id: BufferId,
    kind: BufferKind,
    chain: Arc<VersionChain>,
    config: Arc<EngineConfig>,
    state: Mutex<BufferState>,
    changed: Subscribers<TextContentChanged>,
    content_type_changed: Subscribers<ContentTypeChanged>,
    read_only_changed: Subscribers<ReadOnlyRegionsChanged>,
    sources_changed: Subscribers<SourceBuffersChanged>,
    pub(crate) projection: Option<Mutex<ProjectionState>>,
}

/// Mutable owner of a version chain.
///
/// Cloning the handle does not copy the buffer. Every edit produces a new
/// version and a new [`Snapshot`], observers are notified synchronously
/// before the editing call returns.
#[derive(Clone)]
pub struct TextBuffer {
    inner: Arc<BufferInner>,
}

impl TextBuffer {
    pub(crate) fn new(
        kind: BufferKind,
        text: Rope,
        content_type: ContentType,
        config: Arc<EngineConfig>,
        projection: Option<(ProjectionState, Arc<ProjectionMap>)>,
    ) -> TextBuffer {
        let id = BufferId::next();
        let chain = VersionChain::new(id, text.len_chars(), text.len_lines());
        let (projection, map) = match projection {
            Some((state, map)) => (Some(Mutex::new(state)), Some(map)),
            None => (None, None),
        };
        let snapshot = Snapshot::new(id, kind, chain.root(), text, content_type.clone(), map);

        log::debug!(
            "Created {kind:?} buffer {id}, length {}, content type {content_type}",
            snapshot.length()
        );

        TextBuffer {
            inner: Arc::new(BufferInner {
                id,
                kind,
                chain,
                config,
                state: Mutex::new(BufferState {
                    current: snapshot,
                    content_type,
                    edit_in_progress: false,
                    read_only: vec![],
                }),
                changed: Subscribers::default(),
                content_type_changed: Subscribers::default(),
                read_only_changed: Subscribers::default(),
                sources_changed: Subscribers::default(),
                projection,
            }),
        }
    }

    pub fn id(&self) -> BufferId {
        self.inner.id
    }

    pub fn kind(&self) -> BufferKind {
        self.inner.kind
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn current_snapshot(&self) -> Snapshot {
        self.inner.state.lock().current.clone()
    }

    pub fn content_type(&self) -> ContentType {
        self.inner.state.lock().content_type.clone()
    }

    pub fn is_edit_in_progress(&self) -> bool {
        self.inner.state.lock().edit_in_progress
    }

    pub fn as_projection(&self) -> Option<ProjectionBuffer> {
        (self.inner.kind == BufferKind::Projection).then(|| ProjectionBuffer::from_buffer(self.clone()))
    }

    pub fn as_elision(&self) -> Option<ElisionBuffer> {
        (self.inner.kind == BufferKind::Elision).then(|| ElisionBuffer::from_buffer(self.clone()))
    }

    /// Distinct buffers this buffer projects, in order of first appearance.
    /// Empty for text buffers.
    pub fn source_buffers(&self) -> Vec<TextBuffer> {
        match &self.inner.projection {
            Some(state) => state.lock().source_buffers(),
            None => vec![],
        }
    }

    /// Start an edit against the current snapshot. Only one edit can be open
    /// at a time, dropping the edit without applying cancels it.
    pub fn create_edit(&self) -> Result<TextEdit> {
        self.create_edit_with(EditOptions::default())
    }

    pub fn create_edit_with(&self, options: EditOptions) -> Result<TextEdit> {
        let (base, read_only) = {
            let mut state = self.inner.state.lock();
            if state.edit_in_progress {
                return Err(Error::EditInProgress { buffer: self.id() });
            }
            state.edit_in_progress = true;
            (state.current.clone(), state.read_only.clone())
        };

        TextEdit::new(self.clone(), base, read_only, options)
    }

    pub fn insert(&self, pos: usize, text: &str) -> Result<Snapshot> {
        let mut edit = self.create_edit()?;
        edit.insert(pos, text)?;
        edit.apply()
    }

    pub fn delete(&self, span: Span) -> Result<Snapshot> {
        let mut edit = self.create_edit()?;
        edit.delete(span)?;
        edit.apply()
    }

    pub fn replace(&self, span: Span, text: &str) -> Result<Snapshot> {
        let mut edit = self.create_edit()?;
        edit.replace(span, text)?;
        edit.apply()
    }

    /// Re-version the buffer with a new content type. The text does not
    /// change and neither does the reiterated version number.
    pub fn change_content_type(&self, content_type: ContentType) -> Result<Snapshot> {
        let _guard = self.begin_edit()?;
        let before_content_type = self.content_type();
        let (before, after) = self.reversion(|state| state.content_type = content_type.clone())?;

        log::debug!(
            "Buffer {} content type {before_content_type} -> {content_type}",
            self.id()
        );
        self.inner.content_type_changed.notify(&ContentTypeChanged {
            before,
            after: after.clone(),
            before_content_type,
            after_content_type: content_type,
        });
        Ok(after)
    }

    pub fn on_changed(
        &self,
        handler: impl Fn(&TextContentChanged) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.changed.subscribe(Arc::new(handler))
    }

    pub fn on_content_type_changed(
        &self,
        handler: impl Fn(&ContentTypeChanged) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.content_type_changed.subscribe(Arc::new(handler))
    }

    pub fn on_read_only_regions_changed(
        &self,
        handler: impl Fn(&ReadOnlyRegionsChanged) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.read_only_changed.subscribe(Arc::new(handler))
    }

    pub fn on_source_buffers_changed(
        &self,
        handler: impl Fn(&SourceBuffersChanged) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.sources_changed.subscribe(Arc::new(handler))
    }

    /// Remove a subscription made on this buffer, returns whether it existed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.changed.unsubscribe(id)
            || self.inner.content_type_changed.unsubscribe(id)
            || self.inner.read_only_changed.unsubscribe(id)
            || self.inner.sources_changed.unsubscribe(id)
    }

    pub(crate) fn downgrade(&self) -> WeakBuffer {
        WeakBuffer(Arc::downgrade(&self.inner))
    }

    /// Mark an edit as in progress until the guard is dropped
    pub(crate) fn begin_edit(&self) -> Result<EditGuard<'_>> {
        let mut state = self.inner.state.lock();
        if state.edit_in_progress {
            return Err(Error::EditInProgress { buffer: self.id() });
        }
        state.edit_in_progress = true;
        Ok(EditGuard { buffer: self })
    }

    pub(crate) fn end_edit(&self) {
        self.inner.state.lock().edit_in_progress = false;
    }

    /// Append the version produced by `changes` on top of `base`. `text` is
    /// the resulting text. Returns the snapshots before and after.
    pub(crate) fn commit(
        &self,
        base: &Snapshot,
        changes: ChangeSet,
        text: Rope,
        projection: Option<Arc<ProjectionMap>>,
        reiterated: Option<u64>,
    ) -> Result<(Snapshot, Snapshot)> {
        let mut state = self.inner.state.lock();
        let before = state.current.clone();
        if !before.is_same(base) {
            return Err(Error::SuccessorAlreadySet {
                version: base.version_number(),
            });
        }

        let count = changes.len();
        let version = self.inner.chain.create_next(
            base.version_number(),
            changes,
            &text,
            reiterated,
        )?;
        let projection = projection.or_else(|| before.projection_arc().cloned());
        let after = Snapshot::new(
            self.id(),
            self.kind(),
            version,
            text,
            state.content_type.clone(),
            projection,
        );
        state.current = after.clone();

        log::debug!(
            "Buffer {} version {} -> {}, {count} changes",
            self.id(),
            before.version_number(),
            after.version_number()
        );
        Ok((before, after))
    }

    /// Re-version with an empty change set after applying `update`
    pub(crate) fn reversion(
        &self,
        update: impl FnOnce(&mut BufferState),
    ) -> Result<(Snapshot, Snapshot)> {
        let mut state = self.inner.state.lock();
        update(&mut state);

        let before = state.current.clone();
        let version = self.inner.chain.create_next(
            before.version_number(),
            ChangeSet::empty(),
            before.rope(),
            None,
        )?;
        let after = Snapshot::new(
            self.id(),
            self.kind(),
            version,
            before.rope().clone(),
            state.content_type.clone(),
            before.projection_arc().cloned(),
        );
        state.current = after.clone();
        Ok((before, after))
    }

    pub(crate) fn state(&self) -> parking_lot::MutexGuard<'_, BufferState> {
        self.inner.state.lock()
    }

    pub(crate) fn projection_state(&self) -> Option<&Mutex<ProjectionState>> {
        self.inner.projection.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn changed_subscriber_count(&self) -> usize {
        self.inner.changed.len()
    }

    pub(crate) fn notify_changed(&self, event: &TextContentChanged) {
        self.inner.changed.notify(event);
    }

    pub(crate) fn notify_read_only_changed(&self, event: &ReadOnlyRegionsChanged) {
        self.inner.read_only_changed.notify(event);
    }

    pub(crate) fn notify_sources_changed(&self, event: &SourceBuffersChanged) {
        self.inner.sources_changed.notify(event);
    }
}

impl PartialEq for TextBuffer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for TextBuffer {}

impl fmt::Debug for TextBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextBuffer")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct WeakBuffer(Weak<BufferInner>);

impl WeakBuffer {
    pub(crate) fn upgrade(&self) -> Option<TextBuffer> {
        self.0.upgrade().map(|inner| TextBuffer { inner })
    }
}

/// Clears the edit in progress flag when dropped
pub(crate) struct EditGuard<'a> {
    buffer: &'a TextBuffer,
}

impl<'a> Drop for EditGuard<'a> {
    fn drop(&mut self) {
        self.buffer.end_edit();
    }
}
