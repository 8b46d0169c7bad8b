use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;

use crate::{BufferId, ChangeSet, ContentType, Snapshot};

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct SubscriptionId(usize);

impl SubscriptionId {
    pub fn next() -> SubscriptionId {
        static NEXT_ID: AtomicUsize = AtomicUsize::new(0);
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        SubscriptionId(id)
    }
}

pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Ordered list of event handlers. Handlers run synchronously in
/// subscription order.
pub(crate) struct Subscribers<E> {
    handlers: Mutex<Vec<(SubscriptionId, Handler<E>)>>,
}

impl<E> Subscribers<E> {
    pub fn subscribe(&self, handler: Handler<E>) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.handlers.lock().push((id, handler));
        id
    }

    /// Remove a handler if it exists, returns whether it was found
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();
        let len = handlers.len();
        handlers.retain(|(i, _)| *i != id);
        handlers.len() != len
    }

    /// Call every handler with `event`. The list is copied first so handlers
    /// may subscribe or unsubscribe while running.
    pub fn notify(&self, event: &E) {
        let handlers: Vec<Handler<E>> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();

        for handler in handlers {
            (handler)(event);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Subscribers {
            handlers: Mutex::new(vec![]),
        }
    }
}

/// Raised after an edit or a projection re-versioning
#[derive(Debug, Clone)]
pub struct TextContentChanged {
    pub before: Snapshot,
    pub after: Snapshot,
    pub changes: ChangeSet,
}

#[derive(Debug, Clone)]
pub struct ContentTypeChanged {
    pub before: Snapshot,
    pub after: Snapshot,
    pub before_content_type: ContentType,
    pub after_content_type: ContentType,
}

#[derive(Debug, Clone)]
pub struct ReadOnlyRegionsChanged {
    pub before: Snapshot,
    pub after: Snapshot,
}

/// The set of distinct source buffers of a projection changed
#[derive(Debug, Clone)]
pub struct SourceBuffersChanged {
    pub before: Snapshot,
    pub after: Snapshot,
    pub added: Vec<BufferId>,
    pub removed: Vec<BufferId>,
}

/// Buffers joined or left a buffer graph
#[derive(Debug, Clone)]
pub struct GraphBuffersChanged {
    pub added: Vec<BufferId>,
    pub removed: Vec<BufferId>,
}

#[derive(Debug, Clone)]
pub struct GraphBufferContentTypeChanged {
    pub buffer: BufferId,
    pub before: ContentType,
    pub after: ContentType,
}
