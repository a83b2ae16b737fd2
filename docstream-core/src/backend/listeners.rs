//! Listener bookkeeping shared by the bundled backends.
//!
//! Listeners are stored as `Arc<dyn Fn>` so a delivery round can snapshot the
//! matching set and release the list lock before calling out. Removal only
//! takes the list lock, never the delivery lock, so a listener can be removed
//! from inside a callback or from another thread while a delivery is running.
//!
//! Deliveries (initial snapshots and change notifications) are serialized by
//! a separate delivery lock. Backends hold it across "mutate, then notify",
//! which keeps every listener's view in write order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use super::{
    BackendError, BackendResult, DocumentSnapshot, Listener, ListenerRegistration, QuerySnapshot,
};
use crate::path::ResourcePath;

/// Identifier assigned to each registered listener.
pub type ListenerId = u64;

type SharedListener<S> = Arc<dyn Fn(BackendResult<S>) + Send + Sync>;

struct Entry<S> {
    id: ListenerId,
    path: ResourcePath,
    listener: SharedListener<S>,
}

/// Registry of document and collection listeners keyed by path.
pub struct ListenerRegistry {
    documents: Mutex<Vec<Entry<DocumentSnapshot>>>,
    collections: Mutex<Vec<Entry<QuerySnapshot>>>,
    delivery: Mutex<()>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(Vec::new()),
            collections: Mutex::new(Vec::new()),
            delivery: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Serializes deliveries. Hold the guard across a write and its
    /// notifications.
    pub fn delivery(&self) -> MutexGuard<'_, ()> {
        self.delivery.lock()
    }

    /// Registers a document listener and sends it `initial` right away.
    ///
    /// An initial error is delivered and the listener is not kept.
    pub fn listen_document(
        self: &Arc<Self>,
        path: &ResourcePath,
        listener: Listener<DocumentSnapshot>,
        initial: impl FnOnce() -> BackendResult<DocumentSnapshot>,
    ) -> ListenerRegistration {
        let _delivery = self.delivery();
        let listener: SharedListener<DocumentSnapshot> = Arc::from(listener);
        match initial() {
            Ok(snapshot) => {
                let id = self.insert(&self.documents, path, Arc::clone(&listener));
                listener(Ok(snapshot));
                self.registration(id)
            }
            Err(e) => {
                listener(Err(e));
                ListenerRegistration::noop()
            }
        }
    }

    /// Registers a collection listener and sends it `initial` right away.
    pub fn listen_collection(
        self: &Arc<Self>,
        path: &ResourcePath,
        listener: Listener<QuerySnapshot>,
        initial: impl FnOnce() -> BackendResult<QuerySnapshot>,
    ) -> ListenerRegistration {
        let _delivery = self.delivery();
        let listener: SharedListener<QuerySnapshot> = Arc::from(listener);
        match initial() {
            Ok(snapshot) => {
                let id = self.insert(&self.collections, path, Arc::clone(&listener));
                listener(Ok(snapshot));
                self.registration(id)
            }
            Err(e) => {
                listener(Err(e));
                ListenerRegistration::noop()
            }
        }
    }

    /// Notifies listeners after the document at `path` changed: document
    /// listeners on `path` and collection listeners on its parent.
    ///
    /// The caller must hold the delivery guard.
    pub fn notify_change(
        &self,
        path: &ResourcePath,
        read_document: impl FnOnce(&ResourcePath) -> BackendResult<DocumentSnapshot>,
        read_collection: impl FnOnce(&ResourcePath) -> BackendResult<QuerySnapshot>,
    ) {
        let document_listeners = Self::matching(&self.documents, path);
        if !document_listeners.is_empty() {
            let snapshot = read_document(path);
            for listener in document_listeners {
                listener(snapshot.clone());
            }
        }

        let Some(parent) = path.parent() else {
            return;
        };
        let collection_listeners = Self::matching(&self.collections, &parent);
        if !collection_listeners.is_empty() {
            let snapshot = read_collection(&parent);
            for listener in collection_listeners {
                listener(snapshot.clone());
            }
        }
    }

    /// Delivers `error` to every listener registered on exactly `path` and
    /// drops them.
    pub fn fail(&self, path: &ResourcePath, error: BackendError) {
        let _delivery = self.delivery();
        let documents = Self::drain_matching(&self.documents, path);
        let collections = Self::drain_matching(&self.collections, path);
        for listener in documents {
            listener(Err(error.clone()));
        }
        for listener in collections {
            listener(Err(error.clone()));
        }
    }

    /// Removes a listener. Unknown ids are ignored.
    pub fn remove(&self, id: ListenerId) {
        self.documents.lock().retain(|e| e.id != id);
        self.collections.lock().retain(|e| e.id != id);
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.documents.lock().len() + self.collections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert<S>(
        &self,
        entries: &Mutex<Vec<Entry<S>>>,
        path: &ResourcePath,
        listener: SharedListener<S>,
    ) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entries.lock().push(Entry {
            id,
            path: path.clone(),
            listener,
        });
        id
    }

    fn registration(self: &Arc<Self>, id: ListenerId) -> ListenerRegistration {
        let registry: Weak<Self> = Arc::downgrade(self);
        ListenerRegistration::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        })
    }

    fn matching<S>(entries: &Mutex<Vec<Entry<S>>>, path: &ResourcePath) -> Vec<SharedListener<S>> {
        entries
            .lock()
            .iter()
            .filter(|e| &e.path == path)
            .map(|e| Arc::clone(&e.listener))
            .collect()
    }

    fn drain_matching<S>(
        entries: &Mutex<Vec<Entry<S>>>,
        path: &ResourcePath,
    ) -> Vec<SharedListener<S>> {
        let mut guard = entries.lock();
        let mut drained = Vec::new();
        guard.retain(|e| {
            if &e.path == path {
                drained.push(Arc::clone(&e.listener));
                false
            } else {
                true
            }
        });
        drained
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
