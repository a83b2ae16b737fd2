//! In-process backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::RwLock;

use super::{
    merge_into, require_collection, require_document, Backend, BackendError, BackendResult,
    DocumentSnapshot, Listener, ListenerRegistration, ListenerRegistry, QuerySnapshot, Source,
    WriteMode,
};
use crate::codec::Dictionary;
use crate::path::ResourcePath;

/// Backend that keeps every document in memory.
///
/// Listeners are notified on the writing thread. `set_online(false)` makes
/// server reads and writes fail with `unavailable` while cache reads keep
/// working, which is handy for exercising error paths.
pub struct MemoryBackend {
    documents: RwLock<BTreeMap<ResourcePath, Dictionary>>,
    listeners: Arc<ListenerRegistry>,
    online: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            listeners: Arc::new(ListenerRegistry::new()),
            online: AtomicBool::new(true),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Registered listener count.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Delivers `error` to every listener on `path` and drops them.
    pub fn fail_listeners(&self, path: &ResourcePath, error: BackendError) {
        self.listeners.fail(path, error);
    }

    /// Applies a write synchronously and notifies listeners before returning.
    pub fn apply_write(
        &self,
        path: &ResourcePath,
        data: Dictionary,
        mode: WriteMode,
    ) -> BackendResult<()> {
        require_document(path)?;
        if !self.is_online() {
            return Err(BackendError::unavailable("Backend is offline"));
        }

        let _delivery = self.listeners.delivery();
        {
            let mut documents = self.documents.write();
            let merged = merge_into(documents.get(path).cloned(), data, mode, path)?;
            documents.insert(path.clone(), merged);
        }

        tracing::debug!("memory write {:?} at {}", mode, path);
        self.listeners.notify_change(
            path,
            |p| Ok(self.read_document(p)),
            |p| Ok(self.read_collection(p)),
        );
        Ok(())
    }

    fn check_source(&self, source: Source) -> BackendResult<()> {
        if source == Source::Server && !self.is_online() {
            return Err(BackendError::unavailable(
                "Backend is offline and the read requires the server",
            ));
        }
        Ok(())
    }

    fn read_document(&self, path: &ResourcePath) -> DocumentSnapshot {
        let data = self.documents.read().get(path).cloned();
        DocumentSnapshot::new(path.last_segment().unwrap_or_default(), data)
    }

    fn read_collection(&self, path: &ResourcePath) -> QuerySnapshot {
        let documents = self.documents.read();
        let members = documents
            .iter()
            .filter(|(p, _)| p.parent().as_ref() == Some(path))
            .map(|(p, data)| {
                DocumentSnapshot::new(p.last_segment().unwrap_or_default(), Some(data.clone()))
            })
            .collect();
        QuerySnapshot::new(members)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn get_document<'a>(
        &'a self,
        path: &'a ResourcePath,
        source: Source,
    ) -> BoxFuture<'a, BackendResult<DocumentSnapshot>> {
        let result = require_document(path)
            .and_then(|_| self.check_source(source))
            .map(|_| self.read_document(path));
        future::ready(result).boxed()
    }

    fn get_collection<'a>(
        &'a self,
        path: &'a ResourcePath,
        source: Source,
    ) -> BoxFuture<'a, BackendResult<QuerySnapshot>> {
        let result = require_collection(path)
            .and_then(|_| self.check_source(source))
            .map(|_| self.read_collection(path));
        future::ready(result).boxed()
    }

    fn listen_document(
        &self,
        path: &ResourcePath,
        listener: Listener<DocumentSnapshot>,
    ) -> ListenerRegistration {
        self.listeners.listen_document(path, listener, || {
            require_document(path).map(|_| self.read_document(path))
        })
    }

    fn listen_collection(
        &self,
        path: &ResourcePath,
        listener: Listener<QuerySnapshot>,
    ) -> ListenerRegistration {
        self.listeners.listen_collection(path, listener, || {
            require_collection(path).map(|_| self.read_collection(path))
        })
    }

    fn write<'a>(
        &'a self,
        path: &'a ResourcePath,
        data: Dictionary,
        mode: WriteMode,
    ) -> BoxFuture<'a, BackendResult<()>> {
        future::ready(self.apply_write(path, data, mode)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendErrorCode;
    use serde_json::json;
    use std::sync::Mutex;

    fn dict(value: serde_json::Value) -> Dictionary {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn path(s: &str) -> ResourcePath {
        ResourcePath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_get_missing_document() {
        let backend = MemoryBackend::new();
        let snapshot = backend
            .get_document(&path("/donations/nope"), Source::PreferCache)
            .await
            .unwrap();
        assert_eq!(snapshot.id, "nope");
        assert!(!snapshot.exists());
    }

    #[tokio::test]
    async fn test_replace_then_get() {
        let backend = MemoryBackend::new();
        let p = path("/donations/abc123");
        backend
            .write(&p, dict(json!({"amount": 5})), WriteMode::Replace)
            .await
            .unwrap();

        let snapshot = backend.get_document(&p, Source::Server).await.unwrap();
        assert_eq!(snapshot.data, Some(dict(json!({"amount": 5}))));
    }

    #[tokio::test]
    async fn test_merge_requires_existing_document() {
        let backend = MemoryBackend::new();
        let p = path("/donations/abc123");
        let err = backend
            .write(&p, dict(json!({"amount": 5})), WriteMode::Merge)
            .await
            .unwrap_err();
        assert_eq!(err.code(), BackendErrorCode::NotFound);

        let snapshot = backend.get_document(&p, Source::Cache).await.unwrap();
        assert!(!snapshot.exists());
    }

    #[tokio::test]
    async fn test_merge_keeps_untouched_fields() {
        let backend = MemoryBackend::new();
        let p = path("/donations/abc123");
        backend
            .write(&p, dict(json!({"amount": 5, "donor": "x"})), WriteMode::Replace)
            .await
            .unwrap();
        backend
            .write(&p, dict(json!({"amount": 9})), WriteMode::Merge)
            .await
            .unwrap();

        let snapshot = backend.get_document(&p, Source::Cache).await.unwrap();
        assert_eq!(snapshot.data, Some(dict(json!({"amount": 9, "donor": "x"}))));
    }

    #[tokio::test]
    async fn test_collection_lists_direct_children_in_key_order() {
        let backend = MemoryBackend::new();
        for key in ["b", "a", "c"] {
            let p = path(&format!("/donations/{}", key));
            backend
                .apply_write(&p, Dictionary::new(), WriteMode::Replace)
                .unwrap();
        }
        backend
            .apply_write(&path("/donations/a/notes/n1"), Dictionary::new(), WriteMode::Replace)
            .unwrap();
        backend
            .apply_write(&path("/donors/a"), Dictionary::new(), WriteMode::Replace)
            .unwrap();

        let snapshot = backend
            .get_collection(&path("/donations"), Source::PreferCache)
            .await
            .unwrap();
        let ids: Vec<&str> = snapshot.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_offline_rejects_server_reads_and_writes() {
        let backend = MemoryBackend::new();
        backend.set_online(false);
        let p = path("/donations/a");

        let err = backend.get_document(&p, Source::Server).await.unwrap_err();
        assert_eq!(err.code(), BackendErrorCode::Unavailable);
        assert!(backend.get_document(&p, Source::Cache).await.is_ok());

        let err = backend
            .write(&p, Dictionary::new(), WriteMode::Replace)
            .await
            .unwrap_err();
        assert_eq!(err.code(), BackendErrorCode::Unavailable);
    }

    #[tokio::test]
    async fn test_wrong_path_kind_is_invalid_argument() {
        let backend = MemoryBackend::new();
        let err = backend
            .get_document(&path("/donations"), Source::Cache)
            .await
            .unwrap_err();
        assert_eq!(err.code(), BackendErrorCode::InvalidArgument);
    }

    #[test]
    fn test_listeners_see_writes_in_order() {
        let backend = MemoryBackend::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let p = path("/donations/a");

        let registration = backend.listen_document(
            &p,
            Box::new(move |result| {
                let amount = result
                    .unwrap()
                    .data
                    .and_then(|d| d.get("amount").cloned());
                sink.lock().unwrap().push(amount);
            }),
        );

        for amount in 1..=3 {
            backend
                .apply_write(&p, dict(json!({"amount": amount})), WriteMode::Replace)
                .unwrap();
        }
        registration.remove();
        backend
            .apply_write(&p, dict(json!({"amount": 4})), WriteMode::Replace)
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![None, Some(json!(1)), Some(json!(2)), Some(json!(3))]
        );
        assert_eq!(backend.listener_count(), 0);
    }
}
