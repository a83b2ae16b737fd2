//! File-backed backend: one JSON file per document.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;

use super::{
    merge_into, require_collection, require_document, Backend, BackendError, BackendErrorCode,
    BackendResult, DocumentSnapshot, Listener, ListenerRegistration, ListenerRegistry,
    QuerySnapshot, Source, WriteMode,
};
use crate::codec::{self, Dictionary};
use crate::path::ResourcePath;

/// File extension for stored documents.
const DOC_EXTENSION: &str = "json";

/// Backend persisting documents under a data directory.
///
/// A document at `/a/b` lives in `<data_dir>/a/b.json`; its subcollections
/// live under `<data_dir>/a/b/`. Reads, writes and the initial read of a
/// listen run on the blocking pool.
/// Listeners only see writes made through this process.
#[derive(Clone)]
pub struct LocalBackend {
    inner: Arc<LocalInner>,
}

struct LocalInner {
    data_dir: PathBuf,
    listeners: Arc<ListenerRegistry>,
}

impl LocalBackend {
    /// Creates a backend rooted at `data_dir`. The directory is created on
    /// first write.
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            inner: Arc::new(LocalInner {
                data_dir,
                listeners: Arc::new(ListenerRegistry::new()),
            }),
        }
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &PathBuf {
        &self.inner.data_dir
    }

    /// Returns the file backing the document at `path`.
    pub fn document_file(&self, path: &ResourcePath) -> PathBuf {
        self.inner.document_file(path)
    }

    /// Registered listener count.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

impl LocalInner {
    fn document_file(&self, path: &ResourcePath) -> PathBuf {
        let mut file = self.data_dir.clone();
        if let Some((key, parents)) = path.segments().split_last() {
            file.extend(parents);
            file.push(format!("{}.{}", key, DOC_EXTENSION));
        }
        file
    }

    fn collection_dir(&self, path: &ResourcePath) -> PathBuf {
        let mut dir = self.data_dir.clone();
        dir.extend(path.segments());
        dir
    }

    fn read_document(&self, path: &ResourcePath) -> BackendResult<DocumentSnapshot> {
        require_document(path)?;
        let key = path.last_segment().unwrap_or_default();
        let file = self.document_file(path);

        let data = match fs::read(&file) {
            Ok(bytes) => Some(
                codec::from_json_bytes(&bytes, key)
                    .map_err(|e| BackendError::data_loss(format!("{}: {}", file.display(), e)))?,
            ),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(io_error(&file, e)),
        };

        Ok(DocumentSnapshot::new(key, data))
    }

    fn read_collection(&self, path: &ResourcePath) -> BackendResult<QuerySnapshot> {
        require_collection(path)?;
        let dir = self.collection_dir(path);

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(QuerySnapshot::default()),
            Err(e) => return Err(io_error(&dir, e)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&dir, e))?;
            let file = entry.path();

            // Skip subcollection directories
            if !file.is_file() {
                continue;
            }
            if file.extension().and_then(|s| s.to_str()) != Some(DOC_EXTENSION) {
                continue;
            }
            if let Some(stem) = file.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();

        let mut documents = Vec::with_capacity(keys.len());
        for key in keys {
            let child = match path.child(&key) {
                Ok(child) => child,
                Err(e) => {
                    tracing::warn!("Skipping {} in {}: {}", key, dir.display(), e);
                    continue;
                }
            };
            match self.read_document(&child) {
                Ok(snapshot) => documents.push(snapshot),
                // A corrupt member must not hide its siblings
                Err(e) if e.code() == BackendErrorCode::DataLoss => {
                    tracing::warn!("Skipping unreadable document {}: {}", child, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(QuerySnapshot::new(documents))
    }

    fn apply_write(
        &self,
        path: &ResourcePath,
        data: Dictionary,
        mode: WriteMode,
    ) -> BackendResult<()> {
        require_document(path)?;
        let _delivery = self.listeners.delivery();

        // Replace never looks at the old payload, so it can overwrite a corrupt file
        let existing = match mode {
            WriteMode::Merge => self.read_document(path)?.data,
            WriteMode::Replace => None,
        };
        let merged = merge_into(existing, data, mode, path)?;
        let bytes = codec::to_json_bytes(&merged)
            .map_err(|e| BackendError::invalid_argument(e.to_string()))?;

        let file = self.document_file(path);
        if let Some(dir) = file.parent() {
            fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
        }
        fs::write(&file, bytes).map_err(|e| io_error(&file, e))?;

        tracing::debug!("local write {:?} to {}", mode, file.display());
        self.listeners.notify_change(
            path,
            |p| self.read_document(p),
            |p| self.read_collection(p),
        );
        Ok(())
    }
}

fn io_error(path: &std::path::Path, e: io::Error) -> BackendError {
    let message = format!("I/O error for {}: {}", path.display(), e);
    match e.kind() {
        io::ErrorKind::PermissionDenied => BackendError::permission_denied(message),
        _ => BackendError::internal(message),
    }
}

fn join_error(e: tokio::task::JoinError) -> BackendError {
    BackendError::internal(format!("Blocking task failed: {}", e))
}

/// Runs a listen call, including its initial read, on the blocking pool.
///
/// The returned registration can be removed before the listen call has
/// finished; the listener is then deregistered as soon as it lands.
fn spawn_listen<F>(inner: &Arc<LocalInner>, listen: F) -> ListenerRegistration
where
    F: FnOnce(&LocalInner) -> ListenerRegistration + Send + 'static,
{
    let removed = Arc::new(AtomicBool::new(false));
    let slot: Arc<Mutex<Option<ListenerRegistration>>> = Arc::new(Mutex::new(None));

    let task = {
        let inner = Arc::clone(inner);
        let removed = Arc::clone(&removed);
        let slot = Arc::clone(&slot);
        move || {
            let registration = listen(&inner);
            let mut guard = slot.lock();
            if removed.load(Ordering::SeqCst) {
                drop(guard);
                registration.remove();
            } else {
                *guard = Some(registration);
            }
        }
    };

    // Outside a runtime there is no blocking pool to hand the read to
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(task);
        }
        Err(_) => task(),
    }

    ListenerRegistration::new(move || {
        removed.store(true, Ordering::SeqCst);
        let registration = slot.lock().take();
        if let Some(registration) = registration {
            registration.remove();
        }
    })
}

impl Backend for LocalBackend {
    fn get_document<'a>(
        &'a self,
        path: &'a ResourcePath,
        _source: Source,
    ) -> BoxFuture<'a, BackendResult<DocumentSnapshot>> {
        let inner = Arc::clone(&self.inner);
        let path = path.clone();
        async move {
            tokio::task::spawn_blocking(move || inner.read_document(&path))
                .await
                .map_err(join_error)?
        }
        .boxed()
    }

    fn get_collection<'a>(
        &'a self,
        path: &'a ResourcePath,
        _source: Source,
    ) -> BoxFuture<'a, BackendResult<QuerySnapshot>> {
        let inner = Arc::clone(&self.inner);
        let path = path.clone();
        async move {
            tokio::task::spawn_blocking(move || inner.read_collection(&path))
                .await
                .map_err(join_error)?
        }
        .boxed()
    }

    fn listen_document(
        &self,
        path: &ResourcePath,
        listener: Listener<DocumentSnapshot>,
    ) -> ListenerRegistration {
        let path = path.clone();
        spawn_listen(&self.inner, move |inner| {
            inner
                .listeners
                .listen_document(&path, listener, || inner.read_document(&path))
        })
    }

    fn listen_collection(
        &self,
        path: &ResourcePath,
        listener: Listener<QuerySnapshot>,
    ) -> ListenerRegistration {
        let path = path.clone();
        spawn_listen(&self.inner, move |inner| {
            inner
                .listeners
                .listen_collection(&path, listener, || inner.read_collection(&path))
        })
    }

    fn write<'a>(
        &'a self,
        path: &'a ResourcePath,
        data: Dictionary,
        mode: WriteMode,
    ) -> BoxFuture<'a, BackendResult<()>> {
        let inner = Arc::clone(&self.inner);
        let path = path.clone();
        async move {
            tokio::task::spawn_blocking(move || inner.apply_write(&path, data, mode))
                .await
                .map_err(join_error)?
        }
        .boxed()
    }
}
