//! Storage backend boundary.
//!
//! The [`Backend`] trait is the whole contract this crate needs from a
//! document store: one-shot reads, push listeners with a removal token, and
//! replace/merge writes. Two implementations are bundled:
//!
//! - [`MemoryBackend`]: in-process map, used in tests and embedding.
//! - [`LocalBackend`]: one pretty-printed JSON file per document under a
//!   data directory.
//!
//! Storage layout for [`LocalBackend`]:
//! ```text
//! <data_dir>/
//! ├── donations/
//! │   ├── abc123.json
//! │   └── abc123/
//! │       └── notes/
//! │           └── n1.json
//! └── donors/
//!     └── x.json
//! ```

mod error;
mod listeners;
mod local;
mod memory;

use std::fmt;
use std::str::FromStr;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::codec::Dictionary;
use crate::path::ResourcePath;

pub use error::{BackendError, BackendErrorCode, BackendResult};
pub use listeners::{ListenerId, ListenerRegistry};
pub use local::LocalBackend;
pub use memory::MemoryBackend;

/// Where a one-shot read may be served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    /// Local cache when the backend has one, otherwise the server.
    #[default]
    PreferCache,
    /// Local cache only.
    Cache,
    /// Server only.
    Server,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::PreferCache => "prefer-cache",
            Source::Cache => "cache",
            Source::Server => "server",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prefer-cache" => Ok(Source::PreferCache),
            "cache" => Ok(Source::Cache),
            "server" => Ok(Source::Server),
            other => Err(format!(
                "unknown source '{}', expected prefer-cache, cache or server",
                other
            )),
        }
    }
}

/// How a write combines with an existing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Overwrite the whole document, creating it if needed.
    Replace,
    /// Overwrite only the given top-level fields. The document must exist.
    Merge,
}

/// Raw state of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    /// Document key (last path segment).
    pub id: String,
    /// Stored fields, `None` when the document does not exist.
    pub data: Option<Dictionary>,
}

impl DocumentSnapshot {
    pub fn new(id: impl Into<String>, data: Option<Dictionary>) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }
}

/// Raw state of a collection, members in backend order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuerySnapshot {
    pub documents: Vec<DocumentSnapshot>,
}

impl QuerySnapshot {
    pub fn new(documents: Vec<DocumentSnapshot>) -> Self {
        Self { documents }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Callback invoked by the backend for every snapshot or error.
pub type Listener<S> = Box<dyn Fn(BackendResult<S>) + Send + Sync>;

/// Token returned by a listen call. Removing it deregisters the listener.
///
/// `remove` consumes the token, so a registration can only be removed once.
pub struct ListenerRegistration {
    remove: Box<dyn FnOnce() + Send>,
}

impl ListenerRegistration {
    pub fn new(remove: impl FnOnce() + Send + 'static) -> Self {
        Self {
            remove: Box::new(remove),
        }
    }

    /// A registration with nothing to remove.
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn remove(self) {
        (self.remove)()
    }
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration").finish_non_exhaustive()
    }
}

/// A document store client.
///
/// Listeners may be called on any thread, but calls for one registration
/// must arrive in order. After a registration is removed the backend must
/// drop the listener.
pub trait Backend: Send + Sync + 'static {
    fn get_document<'a>(
        &'a self,
        path: &'a ResourcePath,
        source: Source,
    ) -> BoxFuture<'a, BackendResult<DocumentSnapshot>>;

    fn get_collection<'a>(
        &'a self,
        path: &'a ResourcePath,
        source: Source,
    ) -> BoxFuture<'a, BackendResult<QuerySnapshot>>;

    fn listen_document(
        &self,
        path: &ResourcePath,
        listener: Listener<DocumentSnapshot>,
    ) -> ListenerRegistration;

    fn listen_collection(
        &self,
        path: &ResourcePath,
        listener: Listener<QuerySnapshot>,
    ) -> ListenerRegistration;

    fn write<'a>(
        &'a self,
        path: &'a ResourcePath,
        data: Dictionary,
        mode: WriteMode,
    ) -> BoxFuture<'a, BackendResult<()>>;
}

/// Applies `data` onto `existing` according to `mode`.
pub(crate) fn merge_into(
    existing: Option<Dictionary>,
    data: Dictionary,
    mode: WriteMode,
    path: &ResourcePath,
) -> BackendResult<Dictionary> {
    match mode {
        WriteMode::Replace => Ok(data),
        WriteMode::Merge => {
            let mut current = existing.ok_or_else(|| {
                BackendError::not_found(format!("No document to update at {}", path))
            })?;
            current.extend(data);
            Ok(current)
        }
    }
}

/// Rejects paths that do not name a document.
pub(crate) fn require_document(path: &ResourcePath) -> BackendResult<()> {
    if path.is_document() {
        Ok(())
    } else {
        Err(BackendError::invalid_argument(format!(
            "{} is not a document path",
            path
        )))
    }
}

/// Rejects paths that do not name a collection.
pub(crate) fn require_collection(path: &ResourcePath) -> BackendResult<()> {
    if path.is_collection() {
        Ok(())
    } else {
        Err(BackendError::invalid_argument(format!(
            "{} is not a collection path",
            path
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_source_parse_and_display() {
        for source in [Source::PreferCache, Source::Cache, Source::Server] {
            assert_eq!(source.as_str().parse::<Source>().unwrap(), source);
        }
        assert!("disk".parse::<Source>().is_err());
        assert_eq!(Source::default(), Source::PreferCache);
    }

    #[test]
    fn test_source_serde_kebab_case() {
        let parsed: Source = serde_json::from_str("\"prefer-cache\"").unwrap();
        assert_eq!(parsed, Source::PreferCache);
    }

    #[test]
    fn test_registration_remove_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let registration = ListenerRegistration::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        registration.remove();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_merge_replace_and_merge() {
        let path = ResourcePath::parse("/donations/a").unwrap();
        let mut existing = Dictionary::new();
        existing.insert("amount".to_string(), json!(5));
        existing.insert("donor".to_string(), json!("x"));
        let mut patch = Dictionary::new();
        patch.insert("amount".to_string(), json!(7));

        let merged = merge_into(
            Some(existing.clone()),
            patch.clone(),
            WriteMode::Merge,
            &path,
        )
        .unwrap();
        assert_eq!(merged.get("amount"), Some(&json!(7)));
        assert_eq!(merged.get("donor"), Some(&json!("x")));

        let replaced =
            merge_into(Some(existing), patch.clone(), WriteMode::Replace, &path).unwrap();
        assert_eq!(replaced, patch);

        let err = merge_into(None, patch, WriteMode::Merge, &path).unwrap_err();
        assert_eq!(err.code(), BackendErrorCode::NotFound);
    }
}
