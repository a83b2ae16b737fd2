//! Async client over an injected [`Backend`].
//!
//! One-shot reads resolve once. Observations are streams that stay open
//! until cancelled or until the backend reports an error. Writes encode the
//! record, issue exactly one backend write, and never retry.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::{Backend, DocumentSnapshot, QuerySnapshot, Source, WriteMode};
use crate::codec;
use crate::error::StoreResult;
use crate::path::{root, CollectionPath, DocumentPath, ResourcePath};
use crate::record::{Collection, Record};
use crate::repository::Repository;
use crate::subscription::{CollectionObservation, DocumentObservation, Observation};

/// Entry point for reading, observing and writing records.
pub struct StoreClient<B> {
    backend: Arc<B>,
    source: Source,
}

impl<B: Backend> StoreClient<B> {
    pub fn new(backend: B) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    /// Shares an existing backend handle.
    pub fn from_arc(backend: Arc<B>) -> Self {
        Self {
            backend,
            source: Source::default(),
        }
    }

    /// Sets where one-shot reads are served from.
    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Repository for the top-level collection of `T`.
    pub fn repository<T: Record + Collection>(&self) -> Repository<T, B> {
        Repository::new(self.clone())
    }

    /// Reads one document. A missing document is `Ok(None)`.
    pub async fn get_document<T: DeserializeOwned>(
        &self,
        path: &DocumentPath<T>,
    ) -> StoreResult<Option<T>> {
        tracing::debug!("get {}", path);
        let snapshot = self.backend.get_document(path.path(), self.source).await?;
        decode_document(snapshot)
    }

    /// Reads every member of a collection, skipping members that fail to
    /// decode.
    pub async fn get_collection<T: DeserializeOwned>(
        &self,
        path: &CollectionPath<T>,
    ) -> StoreResult<Vec<T>> {
        tracing::debug!("get {}", path);
        let snapshot = self.backend.get_collection(path.path(), self.source).await?;
        decode_collection(snapshot)
    }

    /// Streams the document at `path`. The listener is registered on first
    /// poll.
    pub fn observe_document<T: DeserializeOwned>(
        &self,
        path: &DocumentPath<T>,
    ) -> DocumentObservation<T> {
        let backend = Arc::clone(&self.backend);
        let target = path.path().clone();
        Observation::new(
            target.clone(),
            move |listener| backend.listen_document(&target, listener),
            decode_document::<T>,
        )
    }

    /// Streams the members of the collection at `path`.
    pub fn observe_collection<T: DeserializeOwned>(
        &self,
        path: &CollectionPath<T>,
    ) -> CollectionObservation<T> {
        let backend = Arc::clone(&self.backend);
        let target = path.path().clone();
        Observation::new(
            target.clone(),
            move |listener| backend.listen_collection(&target, listener),
            decode_collection::<T>,
        )
    }

    /// Replaces the record's document in its collection.
    pub async fn set<T: Record + Collection>(&self, record: &T) -> StoreResult<()> {
        let path = root().collection::<T>()?.document(record.key())?;
        self.write(path.path(), record, WriteMode::Replace).await
    }

    /// Merges the record's fields into its existing document.
    pub async fn update<T: Record + Collection>(&self, record: &T) -> StoreResult<()> {
        let path = root().collection::<T>()?.document(record.key())?;
        self.write(path.path(), record, WriteMode::Merge).await
    }

    /// Replaces the document at an explicit path.
    pub async fn set_document<T: Serialize>(
        &self,
        path: &DocumentPath<T>,
        record: &T,
    ) -> StoreResult<()> {
        self.write(path.path(), record, WriteMode::Replace).await
    }

    /// Merges into the document at an explicit path.
    pub async fn update_document<T: Serialize>(
        &self,
        path: &DocumentPath<T>,
        record: &T,
    ) -> StoreResult<()> {
        self.write(path.path(), record, WriteMode::Merge).await
    }

    async fn write<T: Serialize>(
        &self,
        path: &ResourcePath,
        record: &T,
        mode: WriteMode,
    ) -> StoreResult<()> {
        let data = codec::encode(record)?;
        tracing::debug!("write {:?} {} ({} fields)", mode, path, data.len());
        self.backend.write(path, data, mode).await?;
        Ok(())
    }
}

impl<B> Clone for StoreClient<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            source: self.source,
        }
    }
}

impl<B> fmt::Debug for StoreClient<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreClient")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

fn decode_document<T: DeserializeOwned>(snapshot: DocumentSnapshot) -> StoreResult<Option<T>> {
    Ok(codec::decode(snapshot.data.as_ref(), Some(&snapshot.id))?)
}

fn decode_collection<T: DeserializeOwned>(snapshot: QuerySnapshot) -> StoreResult<Vec<T>> {
    let total = snapshot.len();
    let records: Vec<T> = snapshot
        .documents
        .into_iter()
        .filter_map(
            |doc| match codec::decode(doc.data.as_ref(), Some(&doc.id)) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!("Skipping collection member: {}", e);
                    None
                }
            },
        )
        .collect();

    if records.len() < total {
        tracing::debug!("decoded {} of {} collection members", records.len(), total);
    }
    Ok(records)
}
