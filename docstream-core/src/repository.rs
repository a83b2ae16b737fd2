//! Per-collection facade over [`StoreClient`].

use std::fmt;
use std::marker::PhantomData;

use crate::backend::Backend;
use crate::client::StoreClient;
use crate::error::StoreResult;
use crate::path::{root, CollectionPath, DocumentPath};
use crate::record::{Collection, Record};
use crate::subscription::{CollectionObservation, DocumentObservation};

/// Reads and writes records of type `T` in their top-level collection.
///
/// Every call resolves the document path from the record key and delegates
/// to the client. No state is kept besides the client handle.
pub struct Repository<T, B> {
    client: StoreClient<B>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record + Collection, B: Backend> Repository<T, B> {
    pub fn new(client: StoreClient<B>) -> Self {
        Self {
            client,
            _record: PhantomData,
        }
    }

    pub fn client(&self) -> &StoreClient<B> {
        &self.client
    }

    /// Path of the collection this repository manages.
    pub fn collection(&self) -> StoreResult<CollectionPath<T>> {
        Ok(root().collection::<T>()?)
    }

    /// Path of the document holding `key`.
    pub fn document(&self, key: &str) -> StoreResult<DocumentPath<T>> {
        Ok(self.collection()?.document(key)?)
    }

    /// Fetches the record stored under `key`.
    pub async fn get(&self, key: &str) -> StoreResult<Option<T>> {
        let path = self.document(key)?;
        self.client.get_document(&path).await
    }

    /// Fetches every decodable record in the collection.
    pub async fn list(&self) -> StoreResult<Vec<T>> {
        let path = self.collection()?;
        self.client.get_collection(&path).await
    }

    /// Streams the record stored under `key`.
    pub fn observe(&self, key: &str) -> StoreResult<DocumentObservation<T>> {
        let path = self.document(key)?;
        Ok(self.client.observe_document(&path))
    }

    /// Streams the whole collection.
    pub fn observe_all(&self) -> StoreResult<CollectionObservation<T>> {
        let path = self.collection()?;
        Ok(self.client.observe_collection(&path))
    }

    pub async fn set(&self, record: &T) -> StoreResult<()> {
        self.client.set(record).await
    }

    pub async fn update(&self, record: &T) -> StoreResult<()> {
        self.client.update(record).await
    }
}

impl<T, B> Clone for Repository<T, B> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            _record: PhantomData,
        }
    }
}

impl<T: Collection, B> fmt::Debug for Repository<T, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("collection", &T::NAME)
            .field("client", &self.client)
            .finish()
    }
}
