//! Docstream Core Library
//!
//! Typed document paths, a record codec and stream-based subscriptions over
//! a pluggable document store backend.

pub mod backend;
pub mod client;
pub mod codec;
pub mod error;
pub mod path;
pub mod record;
pub mod repository;
pub mod subscription;

#[cfg(test)]
mod test_support;

pub use backend::{
    Backend, BackendError, BackendErrorCode, BackendResult, DocumentSnapshot, ListenerRegistration,
    LocalBackend, MemoryBackend, QuerySnapshot, Source, WriteMode,
};
pub use client::StoreClient;
pub use codec::{decode, encode, DecodeError, Dictionary, EncodeError, KEY_FIELD};
pub use error::{StoreError, StoreResult};
pub use path::{root, CollectionPath, DocumentPath, PathError, ResourcePath, RootPath};
pub use record::{Collection, Document, Record};
pub use repository::Repository;
pub use subscription::{
    CollectionObservation, DocumentObservation, Observation, SubscriptionHandle,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
